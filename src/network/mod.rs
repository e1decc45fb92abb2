//! Bidirectional channel to the live API
//!
//! A `Connector` produces a `LiveChannel`: the session side of two mpsc queues
//! whose far end (`ChannelPeer`) is driven by a transport task.

pub mod websocket;

pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::pcm::EncodedChunk;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerEvent};

/// How long `close` waits for the transport task to finish
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Something the transport reported
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerEvent),
    /// Remote end closed the channel
    Closed { reason: Option<String> },
    Error(TransportError),
}

/// Instructions for the transport task
#[derive(Debug, Clone)]
pub enum ChannelCommand {
    Send(ClientMessage),
    Close,
}

/// Transport side of a channel
pub struct ChannelPeer {
    pub commands: mpsc::Receiver<ChannelCommand>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl ChannelPeer {
    /// Returns false once the session side is gone
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Session side of an open channel
pub struct LiveChannel {
    commands: mpsc::Sender<ChannelCommand>,
    events: mpsc::Receiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    /// Connected channel/peer pair with bounded queues
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (
            Self {
                commands: cmd_tx,
                events: event_rx,
                task: None,
            },
            ChannelPeer {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }

    /// Attach the task driving the peer; it is aborted if the channel is dropped
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Queue one audio chunk without waiting.
    ///
    /// A full queue drops the chunk and reports `SendFailed`.
    pub fn send_audio(&self, chunk: EncodedChunk) -> Result<(), TransportError> {
        self.commands
            .try_send(ChannelCommand::Send(ClientMessage::audio(chunk)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::SendFailed("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::SendFailed("channel closed".to_string())
                }
            })
    }

    /// Next transport event; `None` once the transport task has exited
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Ask the transport to close and wait briefly for it to finish.
    ///
    /// Queuing the close request counts against the same grace period, so a
    /// transport that has stopped reading cannot hold this up.
    pub async fn close(mut self) {
        let mut task = self.task.take();
        let commands = &self.commands;

        let shutdown = async {
            let _ = commands.send(ChannelCommand::Close).await;
            if let Some(task) = task.as_mut() {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(CLOSE_GRACE, shutdown).await.is_err() {
            tracing::warn!("Transport did not close in time, aborting");
            if let Some(task) = task {
                task.abort();
            }
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens live channels
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and send the setup message.
    ///
    /// The open acknowledgment arrives later as `ServerEvent::SetupComplete`.
    async fn connect(&self, config: &SessionConfig) -> Result<LiveChannel, TransportError>;
}
