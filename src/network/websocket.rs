//! WebSocket transport for the live API

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use super::{ChannelCommand, ChannelPeer, Connector, LiveChannel, TransportEvent};
use crate::config::SessionConfig;
use crate::constants::CHANNEL_QUEUE_CAPACITY;
use crate::error::TransportError;
use crate::protocol::{parse_server_message, ClientMessage};

/// Connects to the configured endpoint over `wss://`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }

    /// Endpoint with the API key appended as the `key` query parameter
    pub fn request_url(config: &SessionConfig) -> Result<Url, TransportError> {
        let mut url = Url::parse(&config.endpoint)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid endpoint: {}", e)))?;

        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| TransportError::ConnectionFailed("API key is not set".to_string()))?;
        url.query_pairs_mut().append_pair("key", key);

        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<LiveChannel, TransportError> {
        let url = Self::request_url(config)?;
        tracing::info!("Connecting to {}", url.host_str().unwrap_or("live endpoint"));

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        tracing::debug!("WebSocket connected");

        let (mut write, read) = ws_stream.split();

        let setup = ClientMessage::setup(config).to_json()?;
        write
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let (channel, peer) = LiveChannel::pair(CHANNEL_QUEUE_CAPACITY);
        let task = tokio::spawn(run_link(write, read, peer));

        Ok(channel.with_task(task))
    }
}

/// Pump frames between the socket and the session until either side closes
async fn run_link<W, R>(mut write: W, mut read: R, mut peer: ChannelPeer)
where
    W: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !forward_frame(&peer, text.as_str()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if !forward_frame(&peer, text).await {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping non UTF-8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        tracing::info!("Server closed connection: {:?}", reason);
                        peer.emit(TransportEvent::Closed { reason }).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        peer.emit(TransportEvent::Error(TransportError::ReceiveFailed(e.to_string())))
                            .await;
                        break;
                    }
                    None => {
                        peer.emit(TransportEvent::Closed { reason: None }).await;
                        break;
                    }
                }
            }
            cmd = peer.commands.recv() => {
                match cmd {
                    Some(ChannelCommand::Send(message)) => {
                        let json = match message.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!("Dropping outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            peer.emit(TransportEvent::Error(TransportError::SendFailed(e.to_string())))
                                .await;
                            break;
                        }
                    }
                    Some(ChannelCommand::Close) | None => {
                        tracing::debug!("Closing WebSocket");
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Parse one JSON frame and forward its events. Returns false once the
/// session side has gone away.
async fn forward_frame(peer: &ChannelPeer, text: &str) -> bool {
    let events = match parse_server_message(text) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Ignoring frame: {}", e);
            return true;
        }
    };

    for event in events {
        tracing::trace!("Server event: {:?}", event);
        if !peer.emit(TransportEvent::Message(event)).await {
            return false;
        }
    }
    true
}
