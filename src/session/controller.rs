//! Session controller
//!
//! `run` drives one session on the calling task. It acquires the microphone
//! and speaker, opens the live channel, and then multiplexes four sources in
//! a single loop: capture chunks, transport events, playback completions and
//! control commands. All scheduler state is touched only from that loop.
//!
//! Every exit path stops playback, releases the microphone and closes the
//! channel before the state returns to `Idle`.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::backend::AudioBackend;
use crate::audio::capture::{CapturePipeline, MicrophoneStream};
use crate::audio::scheduler::{PlaybackDevice, PlaybackScheduler, SchedulerStats};
use crate::codec::pcm::EncodedChunk;
use crate::config::AppConfig;
use crate::constants::CHANNELS;
use crate::error::{AudioError, Resource, SessionError, TransportError};
use crate::network::{Connector, LiveChannel, TransportEvent};
use crate::protocol::ServerEvent;
use crate::session::state::SessionState;
use crate::session::transcript::{Transcript, TranscriptTurn};

/// Notifications for whoever owns the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Fragment of what the user is saying
    InputTranscription(String),
    /// Fragment of what the model is saying
    OutputTranscription(String),
    TurnComplete(TranscriptTurn),
    Interrupted { stopped: usize },
    Failed(SessionError),
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    UserStop,
    /// Stopped before the channel opened
    Cancelled,
    RemoteClosed { reason: Option<String> },
    Failed(SessionError),
}

/// What happened during one session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub end_reason: EndReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Capture chunks handed to the channel
    pub chunks_sent: u64,
    /// Capture chunks lost to a full or closed outbound queue
    pub chunks_dropped: u64,
    pub segments_scheduled: u64,
    pub segments_completed: u64,
    /// Inbound chunks discarded because they failed to decode or schedule
    pub segments_dropped: u64,
    pub interruptions: u64,
    pub transcript: Vec<TranscriptTurn>,
}

impl SessionSummary {
    fn new(session_id: Uuid, end_reason: EndReason, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            end_reason,
            started_at,
            ended_at: Utc::now(),
            chunks_sent: 0,
            chunks_dropped: 0,
            segments_scheduled: 0,
            segments_completed: 0,
            segments_dropped: 0,
            interruptions: 0,
            transcript: Vec::new(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    pub fn error(&self) -> Option<&SessionError> {
        match &self.end_reason {
            EndReason::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlCommand {
    Stop,
}

/// Owner-side control over a controller
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Request a stop. Returns false if the controller is gone.
    pub fn stop(&self) -> bool {
        self.commands.send(ControlCommand::Stop).is_ok()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`. False if the controller was dropped first.
    pub async fn wait_for(&mut self, target: SessionState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}

enum Opening {
    Open(LiveChannel),
    Cancelled(Option<LiveChannel>),
    Failed(SessionError, Option<LiveChannel>),
}

#[derive(Default)]
struct Outbound {
    sent: u64,
    dropped: u64,
}

/// Runs voice sessions against the live API
pub struct SessionController<B, C> {
    backend: B,
    connector: C,
    config: AppConfig,
    state: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl<B: AudioBackend, C: Connector> SessionController<B, C> {
    pub fn new(backend: B, connector: C, config: AppConfig) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let controller = Self {
            backend,
            connector,
            config,
            state: state_tx,
            commands: cmd_rx,
            events: None,
        };
        let handle = SessionHandle {
            commands: cmd_tx,
            state: state_rx,
        };
        (controller, handle)
    }

    /// Route session events to a new receiver, replacing any previous one
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Run one session to completion.
    ///
    /// Returns an error only when the session never became active. Either
    /// way the controller is back in `Idle` and can be run again.
    pub async fn run(&mut self) -> Result<SessionSummary, SessionError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %session_id);
        self.run_session(session_id).instrument(span).await
    }

    async fn run_session(&mut self, session_id: Uuid) -> Result<SessionSummary, SessionError> {
        // Stale stop requests from before this run
        while self.commands.try_recv().is_ok() {}

        let started_at = Utc::now();
        self.set_state(SessionState::Connecting);

        let (fault_tx, mut faults) = mpsc::unbounded_channel();

        let backend = self.backend.clone();
        let audio = self.config.audio.clone();
        let mic_faults = fault_tx.clone();
        let mut mic = match off_runtime(move || backend.open_microphone(&audio, mic_faults)).await {
            Ok(mic) => mic,
            Err(e) => return Err(self.fail(SessionError::acquisition(Resource::Microphone, e))),
        };

        let (completion_tx, mut completions) = mpsc::unbounded_channel();
        let backend = self.backend.clone();
        let audio = self.config.audio.clone();
        let output = match off_runtime(move || backend.open_output(&audio, completion_tx, fault_tx)).await {
            Ok(output) => output,
            Err(e) => {
                release_microphone(mic).await;
                return Err(self.fail(SessionError::acquisition(Resource::PlaybackDevice, e)));
            }
        };
        let scheduler = PlaybackScheduler::new(output, self.config.audio.output_sample_rate, CHANNELS);

        let channel = match self.open_channel().await {
            Opening::Open(channel) => channel,
            Opening::Cancelled(channel) => {
                tracing::info!("Stopped while connecting");
                self.set_state(SessionState::Closing);
                release(mic, scheduler, channel).await;
                self.set_state(SessionState::Idle);
                return Ok(SessionSummary::new(session_id, EndReason::Cancelled, started_at));
            }
            Opening::Failed(e, channel) => {
                release(mic, scheduler, channel).await;
                return Err(self.fail(e));
            }
        };

        let (chunk_tx, mut chunks) = mpsc::unbounded_channel::<EncodedChunk>();
        let pipeline = CapturePipeline::new(self.config.audio.input_sample_rate, CHANNELS);
        if let Err(e) = pipeline.start(&mut mic, move |chunk| {
            let _ = chunk_tx.send(chunk);
        }) {
            release(mic, scheduler, Some(channel)).await;
            return Err(self.fail(SessionError::acquisition(Resource::Microphone, e)));
        }
        self.set_state(SessionState::Active);

        let mut channel = channel;
        let mut scheduler = scheduler;
        let mut transcript = Transcript::new();
        let mut outbound = Outbound::default();

        let end_reason = loop {
            tokio::select! {
                biased;

                Some(ControlCommand::Stop) = self.commands.recv() => break EndReason::UserStop,
                Some((resource, e)) = faults.recv() => {
                    break EndReason::Failed(SessionError::device(resource, e));
                }
                Some(id) = completions.recv() => {
                    scheduler.on_source_ended(id);
                }
                event = channel.recv() => match event {
                    Some(TransportEvent::Message(event)) => {
                        self.dispatch(event, &mut scheduler, &mut transcript);
                    }
                    Some(TransportEvent::Closed { reason }) => break EndReason::RemoteClosed { reason },
                    Some(TransportEvent::Error(e)) => break EndReason::Failed(SessionError::Transport(e)),
                    None => break EndReason::RemoteClosed { reason: None },
                },
                Some(chunk) = chunks.recv() => match channel.send_audio(chunk) {
                    Ok(()) => outbound.sent += 1,
                    Err(e) => {
                        outbound.dropped += 1;
                        tracing::warn!("Dropping capture chunk: {}", e);
                    }
                },
            }
        };

        match &end_reason {
            EndReason::Failed(e) => {
                tracing::error!("Session failed: {}", e);
                self.emit(SessionEvent::Failed(e.clone()));
            }
            reason => tracing::info!("Session ending: {:?}", reason),
        }

        self.set_state(SessionState::Closing);
        let stats = release(mic, scheduler, Some(channel)).await;

        let mut summary = SessionSummary::new(session_id, end_reason, started_at);
        summary.chunks_sent = outbound.sent;
        summary.chunks_dropped = outbound.dropped;
        summary.segments_scheduled = stats.scheduled;
        summary.segments_completed = stats.completed;
        summary.segments_dropped = stats.dropped;
        summary.interruptions = stats.interruptions;
        summary.transcript = transcript.finish();

        self.set_state(SessionState::Idle);
        Ok(summary)
    }

    /// Connect and wait for the open acknowledgment, the timeout or a stop.
    ///
    /// The timeout covers the connect itself as well as the wait for the
    /// acknowledgment.
    async fn open_channel(&mut self) -> Opening {
        let deadline = tokio::time::sleep(self.config.session.open_timeout());
        tokio::pin!(deadline);

        let connect = self.connector.connect(&self.config.session);
        let mut channel = tokio::select! {
            result = connect => match result {
                Ok(channel) => channel,
                Err(e) => return Opening::Failed(SessionError::acquisition(Resource::Channel, e), None),
            },
            _ = &mut deadline => {
                return Opening::Failed(SessionError::Transport(TransportError::Timeout), None);
            }
            Some(ControlCommand::Stop) = self.commands.recv() => return Opening::Cancelled(None),
        };

        loop {
            tokio::select! {
                event = channel.recv() => match event {
                    Some(TransportEvent::Message(ServerEvent::SetupComplete)) => {
                        tracing::info!("Channel open");
                        return Opening::Open(channel);
                    }
                    Some(TransportEvent::Message(other)) => {
                        tracing::debug!("Ignoring event before open: {:?}", other);
                    }
                    Some(TransportEvent::Error(e)) => {
                        return Opening::Failed(
                            SessionError::acquisition(Resource::Channel, e),
                            Some(channel),
                        );
                    }
                    Some(TransportEvent::Closed { .. }) | None => {
                        return Opening::Failed(
                            SessionError::acquisition(Resource::Channel, TransportError::ClosedBeforeOpen),
                            Some(channel),
                        );
                    }
                },
                _ = &mut deadline => {
                    return Opening::Failed(SessionError::Transport(TransportError::Timeout), Some(channel));
                }
                Some(ControlCommand::Stop) = self.commands.recv() => return Opening::Cancelled(Some(channel)),
            }
        }
    }

    fn dispatch<D: PlaybackDevice>(
        &self,
        event: ServerEvent,
        scheduler: &mut PlaybackScheduler<D>,
        transcript: &mut Transcript,
    ) {
        match event {
            ServerEvent::SetupComplete => tracing::debug!("Duplicate open acknowledgment"),
            ServerEvent::OutputTranscription(text) => {
                transcript.push_output(&text);
                self.emit(SessionEvent::OutputTranscription(text));
            }
            ServerEvent::InputTranscription(text) => {
                transcript.push_input(&text);
                self.emit(SessionEvent::InputTranscription(text));
            }
            ServerEvent::Audio(chunk) => {
                if let Err(e) = scheduler.enqueue(&chunk) {
                    tracing::warn!("Dropping inbound audio chunk: {}", e);
                }
            }
            ServerEvent::Interrupted => {
                let stopped = scheduler.interrupt();
                tracing::info!("Interrupted, stopped {} source(s)", stopped);
                self.emit(SessionEvent::Interrupted { stopped });
            }
            ServerEvent::TurnComplete => {
                if let Some(turn) = transcript.commit_turn() {
                    tracing::debug!("Turn complete: user={:?} model={:?}", turn.user, turn.model);
                    self.emit(SessionEvent::TurnComplete(turn));
                }
            }
            ServerEvent::GoAway { time_left } => {
                tracing::warn!("Server is going away (time left: {:?})", time_left);
            }
        }
    }

    fn set_state(&self, next: SessionState) {
        let prev = *self.state.borrow();
        if !prev.can_transition_to(next) {
            tracing::warn!("Unexpected state transition {} -> {}", prev, next);
        }
        self.state.send_replace(next);
        tracing::info!("Session {} -> {}", prev, next);
        self.emit(SessionEvent::StateChanged(next));
    }

    /// Surface a failure that kept the session from becoming active
    fn fail(&self, error: SessionError) -> SessionError {
        tracing::error!("Session failed: {}", error);
        self.set_state(SessionState::Error);
        self.emit(SessionEvent::Failed(error.clone()));
        self.set_state(SessionState::Idle);
        error
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Run device work that blocks on hardware threads on the blocking pool
async fn off_runtime<T, F>(work: F) -> Result<T, AudioError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AudioError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AudioError::StreamError(e.to_string()))?
}

async fn release_microphone<M: MicrophoneStream + 'static>(mut mic: M) {
    let released = off_runtime(move || {
        mic.release();
        Ok(())
    })
    .await;
    if let Err(e) = released {
        tracing::warn!("Microphone release did not finish: {}", e);
    }
}

/// Stop playback, free both devices and close the channel.
///
/// Returns the scheduler's final counters.
async fn release<M, D>(
    mut mic: M,
    mut scheduler: PlaybackScheduler<D>,
    channel: Option<LiveChannel>,
) -> SchedulerStats
where
    M: MicrophoneStream + 'static,
    D: PlaybackDevice + 'static,
{
    let stopped = scheduler.stop_all();
    if stopped > 0 {
        tracing::debug!("Stopped {} playing source(s)", stopped);
    }
    let stats = scheduler.stats();

    let released = off_runtime(move || {
        mic.release();
        drop(scheduler);
        Ok(())
    })
    .await;
    if let Err(e) = released {
        tracing::warn!("Device release did not finish: {}", e);
    }

    if let Some(channel) = channel {
        channel.close().await;
    }
    stats
}
