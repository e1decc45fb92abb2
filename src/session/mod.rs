//! Session control: lifecycle, transcript and the event loop tying capture,
//! channel and playback together

pub mod controller;
pub mod state;
pub mod transcript;

pub use controller::{EndReason, SessionController, SessionEvent, SessionHandle, SessionSummary};
pub use state::SessionState;
pub use transcript::{Transcript, TranscriptTurn};
