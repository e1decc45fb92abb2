//! # Live Audio Session
//!
//! Bidirectional real-time voice sessions against a live generative-AI API.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          SESSION CONTROLLER                              │
//! │        Idle → Connecting → Active → Closing → Idle   (+ Error)           │
//! │                                                                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────────────────┐   │
//! │  │ Microphone  │──▶│   Capture    │──▶│   PCM Codec (f32 → i16 →     │   │
//! │  │ 16 kHz mono │   │   Pipeline   │   │   little-endian → base64)    │   │
//! │  └─────────────┘   └──────────────┘   └──────────────┬───────────────┘   │
//! │                                                      │ EncodedChunk      │
//! │                                                      ▼                   │
//! │  ┌───────────────────────────────────────────────────────────────────┐   │
//! │  │          Live channel (network::websocket) - one WebSocket        │   │
//! │  │   out: realtimeInput.mediaChunks   in: ServerEvent tagged union   │   │
//! │  └───────────────────────────────────────────────────────────────────┘   │
//! │          │ Audio(EncodedChunk)          │ Interrupted   │ transcripts    │
//! │          ▼                              ▼               ▼                │
//! │  ┌──────────────────────────────────────────┐   ┌────────────────────┐   │
//! │  │           Playback Scheduler             │   │   Transcript log   │   │
//! │  │  start = max(next_start_time, now)       │   └────────────────────┘   │
//! │  │  next_start_time += duration             │                            │
//! │  │  active sources: stop all on interrupt   │                            │
//! │  └─────────────────────┬────────────────────┘                            │
//! │                        ▼                                                 │
//! │                 ┌─────────────┐                                          │
//! │                 │  Speaker    │                                          │
//! │                 │ 24 kHz mono │                                          │
//! │                 └─────────────┘                                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Microphone sample rate sent to the live API
    pub const INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of audio returned by the live API
    pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Both directions are mono
    pub const CHANNELS: u16 = 1;

    /// Samples per capture callback
    pub const CAPTURE_BLOCK_SIZE: usize = 4096;

    /// Scale between normalised float samples and 16-bit PCM
    pub const PCM_SCALE: f32 = 32768.0;

    /// Default live API endpoint
    pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

    /// Default model for native-audio sessions
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

    /// Default prebuilt voice profile
    pub const DEFAULT_VOICE: &str = "Zephyr";

    /// Default system instruction
    pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and helpful assistant.";

    /// Default time to wait for the channel's open acknowledgment
    pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

    /// Capacity of the outbound command queue to the channel task
    pub const CHANNEL_QUEUE_CAPACITY: usize = 256;
}
