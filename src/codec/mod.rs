//! PCM codec
//!
//! Converts between float samples, 16-bit PCM and the base64 payloads
//! carried over the live channel.

pub mod pcm;

pub use pcm::{EncodedChunk, MediaType};
