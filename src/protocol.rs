//! Live API wire messages
//!
//! Outbound messages are serialised from `ClientMessage`. Inbound JSON is
//! flattened into a sequence of `ServerEvent`s, one per thing that happened,
//! so the session loop can match on them exhaustively.

use serde::{Deserialize, Serialize};

use crate::codec::pcm::{EncodedChunk, MediaType};
use crate::config::{ResponseModality, SessionConfig};
use crate::error::TransportError;

/// Messages sent to the live API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serialises as `{}`
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedChunk>,
}

impl ClientMessage {
    /// First message on a new channel
    pub fn setup(config: &SessionConfig) -> Self {
        ClientMessage::Setup(Setup {
            model: config.model_path(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            input_audio_transcription: config.input_transcription.then_some(Empty {}),
            output_audio_transcription: config.output_transcription.then_some(Empty {}),
        })
    }

    pub fn audio(chunk: EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        })
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

/// One inbound occurrence, in the order the server reported it
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Open acknowledgment for the setup message
    SetupComplete,
    /// Transcript of what the model is saying
    OutputTranscription(String),
    /// Transcript of what the user said
    InputTranscription(String),
    /// Model audio to play
    Audio(EncodedChunk),
    /// The user spoke over the model; drop queued playback
    Interrupted,
    TurnComplete,
    /// Server will close the channel soon
    GoAway { time_left: Option<String> },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<RawServerContent>,
    go_away: Option<RawGoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawContent>,
    output_transcription: Option<RawTranscription>,
    input_transcription: Option<RawTranscription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<RawBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    time_left: Option<String>,
}

/// Flatten one inbound JSON message into events.
///
/// Inline data with a non-PCM media type is skipped. Unknown top-level
/// fields produce no events.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>, TransportError> {
    let raw: RawServerMessage =
        serde_json::from_str(text).map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

    let mut events = Vec::new();

    if raw.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = raw.server_content {
        if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            events.push(ServerEvent::OutputTranscription(t.text));
        }
        if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            events.push(ServerEvent::InputTranscription(t.text));
        }

        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for blob in parts.into_iter().filter_map(|part| part.inline_data) {
            match blob.mime_type.parse::<MediaType>() {
                Ok(mime_type) => events.push(ServerEvent::Audio(EncodedChunk::new(mime_type, blob.data))),
                Err(e) => tracing::warn!("Skipping inline data: {}", e),
            }
        }

        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(go_away) = raw.go_away {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    Ok(events)
}
