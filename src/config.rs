//! Application configuration
//!
//! Settings come from a TOML file in the platform config directory, with
//! every field optional. The API key is taken from the environment and is
//! never written back to disk.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

/// Output modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    #[default]
    Audio,
}

/// Live channel settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint of the live API
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Prebuilt voice profile name
    pub voice: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
    /// How long to wait for the open acknowledgment
    pub open_timeout_ms: u64,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            response_modality: ResponseModality::Audio,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            input_transcription: true,
            output_transcription: true,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("system_instruction", &self.system_instruction)
            .field("response_modality", &self.response_modality)
            .field("open_timeout_ms", &self.open_timeout_ms)
            .field("input_transcription", &self.input_transcription)
            .field("output_transcription", &self.output_transcription)
            .finish()
    }
}

impl SessionConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Model name in the `models/<name>` form the API expects
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

/// Audio device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device id from `list_devices`; default input when unset
    pub input_device: Option<String>,
    /// Device id from `list_devices`; default output when unset
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Samples per capture callback
    pub capture_block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture_block_size: CAPTURE_BLOCK_SIZE,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/live-audio-session/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "live-audio-session").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply the environment.
    ///
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                tracing::debug!("Loading config from {}", path.display());
                Self::from_toml_str(&contents)?
            }
            _ => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write the file, creating parent directories. The API key is omitted.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = API_KEY_VARS
            .iter()
            .filter_map(|var| lookup(var))
            .find(|value| !value.trim().is_empty())
        {
            self.session.api_key = Some(key.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.audio.capture_block_size == 0 {
            return Err(Error::Config("capture_block_size must be non-zero".to_string()));
        }
        if self.session.model.trim().is_empty() {
            return Err(Error::Config("session.model must not be empty".to_string()));
        }
        url::Url::parse(&self.session.endpoint)
            .map_err(|e| Error::Config(format!("invalid session.endpoint: {}", e)))?;
        Ok(())
    }
}
