// Configuration for the server and its sessions

use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tts_core::{Device, WavEncoding, DEFAULT_LANGUAGE};

/// Default period between keepalive pings
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Wire protocol spoken on `/tts-stream`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// Every text frame is one request, synthesized in the configured voice
    #[default]
    Queue,
    /// A JSON header frame followed by a binary reference-voice frame
    Clone,
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "v1" | "text" => Ok(ProtocolVariant::Queue),
            "clone" | "v3" | "cloning" => Ok(ProtocolVariant::Clone),
            other => Err(format!("unknown protocol '{other}' (expected queue or clone)")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("reference voice file not found at '{}'", .0.display())]
    MissingReferenceVoice(PathBuf),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub model_config_path: PathBuf,
    pub device: Device,
    pub reference_voice_path: Option<PathBuf>,
    pub protocol: ProtocolVariant,
    pub default_language: String,
    pub keepalive_interval_secs: u64,
    pub synthesis_concurrency: usize,
    pub wav_encoding: WavEncoding,
    pub max_text_length: usize,
    pub max_voice_reference_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            cors_allowed_origins: None,
            model_config_path: PathBuf::from("models/en_US/en_US-lessac-medium.onnx.json"),
            device: Device::Auto,
            reference_voice_path: None,
            protocol: ProtocolVariant::Queue,
            default_language: DEFAULT_LANGUAGE.to_string(),
            keepalive_interval_secs: DEFAULT_KEEPALIVE_SECS,
            synthesis_concurrency: 1,
            wav_encoding: WavEncoding::Pcm16,
            max_text_length: 5000,
            max_voice_reference_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset or unparsable numbers fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let port = number("PORT")
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(defaults.port);

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let model_config_path = lookup("TTS_MODEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_config_path);

        let device = match lookup("TTS_DEVICE") {
            Some(v) => v.parse().map_err(|e: anyhow::Error| ConfigError::Invalid {
                var: "TTS_DEVICE",
                reason: e.to_string(),
            })?,
            None => defaults.device,
        };

        let reference_voice_path = lookup("REFERENCE_VOICE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let protocol = match lookup("TTS_PROTOCOL") {
            Some(v) => v
                .parse()
                .map_err(|reason| ConfigError::Invalid { var: "TTS_PROTOCOL", reason })?,
            None => defaults.protocol,
        };

        let default_language = lookup("TTS_DEFAULT_LANGUAGE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_language);

        let keepalive_interval_secs = number("KEEPALIVE_INTERVAL_SECS")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.keepalive_interval_secs);

        let synthesis_concurrency = number("SYNTHESIS_CONCURRENCY")
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.synthesis_concurrency);

        let wav_encoding = match lookup("WAV_ENCODING") {
            Some(v) => v.parse().map_err(|e: anyhow::Error| ConfigError::Invalid {
                var: "WAV_ENCODING",
                reason: e.to_string(),
            })?,
            None => defaults.wav_encoding,
        };

        let max_text_length = number("MAX_TEXT_LENGTH")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.max_text_length);

        let max_voice_reference_bytes = number("MAX_VOICE_REFERENCE_BYTES")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.max_voice_reference_bytes);

        Ok(Self {
            port,
            cors_allowed_origins,
            model_config_path,
            device,
            reference_voice_path,
            protocol,
            default_language,
            keepalive_interval_secs,
            synthesis_concurrency,
            wav_encoding,
            max_text_length,
            max_voice_reference_bytes,
        })
    }

    /// Startup checks that must abort the process
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.reference_voice_path {
            if !path.is_file() {
                return Err(ConfigError::MissingReferenceVoice(path.clone()));
            }
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            protocol: self.protocol,
            default_language: self.default_language.clone(),
            reference_voice: self.reference_voice_path.clone(),
            keepalive_interval: self.keepalive_interval(),
            wav_encoding: self.wav_encoding,
            max_text_length: self.max_text_length,
            max_voice_reference_bytes: self.max_voice_reference_bytes,
        }
    }
}

/// Per-connection settings shared by every session
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub protocol: ProtocolVariant,
    pub default_language: String,
    pub reference_voice: Option<PathBuf>,
    pub keepalive_interval: Duration,
    pub wav_encoding: WavEncoding,
    pub max_text_length: usize,
    pub max_voice_reference_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        ServerConfig::default().session_settings()
    }
}
