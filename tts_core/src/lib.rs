mod gateway;
mod model;
mod voice;
mod wav;

use std::{fmt, path::PathBuf};

pub use gateway::{SynthesisError, SynthesisGateway, SynthesisSlot};
pub use model::{read_sample_rate, Device, PiperModel, SpeechModel};
pub use voice::StagedVoice;
pub use wav::{encode_wav, WavEncoding};

/// Language used when a request does not name one
pub const DEFAULT_LANGUAGE: &str = "en";

/// Reference audio used to condition synthesis on a target voice
#[derive(Clone)]
pub enum VoiceReference {
    /// Per-request upload; staged to a temp file only while it is being synthesized
    Upload(Vec<u8>),
    /// Server-side asset configured at startup; never removed
    File(PathBuf),
}

// Manual Debug implementation so uploaded blobs don't end up in logs
impl fmt::Debug for VoiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceReference::Upload(bytes) => f
                .debug_tuple("Upload")
                .field(&format_args!("<{} bytes>", bytes.len()))
                .finish(),
            VoiceReference::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// One unit of work for the synthesis gateway
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_reference: Option<VoiceReference>,
    pub language: String,
}

impl SynthesisRequest {
    /// Plain text request in the default language, no voice reference
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_reference: None,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_voice(mut self, voice: VoiceReference) -> Self {
        self.voice_reference = Some(voice);
        self
    }
}

/// Raw synthesized audio together with the rate the model produced it at
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesisResult {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as f32 / self.sample_rate as f32 * 1000.0) as u64
    }
}
