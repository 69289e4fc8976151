//! Inbound frame parsing for `/tts-stream`.
//!
//! Two variants are supported, chosen per server at startup:
//!
//! - **queue**: every text frame is a complete request in the default language,
//!   synthesized with the configured reference voice (if any).
//! - **clone**: a JSON text frame `{"text": "...", "language": "en"}` followed
//!   by exactly one binary frame holding the reference voice audio.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use tts_core::{SynthesisRequest, VoiceReference};

use crate::config::{ProtocolVariant, SessionSettings};
use crate::error::ProtocolError;
use crate::validation::{validate_language, validate_text, validate_voice_reference};

/// Header frame of the cloning protocol
#[derive(Debug, Deserialize)]
pub struct RequestHeader {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Control frames the server sends as JSON text
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
}

/// What one inbound frame amounted to
#[derive(Debug)]
pub enum Inbound {
    /// A complete request, ready to queue
    Request(SynthesisRequest),
    /// Header accepted, waiting for the voice payload
    AwaitingVoice,
    /// A plain-text request that failed validation. Only this request is
    /// lost, the session keeps going.
    Rejected(String),
    /// Ping/pong and other frames that carry no request
    Ignored,
    /// Client sent a close frame
    Closed,
}

#[derive(Debug)]
pub struct FrameParser {
    variant: ProtocolVariant,
    default_language: String,
    reference_voice: Option<VoiceReference>,
    max_text_length: usize,
    max_voice_reference_bytes: usize,
    pending: Option<(String, String)>,
}

impl FrameParser {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            variant: settings.protocol,
            default_language: settings.default_language.clone(),
            reference_voice: settings.reference_voice.clone().map(VoiceReference::File),
            max_text_length: settings.max_text_length,
            max_voice_reference_bytes: settings.max_voice_reference_bytes,
            pending: None,
        }
    }

    /// True between a clone header and its voice payload
    pub fn awaiting_voice(&self) -> bool {
        self.pending.is_some()
    }

    pub fn parse(&mut self, msg: Message) -> Result<Inbound, ProtocolError> {
        match msg {
            Message::Text(text) => match self.variant {
                ProtocolVariant::Queue => self.plain_text(text.as_str()),
                ProtocolVariant::Clone => self.header(text.as_str()),
            },
            Message::Binary(bytes) => match self.variant {
                ProtocolVariant::Queue => Err(ProtocolError::UnexpectedBinary),
                ProtocolVariant::Clone => self.voice_payload(&bytes),
            },
            Message::Ping(_) | Message::Pong(_) => Ok(Inbound::Ignored),
            Message::Close(_) => Ok(Inbound::Closed),
        }
    }

    fn plain_text(&self, text: &str) -> Result<Inbound, ProtocolError> {
        if let Err(e) = validate_text(text, self.max_text_length) {
            return Ok(Inbound::Rejected(e.to_string()));
        }
        let mut request =
            SynthesisRequest::new(text).with_language(self.default_language.clone());
        if let Some(voice) = &self.reference_voice {
            request = request.with_voice(voice.clone());
        }
        Ok(Inbound::Request(request))
    }

    fn header(&mut self, text: &str) -> Result<Inbound, ProtocolError> {
        if self.pending.is_some() {
            return Err(ProtocolError::ExpectedVoicePayload);
        }
        let header: RequestHeader = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedHeader(e.to_string()))?;
        let language = header
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.default_language.clone());

        validate_text(&header.text, self.max_text_length)?;
        validate_language(&language)?;

        self.pending = Some((header.text, language));
        Ok(Inbound::AwaitingVoice)
    }

    fn voice_payload(&mut self, bytes: &[u8]) -> Result<Inbound, ProtocolError> {
        let (text, language) = self.pending.take().ok_or(ProtocolError::UnexpectedBinary)?;
        validate_voice_reference(bytes, self.max_voice_reference_bytes)?;
        Ok(Inbound::Request(
            SynthesisRequest::new(text)
                .with_language(language)
                .with_voice(VoiceReference::Upload(bytes.to_vec())),
        ))
    }
}

/// JSON text of a keepalive ping
pub fn ping_frame() -> String {
    serde_json::to_string(&ControlMessage::Ping).unwrap_or_else(|_| r#"{"type":"ping"}"#.into())
}
