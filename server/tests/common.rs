//! Common utilities for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use server::config::{ProtocolVariant, SessionSettings};
use server::{build_router, AppState};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tts_core::{SpeechModel, SynthesisGateway};

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Scripted stand-in for a real speech model.
///
/// Produces `chars * 100` samples (or a fixed count), fails on any text
/// containing "fail", and records every voice reference it was handed.
pub struct MockModel {
    sample_rate: u32,
    delay: Duration,
    fixed_samples: Option<usize>,
    pub calls: AtomicUsize,
    pub voices: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl MockModel {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            delay: Duration::ZERO,
            fixed_samples: None,
            calls: AtomicUsize::new(0),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_fixed_samples(mut self, samples: usize) -> Self {
        self.fixed_samples = Some(samples);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechModel for MockModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn supports_cloning(&self) -> bool {
        true
    }

    fn synthesize(
        &self,
        text: &str,
        voice_reference: Option<&Path>,
        _language: &str,
    ) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = voice_reference {
            let bytes = std::fs::read(path)?;
            self.voices.lock().unwrap().push((path.to_path_buf(), bytes));
        }
        std::thread::sleep(self.delay);
        if text.contains("fail") {
            anyhow::bail!("injected synthesis failure");
        }
        let n = self.fixed_samples.unwrap_or(text.chars().count() * 100);
        Ok(vec![0.25; n])
    }
}

pub struct TestServer {
    pub url: String,
    pub state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

/// Session settings with a keepalive long enough to stay out of the way
pub fn settings(protocol: ProtocolVariant) -> SessionSettings {
    SessionSettings {
        protocol,
        keepalive_interval: Duration::from_secs(15),
        ..SessionSettings::default()
    }
}

/// Boot a server on an ephemeral port
pub async fn spawn_server(
    model: Arc<MockModel>,
    settings: SessionSettings,
    staging_dir: Option<&Path>,
) -> TestServer {
    let mut gateway = SynthesisGateway::new(model, 1);
    if let Some(dir) = staging_dir {
        gateway = gateway.with_staging_dir(dir);
    }
    let state = AppState::new(gateway, settings);
    let app = build_router(state.clone(), None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        url: format!("ws://{addr}/tts-stream"),
        state,
        _handle: handle,
    }
}

pub async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.expect("WebSocket handshake failed");
    ws
}

pub async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

pub async fn send_clone_request(ws: &mut WsStream, text: &str, voice: &[u8]) {
    let header = serde_json::json!({ "text": text, "language": "en" });
    ws.send(Message::text(header.to_string())).await.unwrap();
    ws.send(Message::binary(voice.to_vec())).await.unwrap();
}

#[derive(Debug)]
pub enum Frame {
    Audio(Vec<u8>),
    Ping,
    Close(Option<u16>),
}

/// Next server frame, or None on timeout or end of stream
pub async fn next_frame(ws: &mut WsStream, within: Duration) -> Option<Frame> {
    loop {
        let msg = match tokio::time::timeout(within, ws.next()).await {
            Ok(Some(Ok(msg))) => msg,
            _ => return None,
        };
        return Some(match msg {
            Message::Binary(bytes) => Frame::Audio(bytes.to_vec()),
            Message::Text(text) => {
                let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(json["type"], "ping", "unexpected text frame: {text}");
                Frame::Ping
            }
            Message::Close(frame) => Frame::Close(frame.map(|f| u16::from(f.code))),
            _ => continue,
        });
    }
}

/// Next audio frame, skipping keepalives
pub async fn next_audio(ws: &mut WsStream, within: Duration) -> Option<Vec<u8>> {
    loop {
        match next_frame(ws, within).await? {
            Frame::Audio(bytes) => return Some(bytes),
            Frame::Ping => continue,
            Frame::Close(_) => return None,
        }
    }
}

/// WAV header and number of sample frames
pub fn decode_wav(bytes: &[u8]) -> (hound::WavSpec, u32) {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    (reader.spec(), reader.duration())
}

/// Poll `cond` until it holds or `within` elapses
pub async fn wait_until<F: Fn() -> bool>(cond: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
