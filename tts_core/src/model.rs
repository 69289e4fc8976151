use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info, warn};

/// A loaded speech model.
///
/// `synthesize` is blocking and may take seconds; callers must go through
/// [`crate::SynthesisGateway`] which offloads it and bounds concurrency.
pub trait SpeechModel: Send + Sync + 'static {
    /// Native output rate of the model in Hz
    fn sample_rate(&self) -> u32;

    /// Whether a voice reference actually changes the output voice
    fn supports_cloning(&self) -> bool {
        false
    }

    /// Whether concurrent `synthesize` calls are known to be safe.
    /// When false the gateway serializes every call.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    fn synthesize(
        &self,
        text: &str,
        voice_reference: Option<&Path>,
        language: &str,
    ) -> anyhow::Result<Vec<f32>>;
}

/// Compute device requested for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(anyhow::anyhow!(
                "unknown device '{other}' (expected auto, cpu or cuda)"
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        };
        f.write_str(name)
    }
}

/// Read sample rate from a Piper voice config JSON (`audio.sample_rate`)
pub fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path.as_ref())
        .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

    let sample_rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

    u32::try_from(sample_rate).with_context(|| format!("sample rate {sample_rate} out of range"))
}

/// Piper ONNX voice. Single speaker, no cloning.
pub struct PiperModel {
    synth: Mutex<PiperSpeechSynthesizer>,
    sample_rate: u32,
    config_path: PathBuf,
}

// Manual Debug implementation since PiperSpeechSynthesizer doesn't implement Debug
impl fmt::Debug for PiperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiperModel")
            .field("synth", &"<PiperSpeechSynthesizer>")
            .field("sample_rate", &self.sample_rate)
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl PiperModel {
    /// Load a voice from its `.onnx.json` config path
    pub fn load<P: AsRef<Path>>(cfg_path: P, device: Device) -> anyhow::Result<Self> {
        let cfg_path = cfg_path.as_ref();
        let sample_rate = read_sample_rate(cfg_path)?;

        // piper-rs runs on the default ONNX runtime provider
        if device == Device::Cuda {
            warn!("CUDA requested but the Piper backend only runs on CPU, falling back to CPU");
        }

        let model = piper_rs::from_config_path(cfg_path)
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)?;
        info!(
            config = %cfg_path.display(),
            sample_rate,
            "Loaded Piper voice"
        );

        Ok(Self {
            synth: Mutex::new(synth),
            sample_rate,
            config_path: cfg_path.to_path_buf(),
        })
    }
}

impl SpeechModel for PiperModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(
        &self,
        text: &str,
        voice_reference: Option<&Path>,
        _language: &str,
    ) -> anyhow::Result<Vec<f32>> {
        if let Some(path) = voice_reference {
            debug!(voice = %path.display(), "Piper voices cannot be cloned, ignoring reference");
        }

        let synth = self.synth.lock().map_err(|_| {
            anyhow::anyhow!("Synthesizer lock poisoned - this indicates a previous panic. Please restart the server.")
        })?;

        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(
                part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                    .into_vec(),
            );
        }
        Ok(samples)
    }
}
