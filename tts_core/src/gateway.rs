//! Serialized access point to the speech model.
//!
//! Model calls are blocking, so each one runs on tokio's blocking pool via
//! `spawn_blocking`. A FIFO semaphore in front of it bounds how many calls run
//! at once: one, unless the model declares concurrent calls safe.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::{SpeechModel, StagedVoice, SynthesisRequest, SynthesisResult, VoiceReference};

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("model invocation failed: {0}")]
    Model(#[source] anyhow::Error),

    #[error("failed to stage voice reference: {0}")]
    Staging(#[source] std::io::Error),

    #[error("model panicked during synthesis")]
    Panicked,

    #[error("synthesis gateway is unavailable")]
    Unavailable,
}

#[derive(Clone)]
pub struct SynthesisGateway {
    model: Arc<dyn SpeechModel>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    staging_dir: Option<PathBuf>,
}

impl std::fmt::Debug for SynthesisGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisGateway")
            .field("sample_rate", &self.model.sample_rate())
            .field("concurrency", &self.concurrency)
            .field("staging_dir", &self.staging_dir)
            .finish()
    }
}

impl SynthesisGateway {
    /// Wrap a loaded model. `max_concurrency` only applies when the model
    /// reports that concurrent calls are safe; otherwise calls are serialized.
    pub fn new(model: Arc<dyn SpeechModel>, max_concurrency: usize) -> Self {
        let concurrency = if model.supports_concurrent_calls() {
            max_concurrency.max(1)
        } else {
            if max_concurrency > 1 {
                warn!(
                    requested = max_concurrency,
                    "Model is not safe for concurrent calls, serializing synthesis"
                );
            }
            1
        };

        Self {
            model,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            staging_dir: None,
        }
    }

    /// Stage uploaded voice references under `dir` instead of the system temp dir
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn supports_cloning(&self) -> bool {
        self.model.supports_cloning()
    }

    /// Run one request through the model off the async runtime.
    ///
    /// Waiting callers are admitted in arrival order. Any staged upload has
    /// been removed by the time this returns, whatever the outcome.
    pub async fn submit(&self, request: SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        self.reserve().await?.run(request).await
    }

    /// Wait for a turn on the model without committing a request yet.
    ///
    /// Dropping the returned slot gives the turn back, so this wait can be
    /// abandoned safely.
    pub async fn reserve(&self) -> Result<SynthesisSlot, SynthesisError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SynthesisError::Unavailable)?;

        Ok(SynthesisSlot {
            permit,
            model: Arc::clone(&self.model),
            staging_dir: self.staging_dir.clone(),
        })
    }
}

/// A reserved turn on the model
pub struct SynthesisSlot {
    permit: OwnedSemaphorePermit,
    model: Arc<dyn SpeechModel>,
    staging_dir: Option<PathBuf>,
}

impl SynthesisSlot {
    /// Run the model on the blocking pool. The turn is released when the
    /// model call returns, even if the awaiting future was dropped earlier.
    pub async fn run(self, request: SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        let SynthesisSlot {
            permit,
            model,
            staging_dir,
        } = self;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_model(model.as_ref(), &request, staging_dir.as_deref())
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                SynthesisError::Panicked
            } else {
                SynthesisError::Unavailable
            }
        })?
    }
}

fn run_model(
    model: &dyn SpeechModel,
    request: &SynthesisRequest,
    staging_dir: Option<&Path>,
) -> Result<SynthesisResult, SynthesisError> {
    let staged = match &request.voice_reference {
        Some(VoiceReference::Upload(bytes)) => {
            Some(StagedVoice::stage(bytes, staging_dir).map_err(SynthesisError::Staging)?)
        }
        _ => None,
    };

    let voice_path = match (&staged, &request.voice_reference) {
        (Some(staged), _) => Some(staged.path()),
        (None, Some(VoiceReference::File(path))) => Some(path.as_path()),
        _ => None,
    };

    debug!(
        chars = request.text.len(),
        language = %request.language,
        cloned = voice_path.is_some(),
        "Running model"
    );
    let outcome = model.synthesize(&request.text, voice_path, &request.language);

    if let Some(staged) = staged {
        if let Err(e) = staged.remove() {
            warn!(error = %e, "Failed to remove staged voice reference");
        }
    }

    let samples = outcome.map_err(SynthesisError::Model)?;
    Ok(SynthesisResult {
        samples,
        sample_rate: model.sample_rate(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use std::time::Duration;

    /// Records what the model was given, and can be told to fail
    #[derive(Default)]
    struct RecordingModel {
        fail: bool,
        seen_paths: Mutex<Vec<PathBuf>>,
        seen_bytes: Mutex<Vec<Vec<u8>>>,
    }

    impl SpeechModel for RecordingModel {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn supports_cloning(&self) -> bool {
            true
        }

        fn synthesize(
            &self,
            _text: &str,
            voice_reference: Option<&Path>,
            _language: &str,
        ) -> anyhow::Result<Vec<f32>> {
            if let Some(path) = voice_reference {
                self.seen_paths.lock().unwrap().push(path.to_path_buf());
                self.seen_bytes.lock().unwrap().push(std::fs::read(path)?);
            }
            if self.fail {
                anyhow::bail!("injected failure");
            }
            Ok(vec![0.1; 24_000])
        }
    }

    /// Tracks the peak number of simultaneous calls
    struct ConcurrencyProbe {
        concurrent_safe: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new(concurrent_safe: bool) -> Self {
            Self {
                concurrent_safe,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl SpeechModel for ConcurrencyProbe {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn supports_concurrent_calls(&self) -> bool {
            self.concurrent_safe
        }

        fn synthesize(&self, _: &str, _: Option<&Path>, _: &str) -> anyhow::Result<Vec<f32>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.0; 16])
        }
    }

    struct PanickingModel;

    impl SpeechModel for PanickingModel {
        fn sample_rate(&self) -> u32 {
            22_050
        }

        fn synthesize(&self, _: &str, _: Option<&Path>, _: &str) -> anyhow::Result<Vec<f32>> {
            panic!("model exploded");
        }
    }

    fn upload_request(blob: &[u8]) -> SynthesisRequest {
        SynthesisRequest::new("hi").with_voice(VoiceReference::Upload(blob.to_vec()))
    }

    #[tokio::test]
    async fn test_submit_returns_model_sample_rate() {
        let gateway = SynthesisGateway::new(Arc::new(RecordingModel::default()), 1);
        let result = gateway.submit(SynthesisRequest::new("hello")).await.unwrap();
        assert_eq!(result.sample_rate, 24_000);
        assert_eq!(result.samples.len(), 24_000);
    }

    #[tokio::test]
    async fn test_upload_is_staged_then_removed() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(RecordingModel::default());
        let gateway = SynthesisGateway::new(model.clone(), 1).with_staging_dir(dir.path());
        let blob = vec![42u8; 500];

        gateway.submit(upload_request(&blob)).await.unwrap();

        let seen = model.seen_bytes.lock().unwrap();
        assert_eq!(seen.as_slice(), &[blob]);
        let path = &model.seen_paths.lock().unwrap()[0];
        assert!(path.starts_with(dir.path()));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_removed_when_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(RecordingModel {
            fail: true,
            ..Default::default()
        });
        let gateway = SynthesisGateway::new(model.clone(), 1).with_staging_dir(dir.path());

        let err = gateway.submit(upload_request(&[1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Model(_)));
        assert!(err.to_string().contains("injected failure"));

        assert!(!model.seen_paths.lock().unwrap()[0].exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_removed_when_model_panics() {
        let dir = tempfile::tempdir().unwrap();
        let gateway =
            SynthesisGateway::new(Arc::new(PanickingModel), 1).with_staging_dir(dir.path());

        let err = gateway.submit(upload_request(&[9; 64])).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Panicked));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // The permit was released on unwind
        let err = gateway.submit(SynthesisRequest::new("again")).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Panicked));
    }

    #[tokio::test]
    async fn test_configured_reference_file_is_kept() {
        let asset = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(asset.path(), b"reference").unwrap();
        let model = Arc::new(RecordingModel::default());
        let gateway = SynthesisGateway::new(model.clone(), 1);

        let request = SynthesisRequest::new("hello")
            .with_voice(VoiceReference::File(asset.path().to_path_buf()));
        gateway.submit(request).await.unwrap();

        assert_eq!(model.seen_paths.lock().unwrap()[0], asset.path());
        assert!(asset.path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unsafe_model_is_serialized() {
        let model = Arc::new(ConcurrencyProbe::new(false));
        let gateway = SynthesisGateway::new(model.clone(), 4);
        assert_eq!(gateway.concurrency(), 1);

        let calls: Vec<_> = (0..4)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.submit(SynthesisRequest::new(format!("t{i}"))).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(model.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_safe_model_uses_bounded_pool() {
        let model = Arc::new(ConcurrencyProbe::new(true));
        let gateway = SynthesisGateway::new(model.clone(), 2);
        assert_eq!(gateway.concurrency(), 2);

        let calls: Vec<_> = (0..6)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.submit(SynthesisRequest::new(format!("t{i}"))).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dropped_reservation_returns_turn() {
        let gateway = SynthesisGateway::new(Arc::new(RecordingModel::default()), 1);
        let slot = gateway.reserve().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(50), gateway.reserve()).await;
        assert!(waiting.is_err(), "second reservation should wait for the first");

        drop(slot);
        let result = gateway.submit(SynthesisRequest::new("next")).await.unwrap();
        assert_eq!(result.sample_rate, 24_000);
    }
}
