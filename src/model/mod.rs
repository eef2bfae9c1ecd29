//! The process-wide model handle.
//!
//! [`ModelHandle`] owns one pretrained [`SpeechModel`] bound to the device
//! probed at construction. Loading is idempotent and generation is
//! serialized: the underlying session is not assumed to be safe for
//! concurrent invocation.

pub mod hub;
pub mod onnx;
pub mod voices;

use std::{path::Path, sync::Mutex};

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::{device::Device, error::ModelError, params::GenerationParams};

/// A loaded text-to-speech model.
pub trait SpeechModel: Send {
    /// Sample rate of the audio returned by [`generate`](Self::generate).
    fn sample_rate(&self) -> u32;

    /// Generate a mono waveform for `text`.
    ///
    /// `voice_prompt`, when given, is a path to reference audio whose voice
    /// the output should imitate.
    fn generate(
        &mut self,
        text: &str,
        params: &GenerationParams,
        voice_prompt: Option<&Path>,
    ) -> Result<Vec<f32>, ModelError>;
}

/// Constructs a [`SpeechModel`] for a device.
pub trait ModelLoader: Send + Sync {
    /// Version string of the inference library behind the model.
    fn library_version(&self) -> String;

    fn load(&self, device: Device) -> anyhow::Result<Box<dyn SpeechModel>>;
}

/// Generated audio together with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Load state reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Loaded,
    NotLoaded,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelStatus::Loaded => "healthy",
            ModelStatus::NotLoaded => "model_not_loaded",
        }
    }
}

/// Shared, lazily-initialised model instance.
pub struct ModelHandle {
    device: Device,
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Mutex<Box<dyn SpeechModel>>>,
}

impl ModelHandle {
    /// Build a handle for `device`. Nothing is loaded yet.
    pub fn new(loader: impl ModelLoader + 'static, device: Device) -> Self {
        Self {
            device,
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    /// Build a handle on the best available device.
    pub fn with_probed_device(loader: impl ModelLoader + 'static) -> Self {
        Self::new(loader, Device::probe())
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn library_version(&self) -> String {
        self.loader.library_version()
    }

    pub fn status(&self) -> ModelStatus {
        if self.model.get().is_some() {
            ModelStatus::Loaded
        } else {
            ModelStatus::NotLoaded
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == ModelStatus::Loaded
    }

    /// Load the model on first call; later calls return immediately.
    ///
    /// A failed load leaves the handle unloaded so a later call may retry.
    pub fn ensure_loaded(&self) -> Result<(), ModelError> {
        self.model
            .get_or_try_init(|| {
                info!(device = %self.device, "Loading text-to-speech model");
                let model = self.loader.load(self.device).map_err(|e| {
                    warn!(device = %self.device, "Model load failed: {e:#}");
                    ModelError::Load(e)
                })?;
                info!(
                    device = %self.device,
                    sample_rate = model.sample_rate(),
                    "Model loaded"
                );
                Ok(Mutex::new(model))
            })
            .map(|_| ())
    }

    /// Generate speech, loading the model first if needed.
    ///
    /// Blocks until generation finishes; calls from several threads run one
    /// at a time.
    pub fn generate(
        &self,
        text: &str,
        params: &GenerationParams,
        voice_prompt: Option<&Path>,
    ) -> Result<Waveform, ModelError> {
        self.ensure_loaded()?;
        let cell = self
            .model
            .get()
            .ok_or_else(|| ModelError::Load(anyhow::anyhow!("model not initialized")))?;
        // A panic inside a previous generate call leaves the session usable.
        let mut model = cell.lock().unwrap_or_else(|p| p.into_inner());
        let samples = model.generate(text, params, voice_prompt)?;
        Ok(Waveform {
            samples,
            sample_rate: model.sample_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Tone;

    impl SpeechModel for Tone {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn generate(
            &mut self,
            text: &str,
            _params: &GenerationParams,
            voice_prompt: Option<&Path>,
        ) -> Result<Vec<f32>, ModelError> {
            if voice_prompt.is_some() {
                return Err(ModelError::VoicePromptUnsupported);
            }
            Ok(vec![0.25; text.len() * 10])
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl ModelLoader for CountingLoader {
        fn library_version(&self) -> String {
            "test-1.0".into()
        }

        fn load(&self, _device: Device) -> anyhow::Result<Box<dyn SpeechModel>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("weights missing");
            }
            Ok(Box::new(Tone))
        }
    }

    fn handle(fail_first: bool) -> (ModelHandle, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader { loads: Arc::clone(&loads), fail_first };
        (ModelHandle::new(loader, Device::Cpu), loads)
    }

    #[test]
    fn test_ensure_loaded_is_idempotent() {
        let (handle, loads) = handle(false);
        assert_eq!(handle.status(), ModelStatus::NotLoaded);
        handle.ensure_loaded().unwrap();
        handle.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[test]
    fn test_failed_load_can_retry() {
        let (handle, loads) = handle(true);
        assert!(matches!(handle.ensure_loaded(), Err(ModelError::Load(_))));
        assert!(!handle.is_loaded());
        handle.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_generate_loads_lazily() {
        let (handle, _) = handle(false);
        let wav = handle.generate("hi", &GenerationParams::default(), None).unwrap();
        assert_eq!(wav.sample_rate, 16_000);
        assert_eq!(wav.samples.len(), 20);
        assert_eq!(handle.status().as_str(), "healthy");
    }

    #[test]
    fn test_model_errors_propagate() {
        let (handle, _) = handle(false);
        let err = handle
            .generate("hi", &GenerationParams::default(), Some(Path::new("ref.wav")))
            .unwrap_err();
        assert!(matches!(err, ModelError::VoicePromptUnsupported));
        // The handle stays loaded after a failed generation.
        assert!(handle.is_loaded());
    }

    #[test]
    fn test_waveform_duration() {
        let w = Waveform { samples: vec![0.0; 24_000], sample_rate: 24_000 };
        assert_eq!(w.duration_secs(), 1.0);
    }
}
