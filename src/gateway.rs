//! Synthesis operations, independent of the HTTP transport.
//!
//! Every operation validates its input before the model is touched, runs
//! generation on the blocking pool and logs failures before returning them.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::{
    audio,
    device::Device,
    error::GatewayError,
    model::ModelHandle,
    params::{validate_text, GenerationParams},
};

// ─────────────────────────────────────────────────────────────────────────────
// Request and response types
// ─────────────────────────────────────────────────────────────────────────────

/// Reference-audio extensions accepted for voice cloning.
pub const VOICE_EXTENSIONS: [&str; 4] = ["wav", "mp3", "flac", "m4a"];

/// Body of `POST /synthesize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

/// JSON envelope around base64 WAV audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub message: String,
    pub audio_base64: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub device: Device,
    pub library_version: String,
}

/// An uploaded reference clip, still in memory.
#[derive(Debug, Clone)]
pub struct VoiceUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

impl VoiceUpload {
    /// Lowercased extension, if it is one of [`VOICE_EXTENSIONS`].
    pub fn extension(&self) -> Result<String, GatewayError> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|e| VOICE_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| GatewayError::UnsupportedVoiceFile {
                filename: self.filename.clone(),
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First 50 characters of `text`, for log lines.
fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(50).collect();
    if p.len() < text.len() {
        p.push_str("...");
    }
    p
}

fn log_failure(operation: &str, err: &GatewayError) {
    if err.is_client_error() {
        warn!(operation, "Rejected request: {err}");
    } else {
        error!(operation, "Error during synthesis: {err}");
    }
}

/// Write the upload to a temp file in `dir` that is removed when dropped.
fn persist_upload(dir: &Path, extension: &str, data: &[u8]) -> Result<NamedTempFile, GatewayError> {
    let mut file = tempfile::Builder::new()
        .prefix("voice_")
        .suffix(&format!(".{extension}"))
        .tempfile_in(dir)?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

/// Decode standard or URL-safe base64, padded or not.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, GatewayError> {
    let encoded = encoded.trim();
    let first = match STANDARD.decode(encoded) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };
    [STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .ok_or(GatewayError::InvalidBase64(first))
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// The synthesis service shared by all request handlers.
#[derive(Clone)]
pub struct Gateway {
    handle: Arc<ModelHandle>,
    upload_dir: PathBuf,
}

impl Gateway {
    pub fn new(handle: Arc<ModelHandle>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Generate speech with the model's own voice and return it as base64 WAV.
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, GatewayError> {
        self.run_synthesize(request)
            .await
            .inspect_err(|e| log_failure("synthesize", e))
    }

    async fn run_synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, GatewayError> {
        validate_text(&request.text)?;
        request.params.validate()?;
        info!("Generating speech for: {}", preview(&request.text));

        let (wav, sample_rate) = self.generate_wav(request.text, request.params, None).await?;
        Ok(SynthesisResponse {
            message: "Speech synthesized successfully".to_string(),
            audio_base64: STANDARD.encode(wav),
            sample_rate,
        })
    }

    /// Generate speech imitating `upload` and return the WAV bytes.
    pub async fn synthesize_with_voice(
        &self,
        text: String,
        params: GenerationParams,
        upload: Option<VoiceUpload>,
    ) -> Result<Vec<u8>, GatewayError> {
        self.run_synthesize_with_voice(text, params, upload)
            .await
            .inspect_err(|e| log_failure("synthesize_with_voice", e))
    }

    async fn run_synthesize_with_voice(
        &self,
        text: String,
        params: GenerationParams,
        upload: Option<VoiceUpload>,
    ) -> Result<Vec<u8>, GatewayError> {
        validate_text(&text)?;
        let upload = upload.ok_or(GatewayError::MissingVoiceFile)?;
        let extension = upload.extension()?;
        params.validate()?;
        info!(
            voice_file = %upload.filename,
            bytes = upload.data.len(),
            "Generating speech with custom voice for: {}",
            preview(&text)
        );

        let (wav, _) = self
            .generate_wav(text, params, Some((extension, upload.data)))
            .await?;
        Ok(wav)
    }

    /// Decode a base64 WAV produced by [`Self::synthesize`].
    pub fn download_audio(&self, encoded: &str) -> Result<Vec<u8>, GatewayError> {
        decode_base64(encoded).inspect_err(|e| log_failure("download_audio", e))
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: self.handle.status().as_str(),
            device: self.handle.device(),
            library_version: self.handle.library_version(),
        }
    }

    /// Run the model on the blocking pool and encode its output as WAV.
    ///
    /// The reference clip is written to disk inside the blocking task, which
    /// owns the temp file: it is deleted when the task finishes, whether or
    /// not the request that started it is still waiting.
    async fn generate_wav(
        &self,
        text: String,
        params: GenerationParams,
        voice: Option<(String, Vec<u8>)>,
    ) -> Result<(Vec<u8>, u32), GatewayError> {
        let handle = Arc::clone(&self.handle);
        let upload_dir = self.upload_dir.clone();

        tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, u32), GatewayError> {
            let prompt = voice
                .map(|(ext, data)| persist_upload(&upload_dir, &ext, &data))
                .transpose()?;
            let waveform = handle.generate(&text, &params, prompt.as_ref().map(|f| f.path()))?;
            let wav = audio::encode_wav(&waveform.samples, waveform.sample_rate)
                .map_err(GatewayError::Encoding)?;
            info!(
                samples = waveform.samples.len(),
                seconds = waveform.duration_secs(),
                "Speech generated"
            );
            Ok((wav, waveform.sample_rate))
        })
        .await
        .map_err(|e| GatewayError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ModelError,
        model::{ModelLoader, SpeechModel},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Silence(Arc<AtomicUsize>);

    impl SpeechModel for Silence {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn generate(
            &mut self,
            _text: &str,
            _params: &GenerationParams,
            _voice_prompt: Option<&Path>,
        ) -> Result<Vec<f32>, ModelError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.0; 800])
        }
    }

    struct SilenceLoader(Arc<AtomicUsize>);

    impl ModelLoader for SilenceLoader {
        fn library_version(&self) -> String {
            "silence-0.1".into()
        }

        fn load(&self, _device: Device) -> anyhow::Result<Box<dyn SpeechModel>> {
            Ok(Box::new(Silence(Arc::clone(&self.0))))
        }
    }

    fn gateway() -> (Gateway, Arc<AtomicUsize>, tempfile::TempDir) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = ModelHandle::new(SilenceLoader(Arc::clone(&calls)), Device::Cpu);
        let dir = tempfile::tempdir().unwrap();
        (Gateway::new(Arc::new(handle), dir.path()), calls, dir)
    }

    fn upload(name: &str) -> VoiceUpload {
        VoiceUpload { filename: name.into(), data: b"RIFF".to_vec() }
    }

    #[test]
    fn test_voice_extension_allow_list() {
        assert_eq!(upload("me.WAV").extension().unwrap(), "wav");
        assert_eq!(upload("clip.m4a").extension().unwrap(), "m4a");
        assert!(upload("notes.txt").extension().is_err());
        assert!(upload("noext").extension().is_err());
        assert!(upload("wav").extension().is_err());
    }

    #[test]
    fn test_decode_base64_variants() {
        let bytes: Vec<u8> = (0..=255).collect();
        for engine in [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD] {
            assert_eq!(decode_base64(&engine.encode(&bytes)).unwrap(), bytes);
        }
        assert!(matches!(decode_base64("not base64!"), Err(GatewayError::InvalidBase64(_))));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(80)), format!("{}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn test_synthesize_envelope() {
        let (gw, calls, _dir) = gateway();
        let resp = gw
            .synthesize(SynthesisRequest { text: "Hello".into(), params: GenerationParams::default() })
            .await
            .unwrap();
        assert_eq!(resp.sample_rate, 8_000);
        assert_eq!(resp.message, "Speech synthesized successfully");
        let wav = STANDARD.decode(resp.audio_base64).unwrap();
        assert_eq!(wav.len(), 44 + 800 * 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_params_skip_model() {
        let (gw, calls, _dir) = gateway();
        let params = GenerationParams { temperature: 0.0, ..Default::default() };
        let err = gw
            .synthesize(SynthesisRequest { text: "Hello".into(), params })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ParameterOutOfRange { name: "temperature", .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!gw.handle().is_loaded());
    }

    #[tokio::test]
    async fn test_voice_requires_file() {
        let (gw, calls, _dir) = gateway();
        let err = gw
            .synthesize_with_voice("Hello".into(), GenerationParams::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingVoiceFile));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_voice_upload_removed_after_generation() {
        let (gw, calls, dir) = gateway();
        let wav = gw
            .synthesize_with_voice("Hello".into(), GenerationParams::default(), Some(upload("me.flac")))
            .await
            .unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_health_before_load() {
        let (gw, _, _dir) = gateway();
        let report = gw.health();
        assert_eq!(report.status, "model_not_loaded");
        assert_eq!(report.device, Device::Cpu);
        assert_eq!(report.library_version, "silence-0.1");
    }
}
