//! Pretrained model resolution from the HuggingFace Hub.
//!
//! A model repository carries a `config.json` manifest naming the ONNX
//! graph, the voices archive and, optionally, a speaker-encoder graph used
//! for voice cloning. Files are cached in the HuggingFace cache directory
//! (`~/.cache/huggingface/hub` by default).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};
use serde::Deserialize;
use tracing::info;

use super::{
    onnx::OnnxSpeechModel,
    ModelLoader, SpeechModel,
};
use crate::device::Device;

/// Repository used when none is configured.
pub const DEFAULT_REPO: &str = "KittenML/kitten-tts-nano-0.8-int8";

fn default_sample_rate() -> u32 {
    24_000
}

fn default_encoder_rate() -> u32 {
    16_000
}

/// Deserialised `config.json` of a model repository.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    /// Must be `"ONNX1"` or `"ONNX2"`.
    #[serde(rename = "type")]
    pub model_type: String,

    /// Filename of the ONNX graph inside the repo.
    pub model_file: String,

    /// Filename of the voices NPZ inside the repo.
    pub voices: String,

    #[serde(default)]
    pub speed_priors: HashMap<String, f32>,

    /// Friendly-name → NPZ-key aliases.
    #[serde(default)]
    pub voice_aliases: HashMap<String, String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Voice used when the caller names none.
    #[serde(default)]
    pub default_voice: Option<String>,

    /// ONNX graph mapping reference audio to a style vector.
    #[serde(default)]
    pub speaker_encoder: Option<String>,

    #[serde(default = "default_encoder_rate")]
    pub speaker_encoder_sample_rate: u32,

    /// Generation parameters the graph accepts as scalar inputs.
    #[serde(default)]
    pub controls: Vec<String>,
}

impl ModelManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes).context("Failed to parse config.json")?;
        if !matches!(manifest.model_type.as_str(), "ONNX1" | "ONNX2") {
            bail!(
                "Unsupported model type '{}' (expected ONNX1 or ONNX2)",
                manifest.model_type
            );
        }
        Ok(manifest)
    }
}

/// Local paths of a fully downloaded model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub manifest: ModelManifest,
    pub model: PathBuf,
    pub voices: PathBuf,
    pub speaker_encoder: Option<PathBuf>,
}

/// Expand bare names (`kitten-tts-mini-0.8`) to `KittenML/<name>`.
pub fn normalize_repo_id(repo_id: &str) -> String {
    if repo_id.contains('/') {
        repo_id.to_string()
    } else {
        format!("KittenML/{repo_id}")
    }
}

fn fetch(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    repo.get(filename)
        .with_context(|| format!("Failed to download '{filename}' from '{repo_id}'"))
}

fn open_repo(repo_id: &str) -> Result<ApiRepo> {
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;
    Ok(api.model(repo_id.to_string()))
}

/// Download (or reuse from cache) and validate only the manifest.
pub fn fetch_manifest(repo_id: &str) -> Result<ModelManifest> {
    let repo_id = normalize_repo_id(repo_id);
    let repo = open_repo(&repo_id)?;
    read_manifest(&fetch(&repo, &repo_id, "config.json")?)
}

fn read_manifest(path: &Path) -> Result<ModelManifest> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;
    ModelManifest::parse(&bytes)
}

/// Download every file the manifest names.
pub fn fetch_model(repo_id: &str) -> Result<ModelFiles> {
    let repo_id = normalize_repo_id(repo_id);
    let repo = open_repo(&repo_id)?;

    info!(repo = %repo_id, "Resolving model manifest");
    let manifest = read_manifest(&fetch(&repo, &repo_id, "config.json")?)?;

    info!(file = %manifest.model_file, "Fetching model graph");
    let model = fetch(&repo, &repo_id, &manifest.model_file)?;

    info!(file = %manifest.voices, "Fetching voices");
    let voices = fetch(&repo, &repo_id, &manifest.voices)?;

    let speaker_encoder = match &manifest.speaker_encoder {
        Some(file) => {
            info!(file = %file, "Fetching speaker encoder");
            Some(fetch(&repo, &repo_id, file)?)
        }
        None => None,
    };

    Ok(ModelFiles { manifest, model, voices, speaker_encoder })
}

/// [`ModelLoader`] that pulls an ONNX model from the Hub.
#[derive(Debug, Clone)]
pub struct HubLoader {
    repo_id: String,
    voice: Option<String>,
}

impl HubLoader {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self { repo_id: normalize_repo_id(&repo_id.into()), voice: None }
    }

    /// Override the manifest's default voice.
    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }
}

impl Default for HubLoader {
    fn default() -> Self {
        Self::new(DEFAULT_REPO)
    }
}

impl ModelLoader for HubLoader {
    fn library_version(&self) -> String {
        super::onnx::library_version()
    }

    fn load(&self, device: Device) -> Result<Box<dyn SpeechModel>> {
        let files = fetch_model(&self.repo_id)?;
        let model = OnnxSpeechModel::load(&files, device, self.voice.as_deref())?;
        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_repo_id() {
        assert_eq!(normalize_repo_id("kitten-tts-mini-0.8"), "KittenML/kitten-tts-mini-0.8");
        assert_eq!(normalize_repo_id("acme/voice"), "acme/voice");
    }

    #[test]
    fn test_manifest_defaults() {
        let m = ModelManifest::parse(
            br#"{"type": "ONNX1", "model_file": "model.onnx", "voices": "voices.npz"}"#,
        )
        .unwrap();
        assert_eq!(m.sample_rate, 24_000);
        assert_eq!(m.speaker_encoder_sample_rate, 16_000);
        assert!(m.speaker_encoder.is_none());
        assert!(m.controls.is_empty());
    }

    #[test]
    fn test_manifest_full() {
        let m = ModelManifest::parse(
            br#"{
                "type": "ONNX2",
                "model_file": "model.onnx",
                "voices": "voices.npz",
                "voice_aliases": {"Jasper": "expr-voice-2-m"},
                "speaker_encoder": "speaker.onnx",
                "controls": ["exaggeration", "cfg_weight"]
            }"#,
        )
        .unwrap();
        assert_eq!(m.voice_aliases["Jasper"], "expr-voice-2-m");
        assert_eq!(m.speaker_encoder.as_deref(), Some("speaker.onnx"));
        assert_eq!(m.controls, vec!["exaggeration", "cfg_weight"]);
    }

    #[test]
    fn test_manifest_rejects_unknown_type() {
        let err = ModelManifest::parse(
            br#"{"type": "PT", "model_file": "m.pt", "voices": "v.npz"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported model type"));
    }
}
