//! ONNX Runtime backend for [`SpeechModel`].
//!
//! The acoustic model and vocoder live entirely inside the pretrained graph;
//! this module only prepares its inputs. The graph inputs are:
//!
//! | Name        | Shape          | dtype   |
//! |-------------|----------------|---------|
//! | `input_ids` | `[1, seq_len]` | int64   |
//! | `style`     | `[1, style_d]` | float32 |
//! | `speed`     | `[1]`          | float32 |
//!
//! plus one `[1]` float32 input per name listed in the manifest's
//! `controls`, fed from [`GenerationParams`].

use std::{borrow::Cow, path::Path};

use anyhow::{anyhow, ensure, Context, Result};
use ort::{
    ep,
    session::{Session, SessionInputValue},
    value::Tensor,
};
use tracing::debug;

use super::{hub::ModelFiles, voices::VoiceTable, SpeechModel};
use crate::{
    audio,
    device::Device,
    error::ModelError,
    params::GenerationParams,
    phonemize::{Espeak, Phonemizer},
    tokenize,
};

/// ONNX Runtime binding version, pinned in `Cargo.toml`.
const ORT_BINDING_VERSION: &str = "2.0.0-rc.11";

/// Samples dropped from the end of every chunk (trailing artifact).
const TAIL_TRIM: usize = 5_000;

/// Longest text chunk passed to the graph in one run.
const CHUNK_MAX_CHARS: usize = 400;

pub fn library_version() -> String {
    format!("onnxruntime (ort {ORT_BINDING_VERSION})")
}

// ─────────────────────────────────────────────────────────────────────────────
// Text chunker
// ─────────────────────────────────────────────────────────────────────────────

/// Append a comma unless the text already ends in punctuation.
fn ensure_punctuation(text: &str) -> String {
    let text = text.trim();
    match text.chars().last() {
        None => String::new(),
        Some(c) if ".!?,;:".contains(c) => text.to_string(),
        Some(_) => format!("{text},"),
    }
}

/// Split on sentence terminators, then on word boundaries for sentences
/// longer than `max_len`.
fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    for sentence in text.split_terminator(['.', '!', '?']).map(str::trim) {
        if sentence.is_empty() {
            continue;
        }
        if sentence.len() <= max_len {
            chunks.push(ensure_punctuation(sentence));
            continue;
        }
        let mut current = String::new();
        for word in sentence.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > max_len {
                chunks.push(ensure_punctuation(&current));
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(ensure_punctuation(&current));
        }
    }
    chunks
}

/// Chunks to synthesize for a request. Text with no sentence content, such
/// as bare punctuation, runs as a single chunk so espeak-ng decides what it
/// sounds like.
fn speakable_chunks(text: &str) -> Vec<String> {
    let chunks = chunk_text(text, CHUNK_MAX_CHARS);
    if chunks.is_empty() && !text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }
    chunks
}

/// Scalar control inputs for the graph: the declared names that match a
/// generation parameter, with that parameter's value.
fn control_values<'a>(controls: &'a [String], params: &GenerationParams) -> Vec<(&'a str, f32)> {
    controls
        .iter()
        .filter_map(|name| params.get(name).map(|v| (name.as_str(), v)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

fn build_session(path: &Path, device: Device) -> Result<Session> {
    let providers = match device {
        Device::Cuda => vec![ep::CUDA::default().build().error_on_failure()],
        Device::CoreMl => vec![ep::CoreML::default().build().error_on_failure()],
        Device::Cpu => Vec::new(),
    };
    Session::builder()
        .context("Cannot create an ONNX Runtime session builder")?
        .with_execution_providers(providers)
        .map_err(|e| anyhow!("Cannot enable the {device} execution provider: {e}"))?
        .commit_from_file(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))
}

/// Where the style vector for a request comes from.
enum Style {
    Voice(String),
    Reference(Vec<f32>),
}

struct SpeakerEncoder {
    session: Session,
    sample_rate: u32,
}

impl SpeakerEncoder {
    fn embed(&mut self, path: &Path) -> Result<Vec<f32>> {
        let (samples, rate) = audio::decode_file(path)?;
        let samples = audio::resample(&samples, rate, self.sample_rate)?;
        debug!(samples = samples.len(), "Encoding reference voice");

        let input = Tensor::<f32>::from_array(([1usize, samples.len()], samples))
            .context("Failed to build reference audio tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("Speaker encoder failed")?;
        let (_shape, embedding) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract speaker embedding")?;
        Ok(embedding.to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// A pretrained ONNX text-to-speech model.
pub struct OnnxSpeechModel {
    session: Session,
    encoder: Option<SpeakerEncoder>,
    voices: VoiceTable,
    voice: String,
    phonemizer: Box<dyn Phonemizer>,
    controls: Vec<String>,
    sample_rate: u32,
}

impl OnnxSpeechModel {
    /// Open the graphs in `files` on `device`.
    ///
    /// `voice` overrides the manifest's default voice; without either, the
    /// first voice in the archive is used.
    pub fn load(files: &ModelFiles, device: Device, voice: Option<&str>) -> Result<Self> {
        let manifest = &files.manifest;
        let session = build_session(&files.model, device)?;

        let encoder = match &files.speaker_encoder {
            Some(path) => Some(SpeakerEncoder {
                session: build_session(path, device)?,
                sample_rate: manifest.speaker_encoder_sample_rate,
            }),
            None => None,
        };

        let voices = VoiceTable::load_npz(&files.voices)?.with_aliases(
            manifest.voice_aliases.clone(),
            manifest.speed_priors.clone(),
        );
        let voice = voice
            .map(str::to_string)
            .or_else(|| manifest.default_voice.clone())
            .or_else(|| voices.names().next().map(str::to_string))
            .context("Model ships no voices")?;
        voices.get(&voice)?;

        let phonemizer = Box::new(Espeak::locate()?);

        Ok(Self {
            session,
            encoder,
            voices,
            voice,
            phonemizer,
            controls: manifest.controls.clone(),
            sample_rate: manifest.sample_rate,
        })
    }

    /// Style vector for a reference clip, computed by the speaker encoder.
    fn reference_style(&mut self, path: &Path) -> Result<Vec<f32>, ModelError> {
        let encoder = self.encoder.as_mut().ok_or(ModelError::VoicePromptUnsupported)?;
        let style = encoder.embed(path).map_err(ModelError::Generation)?;

        let expected = self.voices.get(&self.voice).map_err(ModelError::Generation)?.dim();
        if style.len() != expected {
            return Err(ModelError::Generation(anyhow::anyhow!(
                "speaker embedding has {} values, model expects {expected}",
                style.len()
            )));
        }
        Ok(style)
    }

    /// One graph run: a text chunk → audio samples.
    fn infer_chunk(&mut self, chunk: &str, style: &Style, params: &GenerationParams) -> Result<Vec<f32>> {
        let ipa = self
            .phonemizer
            .phonemize(chunk)
            .with_context(|| format!("Phonemisation failed for {chunk:?}"))?;
        let ids = tokenize::encode(&ipa);
        let seq_len = ids.len();

        let (style_row, speed) = match style {
            Style::Voice(name) => (
                self.voices.get(name)?.row(chunk.len()).to_vec(),
                self.voices.speed_prior(name),
            ),
            Style::Reference(v) => (v.clone(), 1.0),
        };
        let style_dim = style_row.len();

        let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = ort::inputs! {
            "input_ids" => Tensor::<i64>::from_array(([1usize, seq_len], ids))
                .context("Failed to build input_ids tensor")?,
            "style" => Tensor::<f32>::from_array(([1usize, style_dim], style_row))
                .context("Failed to build style tensor")?,
            "speed" => Tensor::<f32>::from_array(([1usize], vec![speed]))
                .context("Failed to build speed tensor")?
        };
        for (name, value) in control_values(&self.controls, params) {
            let tensor = Tensor::<f32>::from_array(([1usize], vec![value]))
                .with_context(|| format!("Failed to build {name} tensor"))?;
            inputs.push((Cow::Owned(name.to_string()), tensor.into()));
        }

        let outputs = self.session.run(inputs).context("ONNX inference failed")?;
        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Model output is not an f32 waveform")?;

        let keep = audio.len().saturating_sub(TAIL_TRIM);
        Ok(audio[..keep].to_vec())
    }
}

impl SpeechModel for OnnxSpeechModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(
        &mut self,
        text: &str,
        params: &GenerationParams,
        voice_prompt: Option<&Path>,
    ) -> Result<Vec<f32>, ModelError> {
        let style = match voice_prompt {
            Some(path) => Style::Reference(self.reference_style(path)?),
            None => Style::Voice(self.voice.clone()),
        };

        let chunks = speakable_chunks(text);
        debug!(chunks = chunks.len(), voice = %self.voice, "Running ONNX inference");

        let mut samples = Vec::new();
        for chunk in &chunks {
            let audio = self
                .infer_chunk(chunk, &style, params)
                .map_err(ModelError::Generation)?;
            samples.extend(audio);
        }
        if samples.is_empty() {
            debug!(text_len = text.len(), "Graph output shorter than the tail trim; returning silence");
        }
        ensure_finite(&samples).map_err(ModelError::Generation)?;
        Ok(samples)
    }
}

fn ensure_finite(samples: &[f32]) -> Result<()> {
    ensure!(samples.iter().all(|s| s.is_finite()), "model produced non-finite samples");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_short() {
        assert_eq!(chunk_text("Hello world.", 400), vec!["Hello world,"]);
    }

    #[test]
    fn test_chunk_keeps_inner_punctuation() {
        assert_eq!(chunk_text("Well, hi! Bye?", 400), vec!["Well, hi,", "Bye,"]);
    }

    #[test]
    fn test_chunk_splits_on_word_boundaries() {
        let long = "word ".repeat(200);
        let chunks = chunk_text(long.trim(), 400);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 401), "{chunks:?}");
    }

    #[test]
    fn test_chunk_only_terminators() {
        assert!(chunk_text("...!?", 400).is_empty());
    }

    #[test]
    fn test_punctuation_only_text_runs_as_one_chunk() {
        assert_eq!(speakable_chunks("..."), vec!["..."]);
        assert_eq!(speakable_chunks(" ?! "), vec!["?!"]);
        assert_eq!(speakable_chunks("!"), vec!["!"]);
        assert_eq!(speakable_chunks("Hi. There!"), vec!["Hi,", "There,"]);
        assert!(speakable_chunks("   ").is_empty());
    }

    #[test]
    fn test_terminal_punctuation_added_once() {
        assert_eq!(ensure_punctuation("hello"), "hello,");
        assert_eq!(ensure_punctuation(" hello; "), "hello;");
        assert_eq!(ensure_punctuation(""), "");
    }

    #[test]
    fn test_control_values_filters_unknown_names() {
        let controls = vec!["cfg_weight".to_string(), "pitch".to_string(), "top_p".to_string()];
        let params = GenerationParams { top_p: 0.9, ..Default::default() };
        assert_eq!(
            control_values(&controls, &params),
            vec![("cfg_weight", 0.5), ("top_p", 0.9)]
        );
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[0.0, 0.1]).is_ok());
        assert!(ensure_finite(&[0.0, f32::INFINITY]).is_err());
    }

    #[test]
    fn test_library_version_names_binding() {
        assert!(library_version().contains(ORT_BINDING_VERSION));
    }
}
