//! # speech-gateway
//!
//! An HTTP gateway and browser UI around a pretrained ONNX text-to-speech
//! model, with optional voice cloning from uploaded reference audio.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use speech_gateway::{gateway::Gateway, model::{hub::HubLoader, ModelHandle}, server};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let handle = Arc::new(ModelHandle::with_probed_device(HubLoader::default()));
//! handle.ensure_loaded()?;
//!
//! let gateway = Gateway::new(handle, std::env::temp_dir());
//! server::serve("0.0.0.0:8000".parse()?, server::app(gateway, false)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//! 1. **Model handle** ([`model`]): one lazily loaded [`model::SpeechModel`]
//!    per process, bound to the device probed at startup. Calls are serialized.
//! 2. **Gateway** ([`gateway`]): validation, blocking generation, WAV and
//!    base64 encoding, scoped temp files for reference audio.
//! 3. **Transport** ([`server`]): axum routes; errors become
//!    `{"detail": ...}` with a 400 or 500 status.
//! 4. **Clients**: the page under `ui/` (served at `/ui`) and [`client`].
//!
//! ## Built-in model pipeline
//! Text is chunked by sentence, phonemised by `espeak-ng`, mapped to token
//! ids and run through the ONNX graph with a style vector taken from the
//! voices archive or, for cloning, from a speaker-encoder graph.

pub mod audio;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod params;
pub mod phonemize;
pub mod server;
pub mod setup;
pub mod tokenize;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use device::Device;
pub use error::{GatewayError, ModelError};
pub use model::{ModelHandle, ModelLoader, SpeechModel, Waveform};
pub use params::GenerationParams;
