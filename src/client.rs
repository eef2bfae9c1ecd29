//! HTTP client for a running gateway, used by `speech-gateway-client`.
//!
//! Mirrors what the browser page does: a short health probe, long-running
//! synthesis calls, and timestamped output file names.

use std::{path::Path, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    gateway::SynthesisResponse,
    params::{validate_text, GenerationParams},
};

pub const DEFAULT_URL: &str = "http://localhost:8000";

/// Timeout of the health probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of a synthesis call; CPU generation can take minutes.
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request timed out after {}s. Generation may still be running on the server.", .0.as_secs())]
    Timeout(Duration),

    #[error("Cannot connect to the API server at {url}. Is it running?")]
    Connection { url: String },

    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("{0}")]
    Invalid(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    fn from_reqwest(err: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connection { url: url.to_string() }
        } else {
            Self::Http(err)
        }
    }
}

/// Turn an error response body into [`ClientError::Server`], preferring the
/// `detail` field of a JSON body.
fn server_error(status: StatusCode, body: &str) -> ClientError {
    #[derive(Deserialize)]
    struct Detail {
        detail: String,
    }
    let detail = serde_json::from_str::<Detail>(body)
        .map(|d| d.detail)
        .unwrap_or_else(|_| body.trim().to_string());
    ClientError::Server {
        status: status.as_u16(),
        detail,
    }
}

/// What `/health` reports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    pub device: String,
    pub library_version: String,
}

impl ServerHealth {
    pub fn is_ready(&self) -> bool {
        self.status == "healthy"
    }
}

/// Which endpoint produced a file; decides its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Speech,
    VoiceClone,
}

/// `tts_<unix>.wav` or `voice_clone_<unix>.wav`.
pub fn output_filename(kind: OutputKind, unix_secs: i64) -> String {
    let prefix = match kind {
        OutputKind::Speech => "tts",
        OutputKind::VoiceClone => "voice_clone",
    };
    format!("{prefix}_{unix_secs}.wav")
}

pub fn timestamped_filename(kind: OutputKind) -> String {
    output_filename(kind, chrono::Utc::now().timestamp())
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    http: Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("speech-gateway-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Http)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.base_url, timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(server_error(status, &body))
    }

    pub async fn health(&self) -> Result<ServerHealth, ClientError> {
        let response = self
            .send(self.http.get(self.url("/health")), HEALTH_TIMEOUT)
            .await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Synthesize with the model's voice; returns WAV bytes.
    pub async fn synthesize(&self, text: &str, params: &GenerationParams) -> Result<Vec<u8>, ClientError> {
        validate_text(text).map_err(|e| ClientError::Invalid(e.to_string()))?;

        let mut body = serde_json::to_value(params).map_err(|e| ClientError::Invalid(e.to_string()))?;
        body["text"] = text.into();
        debug!(chars = text.chars().count(), "POST /synthesize");

        let response = self
            .send(self.http.post(self.url("/synthesize")).json(&body), SYNTHESIS_TIMEOUT)
            .await?;
        let envelope: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        STANDARD
            .decode(envelope.audio_base64)
            .map_err(|e| ClientError::Decode(format!("audio_base64: {e}")))
    }

    /// Synthesize imitating the voice in `voice_file`; returns WAV bytes.
    pub async fn synthesize_with_voice(
        &self,
        text: &str,
        params: &GenerationParams,
        voice_file: &Path,
    ) -> Result<Vec<u8>, ClientError> {
        validate_text(text).map_err(|e| ClientError::Invalid(e.to_string()))?;

        let filename = voice_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Invalid(format!("not a file: {}", voice_file.display())))?
            .to_string();
        let data = tokio::fs::read(voice_file).await?;
        debug!(file = %filename, bytes = data.len(), "POST /synthesize_with_voice");

        let mut form = multipart::Form::new()
            .text("text", text.to_string())
            .part("voice_file", multipart::Part::bytes(data).file_name(filename));
        for (name, value) in GenerationParams::NAMES.iter().zip(params.values()) {
            form = form.text(*name, value.to_string());
        }

        let response = self
            .send(
                self.http.post(self.url("/synthesize_with_voice")).multipart(form),
                SYNTHESIS_TIMEOUT,
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.base_url, SYNTHESIS_TIMEOUT))?;
        Ok(bytes.to_vec())
    }
}
