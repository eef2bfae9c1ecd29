//! Error types for the model handle and the synthesis gateway.
//!
//! Client-input problems and server-side failures are separate variants so
//! the HTTP layer can map them to status codes in one place
//! ([`crate::server`]).

use thiserror::Error;

/// Failures raised by the [`ModelHandle`](crate::model::ModelHandle).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Loading the pretrained model failed.
    #[error("model failed to load: {0:#}")]
    Load(anyhow::Error),

    /// The model raised while generating audio.
    #[error("{0:#}")]
    Generation(anyhow::Error),

    /// A voice reference was supplied to a model without a speaker encoder.
    #[error("this model cannot clone voices from reference audio")]
    VoicePromptUnsupported,
}

/// Failures of a single gateway operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Text cannot be empty")]
    EmptyText,

    #[error("Text too long (max {max} characters)")]
    TextTooLong { max: usize, len: usize },

    #[error("{name} must be between {min} and {max} (got {value})")]
    ParameterOutOfRange {
        name: &'static str,
        min: f32,
        max: f32,
        value: f32,
    },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidParameter { name: String, value: String },

    #[error("Voice file must be audio format (wav, mp3, flac, m4a)")]
    UnsupportedVoiceFile { filename: String },

    #[error("voice_file is required")]
    MissingVoiceFile,

    #[error("Invalid multipart request: {0}")]
    Multipart(String),

    #[error("Invalid audio data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Synthesis failed: {0}")]
    Model(#[from] ModelError),

    #[error("Synthesis failed: could not encode audio: {0:#}")]
    Encoding(anyhow::Error),

    #[error("Synthesis failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Synthesis failed: generation task aborted: {0}")]
    Join(String),
}

impl GatewayError {
    /// `true` when the request itself was at fault (a 400-class response).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyText
                | Self::TextTooLong { .. }
                | Self::ParameterOutOfRange { .. }
                | Self::InvalidParameter { .. }
                | Self::UnsupportedVoiceFile { .. }
                | Self::MissingVoiceFile
                | Self::Multipart(_)
                | Self::InvalidBase64(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(GatewayError::EmptyText.is_client_error());
        assert!(GatewayError::TextTooLong { max: 500, len: 501 }.is_client_error());
        assert!(GatewayError::MissingVoiceFile.is_client_error());
        assert!(!GatewayError::Model(ModelError::VoicePromptUnsupported).is_client_error());
        assert!(!GatewayError::Join("cancelled".into()).is_client_error());
    }

    #[test]
    fn test_messages_carry_underlying_cause() {
        let err = GatewayError::Model(ModelError::Generation(anyhow::anyhow!("CUDA out of memory")));
        assert_eq!(err.to_string(), "Synthesis failed: CUDA out of memory");

        let err = GatewayError::TextTooLong { max: 500, len: 900 };
        assert_eq!(err.to_string(), "Text too long (max 500 characters)");
    }
}
