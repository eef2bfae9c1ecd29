//! Server configuration: command-line flags with `SPEECH_GATEWAY_*`
//! environment fallbacks.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;

use crate::{device::Device, logging::LogFormat, model::hub::DEFAULT_REPO};

/// Text-to-speech HTTP gateway.
#[derive(Debug, Clone, Parser)]
#[command(name = "speech-gateway-server", author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Interface to bind.
    #[arg(long, env = "SPEECH_GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "SPEECH_GATEWAY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// HuggingFace repo of the pretrained model (bare names expand to KittenML/<name>).
    #[arg(short, long, env = "SPEECH_GATEWAY_MODEL", default_value = DEFAULT_REPO)]
    pub model: String,

    /// Force a device instead of probing for an accelerator.
    #[arg(long, env = "SPEECH_GATEWAY_DEVICE", value_enum)]
    pub device: Option<Device>,

    /// Built-in voice used when no reference audio is uploaded.
    #[arg(long, env = "SPEECH_GATEWAY_VOICE")]
    pub voice: Option<String>,

    /// Load the model on the first request instead of at startup.
    #[arg(long, env = "SPEECH_GATEWAY_LAZY_LOAD")]
    pub lazy_load: bool,

    /// Directory for uploaded reference audio (defaults to the OS temp dir).
    #[arg(long, env = "SPEECH_GATEWAY_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Allow cross-origin requests from any origin.
    #[arg(long, env = "SPEECH_GATEWAY_CORS")]
    pub cors: bool,

    /// Log level filter; `RUST_LOG` takes precedence.
    #[arg(short, long, env = "SPEECH_GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// `text` or `json`.
    #[arg(long, env = "SPEECH_GATEWAY_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl ServerArgs {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ServerArgs::try_parse_from(["speech-gateway-server"]).unwrap();
        assert_eq!(args.bind_addr().to_string(), "0.0.0.0:8000");
        assert_eq!(args.model, DEFAULT_REPO);
        assert_eq!(args.device, None);
        assert!(!args.lazy_load);
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.upload_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_flags() {
        let args = ServerArgs::try_parse_from([
            "speech-gateway-server",
            "--port",
            "9000",
            "--device",
            "coreml",
            "--lazy-load",
            "--upload-dir",
            "/srv/uploads",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.device, Some(Device::CoreMl));
        assert!(args.lazy_load);
        assert_eq!(args.upload_dir(), PathBuf::from("/srv/uploads"));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_unknown_device() {
        assert!(ServerArgs::try_parse_from(["speech-gateway-server", "--device", "tpu"]).is_err());
    }
}
