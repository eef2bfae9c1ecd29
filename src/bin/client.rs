//! Command-line client for a running speech gateway.
//!
//! Usage:
//!   cargo run --bin speech-gateway-client -- "Hello from Rust!"
//!   cargo run --bin speech-gateway-client -- --voice-file me.wav --temperature 0.6 "Hello again"
//!   cargo run --bin speech-gateway-client -- --health

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use speech_gateway::{
    client::{timestamped_filename, ClientError, GatewayClient, OutputKind, DEFAULT_URL},
    logging::{init_logging, LogFormat},
    params, GenerationParams,
};

/// Synthesize speech through a speech gateway server.
#[derive(Debug, Parser)]
#[command(name = "speech-gateway-client", author, version, about, long_about = None)]
struct Args {
    /// Text to speak (at most 500 characters).
    #[arg(required_unless_present = "health")]
    text: Option<String>,

    /// Gateway base URL.
    #[arg(long, env = "SPEECH_GATEWAY_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Reference audio to clone the voice from (wav, mp3, flac, m4a).
    #[arg(long)]
    voice_file: Option<PathBuf>,

    /// Output file; defaults to tts_<unix>.wav / voice_clone_<unix>.wav.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only print the server's health report.
    #[arg(long)]
    health: bool,

    #[arg(long, default_value_t = 0.5)]
    exaggeration: f32,
    #[arg(long, default_value_t = 0.5)]
    cfg_weight: f32,
    #[arg(long, default_value_t = 0.8)]
    temperature: f32,
    #[arg(long, default_value_t = 1.2)]
    repetition_penalty: f32,
    #[arg(long, default_value_t = 0.05)]
    min_p: f32,
    #[arg(long, default_value_t = 1.0)]
    top_p: f32,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            exaggeration: self.exaggeration,
            cfg_weight: self.cfg_weight,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            min_p: self.min_p,
            top_p: self.top_p,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, LogFormat::Text);

    let client = GatewayClient::new(&args.url)?;

    match client.health().await {
        Ok(h) => {
            println!("🟢 API server: {} (device: {}, {})", h.status, h.device, h.library_version);
            if args.health {
                return Ok(());
            }
        }
        Err(e) => {
            println!("🔴 {e}");
            if args.health || matches!(e, ClientError::Connection { .. }) {
                std::process::exit(1);
            }
        }
    }

    let Some(text) = args.text.as_deref() else {
        bail!("no text given");
    };
    let params = args.params();
    params.validate()?;
    params::validate_text(text)?;

    println!("🎵 Generating speech... This may take a few minutes on CPU.");
    let (wav, kind) = match &args.voice_file {
        Some(path) => (
            client.synthesize_with_voice(text, &params, path).await,
            OutputKind::VoiceClone,
        ),
        None => (client.synthesize(text, &params).await, OutputKind::Speech),
    };
    let wav = match wav {
        Ok(wav) => wav,
        Err(e) => {
            println!("❌ {e}");
            std::process::exit(1);
        }
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(timestamped_filename(kind)));
    std::fs::write(&output, &wav)?;
    println!("✅ Speech generated: {} ({} bytes)", output.display(), wav.len());
    Ok(())
}
