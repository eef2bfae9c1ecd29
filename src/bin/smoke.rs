//! Load the model once and synthesize a fixed sentence to `test_output.wav`.
//!
//! Usage:
//!   cargo run --release --bin smoke-test
//!   cargo run --release --bin smoke-test -- --model KittenML/kitten-tts-mini-0.8

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use speech_gateway::{
    audio::encode_wav,
    logging::{init_logging, LogFormat},
    model::{
        hub::{HubLoader, DEFAULT_REPO},
        ModelHandle,
    },
    GenerationParams,
};

const TEXT: &str = "Hello, this is a test of the speech gateway running locally!";

#[derive(Debug, Parser)]
#[command(name = "smoke-test", author, version, about, long_about = None)]
struct Args {
    #[arg(long, env = "SPEECH_GATEWAY_MODEL", default_value = DEFAULT_REPO)]
    model: String,

    #[arg(short, long, default_value = "test_output.wav")]
    output: PathBuf,
}

fn run(args: &Args) -> Result<()> {
    let handle = ModelHandle::with_probed_device(HubLoader::new(&args.model));
    println!("Using device: {}", handle.device());

    println!("Loading model...");
    handle.ensure_loaded()?;
    println!("Model loaded successfully!");

    println!("Generating speech for: {TEXT}");
    let waveform = handle.generate(TEXT, &GenerationParams::default(), None)?;
    println!("Generated audio with {} samples", waveform.samples.len());
    println!("Sample rate: {}", waveform.sample_rate);

    let wav = encode_wav(&waveform.samples, waveform.sample_rate)?;
    std::fs::write(&args.output, wav)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;
    println!("Audio saved to: {}", args.output.display());
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging("warn", LogFormat::Text);

    match run(&args) {
        Ok(()) => println!("✅ TTS test completed successfully!"),
        Err(e) => {
            println!("Error: {e:#}");
            println!("❌ TTS test failed!");
            std::process::exit(1);
        }
    }
}
