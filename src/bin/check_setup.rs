//! Verify that this machine can build and run the speech gateway.
//!
//! Usage:
//!   cargo run --bin check-setup
//!   cargo run --bin check-setup -- --model KittenML/kitten-tts-mini-0.8

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use speech_gateway::{
    model::hub::DEFAULT_REPO,
    setup::{checks, run_checks, SetupContext},
};

#[derive(Debug, Parser)]
#[command(name = "check-setup", author, version, about, long_about = None)]
struct Args {
    /// Repository the server will load.
    #[arg(long, env = "SPEECH_GATEWAY_MODEL", default_value = DEFAULT_REPO)]
    model: String,

    /// Checkout to inspect for project files.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = SetupContext {
        project_root: args.project_root,
        model_repo: args.model,
    };

    let summary = run_checks(&checks(), &ctx, &mut std::io::stdout().lock())?;
    if !summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
