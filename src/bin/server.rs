//! Speech gateway HTTP server.
//!
//! Usage:
//!   cargo run --release --bin speech-gateway-server
//!   cargo run --release --bin speech-gateway-server -- --port 9000 --device cpu --lazy-load
//!
//! Requirements:
//!   - espeak-ng on $PATH
//!   - Internet access for the first run (the model is cached afterwards)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use speech_gateway::{
    config::ServerArgs,
    gateway::Gateway,
    logging::init_logging,
    model::{hub::HubLoader, ModelHandle},
    server, Device,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(&args.log_level, args.log_format);

    let loader = HubLoader::new(&args.model).with_voice(args.voice.clone());
    let device = args.device.unwrap_or_else(Device::probe);
    info!(
        model = loader.repo_id(),
        device = %device,
        probed = args.device.is_none(),
        "Starting speech gateway"
    );
    let handle = Arc::new(ModelHandle::new(loader, device));

    if args.lazy_load {
        info!("Model will load on the first request");
    } else {
        let loading = Arc::clone(&handle);
        tokio::task::spawn_blocking(move || loading.ensure_loaded())
            .await
            .context("Model loading task panicked")?
            .context("Cannot start without a model")?;
    }

    let upload_dir = args.upload_dir();
    std::fs::create_dir_all(&upload_dir)
        .with_context(|| format!("Cannot create upload dir {}", upload_dir.display()))?;

    let gateway = Gateway::new(handle, upload_dir);
    server::serve(args.bind_addr(), server::app(gateway, args.cors)).await
}
