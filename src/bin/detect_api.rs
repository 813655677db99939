//! detect_api - HTTP upload service for object detection
//!
//! This daemon:
//! 1. Loads configuration (DETECT_CONFIG file + DETECT_* overrides)
//! 2. Loads the detector once and warms it up
//! 3. Serves `/`, `/upload/`, `/camera/`, `/detect` and `/health`

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use detect_api::{
    adapter_from_settings,
    api::{ApiConfig, ApiServer},
    config::DetectApiConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DetectApiConfig::load()?;
    let adapter = adapter_from_settings(&config.model)?;
    log::info!(
        "loaded {} backend with {} labels",
        adapter.backend_name(),
        adapter.labels().len()
    );

    let api_handle = ApiServer::new(ApiConfig::from(&config), Arc::new(adapter)).spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("detect_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
