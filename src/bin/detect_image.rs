//! detect_image - run the detection pipeline on one image file and print
//! the JSON result the API would return.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use detect_api::{
    adapter_from_settings, config::DetectApiConfig, detect::parse_class_filter, run_pipeline,
    SelectMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image file (JPEG or PNG).
    #[arg(long)]
    image: PathBuf,
    /// Output mode (summary|detailed).
    #[arg(long, default_value = "detailed")]
    mode: SelectMode,
    /// Comma-separated class ids or names to keep, e.g. `0,car`.
    #[arg(long)]
    classes: Option<String>,
    /// Config file (.toml or .json). Falls back to DETECT_CONFIG.
    #[arg(long, env = "DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = DetectApiConfig::load_from(args.config.as_deref())?;
    let adapter = adapter_from_settings(&config.model)?;
    let filter = args
        .classes
        .as_deref()
        .map(|spec| parse_class_filter(spec, adapter.labels()))
        .transpose()?;

    let bytes = std::fs::read(&args.image)
        .map_err(|e| anyhow!("failed to read image {}: {}", args.image.display(), e))?;
    let result = run_pipeline(&bytes, &adapter, args.mode, filter.as_ref())?;
    log::info!("{} qualifying detections", result.count());

    let out = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", out);
    Ok(())
}
