//! Object detection upload API.
//!
//! Accepts an uploaded image, runs a pretrained detector on it and returns
//! boxes and confidences as JSON.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB8 frames (pixels private, zeroized on drop)
//! - `detect`: backend seam, label table, YOLO post-processing and the
//!   `DetectionAdapter` that wraps raw model output into `Detection`s
//! - `select`: best-detection selection and response formatting
//! - `api`: blocking HTTP server in front of the pipeline
//! - `config`: file + environment configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod select;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

pub use detect::{
    BoxXywh, BoxXyxy, ClassFilter, Detection, DetectionAdapter, DetectorBackend, LabelMap,
    RawBoxes, StubBackend,
};
pub use error::DetectError;
pub use frame::Frame;
pub use select::{select, DetectionResult, SelectMode};

use crate::config::ModelSettings;
use crate::detect::BackendRegistry;

/// Decode an uploaded image, detect, and format the result.
///
/// Zero detections yield `DetectionResult::Empty`, never an error.
pub fn run_pipeline(
    image: &[u8],
    adapter: &DetectionAdapter,
    mode: SelectMode,
    class_filter: Option<&ClassFilter>,
) -> Result<DetectionResult, DetectError> {
    let frame = Frame::decode(image)?;
    let detections = adapter.detect(&frame, class_filter)?;
    Ok(select(&detections, mode))
}

/// Load the label table and the configured backend, warm it up and wrap
/// both into an adapter. The model is loaded once here and shared through
/// the adapter afterwards.
pub fn adapter_from_settings(settings: &ModelSettings) -> Result<DetectionAdapter> {
    let labels = match &settings.labels_path {
        Some(path) => LabelMap::from_file(path)?,
        None => LabelMap::coco(),
    };

    let mut registry = BackendRegistry::new();
    match settings.backend.as_str() {
        "stub" => registry.register(StubBackend::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("the tract backend needs a model path"))?;
            let backend = detect::TractBackend::new(
                path,
                settings.input_width,
                settings.input_height,
                labels.len(),
            )?
            .with_thresholds(settings.thresholds);
            registry.register(backend);
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(anyhow!(
                "the tract backend requires building with the `backend-tract` feature"
            ))
        }
        other => return Err(anyhow!("unknown backend '{}'", other)),
    }
    registry.set_default(&settings.backend)?;
    registry.warm_up_all()?;

    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no backend registered"))?;
    Ok(DetectionAdapter::new(backend, labels))
}

/// Adapter over a single backend, bypassing configuration.
pub fn adapter_with_backend<B: DetectorBackend + 'static>(
    backend: B,
    labels: LabelMap,
) -> DetectionAdapter {
    DetectionAdapter::new(Arc::new(Mutex::new(backend)), labels)
}
