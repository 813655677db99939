use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::yolo::{
    Thresholds, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DETECTIONS,
};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_PERSON_CLASS_ID: u32 = 0;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const KNOWN_BACKENDS: [&str; 2] = ["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct DetectApiConfigFile {
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
    person_class_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DetectApiConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    /// Class the `/upload/` and `/camera/` routes restrict detection to.
    pub person_class_id: u32,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: String,
    pub path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub thresholds: Thresholds,
}

impl DetectApiConfig {
    /// Load from the optional file named by `DETECT_CONFIG`, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = env_non_empty("DETECT_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as [`DetectApiConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DetectApiConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectApiConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            person_class_id: api.person_class_id.unwrap_or(DEFAULT_PERSON_CLASS_ID),
            model: ModelSettings {
                backend: model
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                path: model.path,
                labels_path: model.labels_path,
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                thresholds: Thresholds {
                    confidence: model
                        .confidence_threshold
                        .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                    iou: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                    max_detections: model.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
                },
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("DETECT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = env_non_empty("DETECT_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(path) = env_non_empty("DETECT_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_non_empty("DETECT_LABELS_PATH") {
            self.model.labels_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_non_empty("DETECT_CONFIDENCE_THRESHOLD") {
            self.model.thresholds.confidence = value.parse().map_err(|_| {
                anyhow!("DETECT_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(value) = env_non_empty("DETECT_IOU_THRESHOLD") {
            self.model.thresholds.iou = value
                .parse()
                .map_err(|_| anyhow!("DETECT_IOU_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(value) = env_non_empty("DETECT_PERSON_CLASS_ID") {
            self.person_class_id = value
                .parse()
                .map_err(|_| anyhow!("DETECT_PERSON_CLASS_ID must be a non-negative integer"))?;
        }
        if let Some(value) = env_non_empty("DETECT_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = value
                .parse()
                .map_err(|_| anyhow!("DETECT_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.model.backend = self.model.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown backend '{}' (expected one of {:?})",
                self.model.backend,
                KNOWN_BACKENDS
            ));
        }
        if self.model.backend == "tract" && self.model.path.is_none() {
            return Err(anyhow!("the tract backend needs a model path"));
        }
        for (name, value) in [
            ("confidence threshold", self.model.thresholds.confidence),
            ("iou threshold", self.model.thresholds.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
            }
        }
        if self.model.thresholds.max_detections == 0 {
            return Err(anyhow!("max detections must be greater than zero"));
        }
        for (name, value) in [
            ("input width", self.model.input_width),
            ("input height", self.model.input_height),
        ] {
            if value == 0 || value % 32 != 0 {
                return Err(anyhow!(
                    "{} must be a positive multiple of 32, got {}",
                    name,
                    value
                ));
            }
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for DetectApiConfig {
    fn default() -> Self {
        Self::from_file(DetectApiConfigFile::default())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<DetectApiConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
