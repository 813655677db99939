use std::collections::BTreeSet;

use anyhow::{anyhow, Result};

use crate::detect::labels::LabelMap;
use crate::detect::registry::SharedBackend;
use crate::detect::result::{BoxXyxy, Detection, RawBoxes};
use crate::error::DetectError;
use crate::frame::Frame;

/// Allow-list of class ids. `None` in place of a filter admits every class.
pub type ClassFilter = BTreeSet<u32>;

/// Parse a comma-separated class list. Entries may be ids (`0`) or label
/// names (`person`).
pub fn parse_class_filter(spec: &str, labels: &LabelMap) -> Result<ClassFilter> {
    let mut filter = ClassFilter::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let class_id = match entry.parse::<u32>() {
            Ok(id) => id,
            Err(_) => labels
                .find(entry)
                .ok_or_else(|| anyhow!("unknown class '{}'", entry))?,
        };
        if class_id as usize >= labels.len() {
            return Err(anyhow!(
                "class id {} is out of range for {} labels",
                class_id,
                labels.len()
            ));
        }
        filter.insert(class_id);
    }
    if filter.is_empty() {
        return Err(anyhow!("class filter must name at least one class"));
    }
    Ok(filter)
}

/// Runs the shared model on frames and wraps its raw output into
/// `Detection` values.
pub struct DetectionAdapter {
    backend: SharedBackend,
    backend_name: &'static str,
    labels: LabelMap,
}

impl DetectionAdapter {
    pub fn new(backend: SharedBackend, labels: LabelMap) -> Self {
        let backend_name = backend
            .lock()
            .map(|guard| guard.name())
            .unwrap_or("unavailable");
        Self {
            backend,
            backend_name,
            labels,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Detect objects on a frame, keeping only classes in `class_filter`.
    ///
    /// Holds the backend lock only for the inference call itself.
    pub fn detect(
        &self,
        frame: &Frame,
        class_filter: Option<&ClassFilter>,
    ) -> Result<Vec<Detection>, DetectError> {
        let raw = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| DetectError::inference("backend lock poisoned"))?;
            frame
                .run_backend(&mut *backend)
                .map_err(|err| DetectError::InferenceFailure(format!("{:#}", err)))?
        };

        let Some(raw) = raw else {
            log::debug!("{}: no box data returned", self.backend_name);
            return Ok(Vec::new());
        };
        let detections = wrap_raw_boxes(&raw, &self.labels, frame.size(), class_filter)?;
        log::debug!(
            "{}: {} raw boxes, {} kept",
            self.backend_name,
            raw.len(),
            detections.len()
        );
        Ok(detections)
    }
}

/// Convert parallel raw arrays into `Detection`s, in backend order.
pub fn wrap_raw_boxes(
    raw: &RawBoxes,
    labels: &LabelMap,
    image_size: Option<(u32, u32)>,
    class_filter: Option<&ClassFilter>,
) -> Result<Vec<Detection>, DetectError> {
    let count = raw.xyxy.len();
    if raw.class_ids.len() != count || raw.confidences.len() != count {
        return Err(DetectError::InferenceFailure(format!(
            "mismatched box arrays: {} classes, {} confidences, {} boxes",
            raw.class_ids.len(),
            raw.confidences.len(),
            count
        )));
    }

    let mut detections = Vec::with_capacity(count);
    for ((&class_id, &confidence), &coords) in raw
        .class_ids
        .iter()
        .zip(&raw.confidences)
        .zip(&raw.xyxy)
    {
        if let Some(filter) = class_filter {
            if !filter.contains(&class_id) {
                continue;
            }
        }
        if !confidence.is_finite() || !coords.iter().all(|v| v.is_finite()) {
            return Err(DetectError::inference(
                "model returned a non-finite box or confidence",
            ));
        }
        let class_name = labels.name(class_id)?;
        detections.push(Detection::new(
            class_id,
            class_name,
            confidence.clamp(0.0, 1.0),
            BoxXyxy::from_array(coords),
            image_size,
        ));
    }
    Ok(detections)
}
