//! Turns a list of detections into the response payload.
//!
//! `select` is pure: it reads the detections, picks the best one (highest
//! confidence, first occurrence on ties) and builds either a classification
//! style summary or the detailed listing with rounded coordinates.

use std::str::FromStr;

use anyhow::anyhow;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::detect::{BoxXywh, BoxXyxy, Detection};

/// Decimal places for box coordinates in responses.
pub const COORD_DECIMALS: i32 = 2;
/// Decimal places for confidences in responses.
pub const CONFIDENCE_DECIMALS: i32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectMode {
    /// Best class name, confidence and count.
    Summary,
    /// Best position plus the full rounded listing.
    #[default]
    Detailed,
}

impl FromStr for SelectMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(SelectMode::Summary),
            "detailed" => Ok(SelectMode::Detailed),
            other => Err(anyhow!(
                "unknown mode '{}' (expected 'summary' or 'detailed')",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct XyxyOut {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct XywhOut {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Position {
    pub xyxy: XyxyOut,
    pub xywh: XywhOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xyxyn: Option<XyxyOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xywhn: Option<XywhOut>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundedDetection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f64,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub classification: String,
    pub class_name: String,
    pub confidence: f64,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detailed {
    pub position: Position,
    pub confidence: f64,
    pub count: usize,
    pub all_people: Vec<RoundedDetection>,
}

/// Formatted response for one request.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionResult {
    /// No qualifying detections. Serializes as `{"count":0,"all_people":[]}`.
    Empty,
    Summary(Summary),
    Detailed(Detailed),
}

impl DetectionResult {
    pub fn count(&self) -> usize {
        match self {
            DetectionResult::Empty => 0,
            DetectionResult::Summary(summary) => summary.count,
            DetectionResult::Detailed(detailed) => detailed.count,
        }
    }
}

impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DetectionResult::Empty => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("count", &0usize)?;
                map.serialize_entry("all_people", &Vec::<RoundedDetection>::new())?;
                map.end()
            }
            DetectionResult::Summary(summary) => summary.serialize(serializer),
            DetectionResult::Detailed(detailed) => detailed.serialize(serializer),
        }
    }
}

/// Highest-confidence detection and its index. Ties go to the earliest entry.
pub fn best(detections: &[Detection]) -> Option<(usize, &Detection)> {
    let mut iter = detections.iter().enumerate();
    let mut best = iter.next()?;
    for candidate in iter {
        if candidate.1.confidence() > best.1.confidence() {
            best = candidate;
        }
    }
    Some(best)
}

pub fn select(detections: &[Detection], mode: SelectMode) -> DetectionResult {
    let Some((_, top)) = best(detections) else {
        return DetectionResult::Empty;
    };
    match mode {
        SelectMode::Summary => DetectionResult::Summary(Summary {
            classification: format!(
                "Class: {}, Confidence: {:.2}",
                top.class_name(),
                top.confidence()
            ),
            class_name: top.class_name().to_string(),
            confidence: round_to(top.confidence(), CONFIDENCE_DECIMALS),
            count: detections.len(),
        }),
        SelectMode::Detailed => DetectionResult::Detailed(Detailed {
            position: position(top),
            confidence: round_to(top.confidence(), CONFIDENCE_DECIMALS),
            count: detections.len(),
            all_people: detections.iter().map(rounded).collect(),
        }),
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f32, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (f64::from(value) * factor).round() / factor
}

fn rounded(detection: &Detection) -> RoundedDetection {
    RoundedDetection {
        class_id: detection.class_id(),
        class_name: detection.class_name().to_string(),
        confidence: round_to(detection.confidence(), CONFIDENCE_DECIMALS),
        position: position(detection),
    }
}

fn position(detection: &Detection) -> Position {
    // Normalized encodings are reported as a pair or not at all.
    let normalized = match (detection.box_xyxyn(), detection.box_xywhn()) {
        (Some(xyxyn), Some(xywhn)) => Some((xyxy_out(xyxyn), xywh_out(xywhn))),
        _ => None,
    };
    Position {
        xyxy: xyxy_out(detection.box_xyxy()),
        xywh: xywh_out(detection.box_xywh()),
        xyxyn: normalized.map(|(xyxyn, _)| xyxyn),
        xywhn: normalized.map(|(_, xywhn)| xywhn),
    }
}

fn xyxy_out(b: BoxXyxy) -> XyxyOut {
    XyxyOut {
        x1: round_to(b.x1, COORD_DECIMALS),
        y1: round_to(b.y1, COORD_DECIMALS),
        x2: round_to(b.x2, COORD_DECIMALS),
        y2: round_to(b.y2, COORD_DECIMALS),
    }
}

fn xywh_out(b: BoxXywh) -> XywhOut {
    XywhOut {
        center_x: round_to(b.center_x, COORD_DECIMALS),
        center_y: round_to(b.center_y, COORD_DECIMALS),
        width: round_to(b.width, COORD_DECIMALS),
        height: round_to(b.height, COORD_DECIMALS),
    }
}
