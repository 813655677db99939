use serde::Serialize;

/// Corner-encoded box `(x1, y1, x2, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoxXyxy {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Center-encoded box `(center_x, center_y, width, height)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoxXywh {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoxXyxy {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array(coords: [f32; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    /// Reorders corners so that `x1 <= x2` and `y1 <= y2`.
    pub fn ordered(self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn to_xywh(self) -> BoxXywh {
        BoxXywh {
            center_x: (self.x1 + self.x2) / 2.0,
            center_y: (self.y1 + self.y2) / 2.0,
            width: self.x2 - self.x1,
            height: self.y2 - self.y1,
        }
    }

    pub fn normalized(self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1 / width,
            y1: self.y1 / height,
            x2: self.x2 / width,
            y2: self.y2 / height,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoxXyxy) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > f32::EPSILON {
            inter / union
        } else {
            0.0
        }
    }
}

/// One located, classified object. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    class_id: u32,
    class_name: String,
    confidence: f32,
    box_xyxy: BoxXyxy,
    box_xywh: BoxXywh,
    box_xyxyn: Option<BoxXyxy>,
    box_xywhn: Option<BoxXywh>,
}

impl Detection {
    /// Build a detection from a pixel-space corner box.
    ///
    /// The center encoding is always derived from `xyxy`. Normalized
    /// encodings are only present when `image_size` is known.
    pub fn new(
        class_id: u32,
        class_name: impl Into<String>,
        confidence: f32,
        xyxy: BoxXyxy,
        image_size: Option<(u32, u32)>,
    ) -> Self {
        let xyxy = xyxy.ordered();
        let xyxyn = image_size
            .filter(|(w, h)| *w > 0 && *h > 0)
            .map(|(w, h)| xyxy.normalized(w as f32, h as f32));
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            box_xyxy: xyxy,
            box_xywh: xyxy.to_xywh(),
            box_xyxyn: xyxyn,
            box_xywhn: xyxyn.map(BoxXyxy::to_xywh),
        }
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn box_xyxy(&self) -> BoxXyxy {
        self.box_xyxy
    }

    pub fn box_xywh(&self) -> BoxXywh {
        self.box_xywh
    }

    pub fn box_xyxyn(&self) -> Option<BoxXyxy> {
        self.box_xyxyn
    }

    pub fn box_xywhn(&self) -> Option<BoxXywh> {
        self.box_xywhn
    }
}

/// Per-box model output as parallel arrays, the shape model runtimes
/// natively produce. The adapter converts this into `Detection`s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawBoxes {
    pub class_ids: Vec<u32>,
    pub confidences: Vec<f32>,
    pub xyxy: Vec<[f32; 4]>,
    /// Second encoding some runtimes also report. Never trusted.
    pub xywh: Option<Vec<[f32; 4]>>,
}

impl RawBoxes {
    pub fn push(&mut self, class_id: u32, confidence: f32, xyxy: [f32; 4]) {
        self.class_ids.push(class_id);
        self.confidences.push(confidence);
        self.xyxy.push(xyxy);
    }

    pub fn len(&self) -> usize {
        self.xyxy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xyxy.is_empty()
    }
}
