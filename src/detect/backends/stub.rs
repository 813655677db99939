use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawBoxes;

/// Scripted backend for tests and dry runs. Returns the same output for
/// every frame.
pub struct StubBackend {
    output: StubOutput,
}

enum StubOutput {
    Boxes(Option<RawBoxes>),
    Fail(String),
}

impl StubBackend {
    /// Backend that never finds anything.
    pub fn new() -> Self {
        Self::with_boxes(RawBoxes::default())
    }

    pub fn with_boxes(boxes: RawBoxes) -> Self {
        Self {
            output: StubOutput::Boxes(Some(boxes)),
        }
    }

    /// Backend whose runtime reports no box data at all.
    pub fn without_boxes() -> Self {
        Self {
            output: StubOutput::Boxes(None),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            output: StubOutput::Fail(message.into()),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Option<RawBoxes>> {
        match &self.output {
            StubOutput::Boxes(boxes) => Ok(boxes.clone()),
            StubOutput::Fail(message) => Err(anyhow!("{}", message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_replays_scripted_output() {
        let mut boxes = RawBoxes::default();
        boxes.push(0, 0.8, [1.0, 2.0, 3.0, 4.0]);
        let mut backend = StubBackend::with_boxes(boxes.clone());

        assert_eq!(backend.detect(&[], 0, 0).unwrap(), Some(boxes.clone()));
        assert_eq!(backend.detect(&[], 0, 0).unwrap(), Some(boxes));
    }

    #[test]
    fn stub_can_fail_or_report_absent_boxes() {
        let mut failing = StubBackend::failing("model crashed");
        let err = failing.detect(&[], 1, 1).unwrap_err();
        assert!(err.to_string().contains("model crashed"));

        let mut absent = StubBackend::without_boxes();
        assert_eq!(absent.detect(&[], 1, 1).unwrap(), None);
    }
}
