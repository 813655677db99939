use thiserror::Error;

/// Failure conditions of the detection pipeline.
///
/// An image without any detections is not an error; the adapter returns an
/// empty list and the selector produces `DetectionResult::Empty`.
#[derive(Debug, Error)]
pub enum DetectError {
    /// No image was supplied with the request.
    #[error("no image provided")]
    InputMissing,

    /// The supplied bytes are not a decodable image.
    #[error("failed to decode image: {0}")]
    DecodeFailure(#[from] image::ImageError),

    /// A raw pixel buffer does not match its declared dimensions.
    #[error("invalid pixel buffer: {0}")]
    InvalidFrame(String),

    /// The model runtime reported an error or produced malformed output.
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// The model returned a class id with no entry in the label table.
    #[error("class id {class_id} is out of range for a label table of {labels} entries")]
    Lookup { class_id: u32, labels: usize },
}

impl DetectError {
    pub fn inference(err: impl std::fmt::Display) -> Self {
        DetectError::InferenceFailure(err.to_string())
    }

    /// Stable machine-readable identifier, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::InputMissing => "input_missing",
            DetectError::DecodeFailure(_) | DetectError::InvalidFrame(_) => "decode_failure",
            DetectError::InferenceFailure(_) => "inference_failure",
            DetectError::Lookup { .. } => "lookup_error",
        }
    }

    /// HTTP status the boundary reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DetectError::InputMissing => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_is_a_client_error() {
        let err = DetectError::InputMissing;
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.kind(), "input_missing");
    }

    #[test]
    fn processing_errors_are_server_errors_with_distinct_kinds() {
        let inference = DetectError::inference("backend exploded");
        let lookup = DetectError::Lookup {
            class_id: 90,
            labels: 80,
        };
        let frame = DetectError::InvalidFrame("short buffer".to_string());

        assert_eq!(inference.status_code(), 500);
        assert_eq!(lookup.status_code(), 500);
        assert_eq!(frame.status_code(), 500);
        assert_eq!(inference.kind(), "inference_failure");
        assert_eq!(lookup.kind(), "lookup_error");
        assert_eq!(frame.kind(), "decode_failure");
        assert!(inference.to_string().contains("backend exploded"));
        assert!(lookup.to_string().contains("90"));
    }
}
