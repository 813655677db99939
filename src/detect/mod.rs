mod adapter;
mod backend;
pub mod backends;
pub mod labels;
mod registry;
mod result;
pub mod yolo;

pub use adapter::{parse_class_filter, wrap_raw_boxes, ClassFilter, DetectionAdapter};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::LabelMap;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoxXywh, BoxXyxy, Detection, RawBoxes};
