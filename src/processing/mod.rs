pub mod decoder;
pub mod dedup;
pub mod enhance;
pub mod frame_source;
pub mod pipeline;
pub mod qr_detection;
pub mod url_validator;

pub use decoder::{CascadeDecoder, DecodedPayload, QrDecode, RegionDecoder, Technique};
pub use dedup::{dedupe, iou, IOU_THRESHOLD};
pub use enhance::FrameEnhancer;
pub use frame_source::{FrameSource, ImageSequenceSource, InMemorySource};
pub use pipeline::{FrameReport, ScanPipeline};
pub use qr_detection::{BoundingBox, DetectionRegion, LocatedCode, QrLocator, RegionDetector, RqrrLocator};
