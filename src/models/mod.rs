pub mod status;

pub use status::{PipelineStatus, Severity, SharedStatus, StatusEvent, READY_TEXT};
