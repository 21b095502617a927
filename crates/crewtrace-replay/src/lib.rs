pub mod recorder;
pub mod recording;

pub use recorder::Recorder;
pub use recording::{EventRecord, RecordingStatus, RecordingSummary, WorkflowRecording};
