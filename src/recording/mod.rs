//! Recording lifecycle — state machine over the capture device.

pub mod session;

pub use session::{FinalizedRecording, RecordError, RecorderState, RecordingSession};
