//! Audio I/O — capture, resampling, WAV encoding, playback.
//!
//! ```text
//! Microphone -> cpal callback -> stereo_to_mono -> resample_to_16k
//!            -> CapturedChunk (bounded mpsc) -> RecordingSession
//!
//! Reply bytes -> RodioSink (decode + play, blocking)
//! ```

pub mod capture;
pub mod playback;
pub mod resample;
pub mod wav;

pub use capture::{
    CaptureDevice, CaptureError, CaptureHandle, CapturedChunk, CpalCaptureDevice,
    CAPTURE_SAMPLE_RATE,
};
pub use playback::{AudioSink, PlaybackError, RodioSink};
pub use resample::{resample_to_16k, stereo_to_mono};
pub use wav::encode_wav;
