//! Recording session state machine.
//!
//! ```text
//! Idle ──start()──▶ Recording ──stop()──▶ Stopping ──finish()──▶ Idle
//! ```
//!
//! * `start` acquires the capture device exclusively; a second `start`
//!   while `Recording` or `Stopping` fails with
//!   [`RecordError::AlreadyActive`].
//! * chunks are appended only in `Recording`, in strictly increasing
//!   sequence order.
//! * `stop` releases the device unconditionally and assembles the immutable
//!   [`FinalizedRecording`] from the chunks in arrival order; from `Idle`
//!   or `Stopping` it is a no-op, not an error.
//! * `finish` resets to `Idle` once the finalized buffer has been handed
//!   off, discarding the chunks and freeing the session for reuse.
//!
//! Splitting `Stopping` from `Idle` makes explicit that device release and
//! buffer assembly must both complete before the session is reusable.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::{
    encode_wav, CaptureDevice, CaptureError, CaptureHandle, CapturedChunk, CAPTURE_SAMPLE_RATE,
};

// ---------------------------------------------------------------------------
// RecorderState
// ---------------------------------------------------------------------------

/// States of the recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No device held; ready to start.
    Idle,
    /// Device acquired; chunks are being accumulated.
    Recording,
    /// Device released, finalized buffer assembled, awaiting handoff.
    Stopping,
}

// ---------------------------------------------------------------------------
// RecordError
// ---------------------------------------------------------------------------

/// Device and state-machine violations, reported synchronously to the
/// caller.
#[derive(Debug, Error)]
pub enum RecordError {
    /// `start()` while already `Recording` or `Stopping`.
    #[error("a recording is already active")]
    AlreadyActive,

    /// The capture device could not be acquired.
    #[error(transparent)]
    Device(#[from] CaptureError),

    /// A chunk arrived while the session was not in `Recording` state
    /// (late delivery after stop).  Dropped by the caller, never fatal.
    #[error("chunk received while not recording")]
    NotRecording,

    /// A chunk arrived out of sequence — duplicated or reordered delivery.
    #[error("out-of-order chunk: seq {got} after seq {last}")]
    OutOfOrderChunk { last: u64, got: u64 },
}

// ---------------------------------------------------------------------------
// FinalizedRecording
// ---------------------------------------------------------------------------

/// The complete, immutable recording assembled after capture stops.
///
/// `samples` is the exact concatenation of the accepted chunks in arrival
/// order, 16 kHz mono.
#[derive(Debug, Clone)]
pub struct FinalizedRecording {
    samples: Vec<f32>,
    chunk_count: usize,
}

impl FinalizedRecording {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of chunks that went into the buffer.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / CAPTURE_SAMPLE_RATE as f32
    }

    /// Encode as 16-bit PCM WAV for the multipart upload.
    pub fn to_wav(&self) -> Result<Vec<u8>, hound::Error> {
        encode_wav(&self.samples, CAPTURE_SAMPLE_RATE)
    }
}

// ---------------------------------------------------------------------------
// RecordingSession
// ---------------------------------------------------------------------------

/// Owns the active capture handle and the ordered chunk sequence.
///
/// Exactly one instance is active at a time — the session controller holds
/// the only one.
pub struct RecordingSession {
    state: RecorderState,
    chunks: Vec<CapturedChunk>,
    last_seq: Option<u64>,
    handle: Option<CaptureHandle>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            chunks: Vec::new(),
            last_seq: None,
            handle: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// `Idle -> Recording`: acquire the device and start accumulating.
    pub fn start(
        &mut self,
        device: &dyn CaptureDevice,
        tx: mpsc::Sender<CapturedChunk>,
    ) -> Result<(), RecordError> {
        if self.state != RecorderState::Idle {
            return Err(RecordError::AlreadyActive);
        }

        let handle = device.acquire(tx)?;
        self.handle = Some(handle);
        self.chunks.clear();
        self.last_seq = None;
        self.state = RecorderState::Recording;
        log::debug!("recording started");
        Ok(())
    }

    /// Append a chunk in `Recording` state.
    ///
    /// Sequence numbers must be strictly increasing (gaps are fine — the
    /// capture side drops chunks under backpressure rather than blocking);
    /// duplicated or reordered deliveries are rejected.
    pub fn append(&mut self, chunk: CapturedChunk) -> Result<(), RecordError> {
        if self.state != RecorderState::Recording {
            return Err(RecordError::NotRecording);
        }

        if let Some(last) = self.last_seq {
            if chunk.seq <= last {
                return Err(RecordError::OutOfOrderChunk {
                    last,
                    got: chunk.seq,
                });
            }
        }

        self.last_seq = Some(chunk.seq);
        self.chunks.push(chunk);
        Ok(())
    }

    /// Snapshot of all accumulated samples, for the advisory transcription
    /// pass over the growing recording.
    pub fn samples_snapshot(&self) -> Vec<f32> {
        let total = self.chunks.iter().map(|c| c.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for chunk in &self.chunks {
            samples.extend_from_slice(&chunk.samples);
        }
        samples
    }

    /// `Recording -> Stopping`: release the device unconditionally and
    /// assemble the finalized buffer in arrival order.
    ///
    /// Returns `None` (no-op) from `Idle` or `Stopping`.
    pub fn stop(&mut self) -> Option<FinalizedRecording> {
        if self.state != RecorderState::Recording {
            return None;
        }

        // Release even if an advisory transcription is still outstanding;
        // late results are display-only.
        if let Some(handle) = self.handle.take() {
            handle.release();
        }

        let finalized = FinalizedRecording {
            samples: self.samples_snapshot(),
            chunk_count: self.chunks.len(),
        };
        self.state = RecorderState::Stopping;
        log::debug!(
            "recording stopped: {} chunks, {:.2} s",
            finalized.chunk_count,
            finalized.duration_secs()
        );
        Some(finalized)
    }

    /// `Stopping -> Idle`: discard chunks and make the session reusable.
    ///
    /// Called by the controller once the finalized buffer has been handed
    /// off to the audio exchange step.  No-op outside `Stopping`.
    pub fn finish(&mut self) {
        if self.state != RecorderState::Stopping {
            return;
        }
        self.chunks.clear();
        self.last_seq = None;
        self.state = RecorderState::Idle;
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
