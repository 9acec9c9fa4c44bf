//! Reply-audio playback behind the [`AudioSink`] seam.
//!
//! [`RodioSink`] decodes and plays one buffer at a time through the default
//! output device and blocks until the audio has finished, so callers run it
//! under `tokio::task::spawn_blocking`.

use std::io::Cursor;

use rodio::{Decoder, OutputStream, Sink, Source};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while decoding or playing reply audio.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The caller handed over an empty buffer; nothing is played.
    #[error("refusing to play an empty audio buffer")]
    EmptyAudio,

    #[error("output device unavailable: {0}")]
    Device(String),

    #[error("failed to decode reply audio: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// AudioSink
// ---------------------------------------------------------------------------

/// Object-safe seam over audio output.
///
/// `play` is side-effect only: it completes when the buffer has finished
/// playing, or fails with a [`PlaybackError`].  An empty buffer must never
/// reach the device.
pub trait AudioSink: Send + Sync {
    fn play(&self, bytes: &[u8]) -> Result<(), PlaybackError>;
}

// ---------------------------------------------------------------------------
// RodioSink
// ---------------------------------------------------------------------------

/// Production sink: one-shot rodio output stream per playback.
///
/// Opening the stream per call keeps the sink `Send + Sync` (rodio's
/// `OutputStream` is not `Send`) and releases the output device between
/// replies.
#[derive(Debug, Default)]
pub struct RodioSink;

impl RodioSink {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSink for RodioSink {
    fn play(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
        if bytes.is_empty() {
            return Err(PlaybackError::EmptyAudio);
        }

        let (_stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| PlaybackError::Device(e.to_string()))?;

        let source = Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;

        sink.append(source.convert_samples::<f32>());
        sink.sleep_until_end();

        log::debug!("playback finished ({} bytes)", bytes.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
