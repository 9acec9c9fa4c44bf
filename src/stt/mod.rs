//! Speech-to-text — Whisper engine, parameters, and the lazy adapter used
//! for the advisory live transcript.

pub mod adapter;
pub mod engine;
pub mod transcribe;

pub use adapter::Transcriber;
pub use engine::{SttEngine, SttError, WhisperEngine};
pub use transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult};

#[cfg(test)]
pub use engine::MockSttEngine;
