//! Core STT engine trait and the Whisper implementation.
//!
//! [`SttEngine`] is object-safe and `Send + Sync` so it can be held behind
//! an `Arc<dyn SttEngine>`.  [`WhisperEngine`] wraps a
//! `whisper_rs::WhisperContext`; [`MockSttEngine`] (test-only) returns a
//! pre-configured response without any GGML model file.

use std::path::Path;

use thiserror::Error;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use crate::stt::transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult};

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

/// All errors that can arise from the STT subsystem.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// The GGML model file was not found at the given path.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// `whisper_rs` failed to initialise a context or state.
    #[error("whisper context initialisation failed: {0}")]
    ContextInit(String),

    /// An error occurred during the inference pass.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// The supplied audio buffer is shorter than 0.5 s (8 000 samples at
    /// 16 kHz).  Expected early in a recording; callers of the advisory
    /// path swallow it.
    #[error("audio too short — minimum 0.5 s (8 000 samples at 16 kHz)")]
    AudioTooShort,

    /// The supplied audio buffer exceeds 10 minutes at 16 kHz.
    #[error("audio too long — maximum 10 minutes at 16 kHz")]
    AudioTooLong,
}

// ---------------------------------------------------------------------------
// SttEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for speech-to-text engines.
///
/// # Contract
///
/// - `audio` must be **16 kHz, mono, f32** PCM samples.
/// - Returns `Err(SttError::AudioTooShort)` when `audio.len() < 8_000`.
/// - Safe to call repeatedly on growing or overlapping audio.
pub trait SttEngine: Send + Sync {
    /// Transcribe `audio` with time-aligned segments.
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SttEngine>) {}
};

/// Minimum audio length: 0.5 s x 16 000 Hz.
const MIN_AUDIO_SAMPLES: usize = 8_000;
/// Maximum audio length: 10 min x 16 000 Hz.
const MAX_AUDIO_SAMPLES: usize = 9_600_000;

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

/// Production STT engine wrapping a `whisper_rs::WhisperContext`.
///
/// A fresh `WhisperState` is created for every call, so the engine can be
/// shared across threads without locking and tolerates repeated inference
/// over the same growing recording.
pub struct WhisperEngine {
    ctx: WhisperContext,
    params: TranscribeParams,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// `WhisperContext` holds a raw pointer internally but declares
// `unsafe impl Send`/`Sync` in whisper-rs — the model weights are read-only
// after loading, and `TranscribeParams` is fully owned.
// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    /// Load a GGML model from `model_path` and prepare it for inference.
    ///
    /// # Errors
    ///
    /// - [`SttError::ModelNotFound`] — `model_path` does not exist.
    /// - [`SttError::ContextInit`] — whisper-rs failed to load the file.
    pub fn load(model_path: impl AsRef<Path>, params: TranscribeParams) -> Result<Self, SttError> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(SttError::ModelNotFound(path.display().to_string()));
        }

        let path_str = path.to_str().ok_or_else(|| {
            SttError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let ctx_params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        Ok(Self { ctx, params })
    }
}

impl SttEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError> {
        if audio.len() < MIN_AUDIO_SAMPLES {
            return Err(SttError::AudioTooShort);
        }
        if audio.len() > MAX_AUDIO_SAMPLES {
            return Err(SttError::AudioTooLong);
        }

        use whisper_rs::SamplingStrategy as WS;
        let ws = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch {
                beam_size,
                patience,
            } => WS::BeamSearch {
                beam_size,
                patience,
            },
        };

        let mut fp = FullParams::new(ws);

        let lang: Option<&str> = if self.params.language == "auto" {
            None
        } else {
            Some(self.params.language.as_str())
        };
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);

        if self.params.suppress_progress {
            fp.set_print_progress(false);
            fp.set_print_realtime(false);
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        let wall_start = std::time::Instant::now();

        state
            .full(fp, audio)
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let mut text = String::new();
        let mut segments: Vec<Segment> = Vec::with_capacity(n_segments as usize);

        for i in 0..n_segments {
            let seg_text = state
                .full_get_segment_text(i)
                .map_err(|e| SttError::Transcription(format!("segment {i}: {e}")))?;

            // Timestamps are in centiseconds.
            let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64 * 10;
            let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64 * 10;

            text.push_str(&seg_text);
            segments.push(Segment {
                text: seg_text,
                start_ms: t0,
                end_ms: t1,
            });
        }

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            segments,
            duration_ms: wall_start.elapsed().as_millis(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockSttEngine  (test-only)
// ---------------------------------------------------------------------------

/// Test double that returns a pre-configured response without loading any
/// model file.  Enforces the audio-length contract so callers are tested
/// against it.
#[cfg(test)]
pub struct MockSttEngine {
    response: Result<String, SttError>,
}

#[cfg(test)]
impl MockSttEngine {
    /// A mock whose transcript is always `Ok(text)`.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
        }
    }

    /// A mock that always fails with `error`.
    pub fn err(error: SttError) -> Self {
        Self {
            response: Err(error),
        }
    }
}

#[cfg(test)]
impl SttEngine for MockSttEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError> {
        if audio.len() < MIN_AUDIO_SAMPLES {
            return Err(SttError::AudioTooShort);
        }
        if audio.len() > MAX_AUDIO_SAMPLES {
            return Err(SttError::AudioTooLong);
        }
        let text = self.response.clone()?;
        let end_ms = (audio.len() as u64 * 1000) / 16_000;
        Ok(TranscriptionResult {
            segments: vec![Segment {
                text: text.clone(),
                start_ms: 0,
                end_ms,
            }],
            text,
            duration_ms: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ok_returns_configured_text() {
        let engine = MockSttEngine::ok("hello there");
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        let result = engine.transcribe(&audio).unwrap();
        assert_eq!(result.text, "hello there");
        assert_eq!(result.segments.len(), 1);
    }

    #[test]
    fn mock_err_returns_configured_error() {
        let engine = MockSttEngine::err(SttError::Transcription("boom".into()));
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        let err = engine.transcribe(&audio).unwrap_err();
        assert!(matches!(err, SttError::Transcription(_)));
    }

    #[test]
    fn short_audio_is_rejected() {
        let engine = MockSttEngine::ok("text");
        let short = vec![0.0f32; MIN_AUDIO_SAMPLES - 1];
        assert!(matches!(
            engine.transcribe(&short).unwrap_err(),
            SttError::AudioTooShort
        ));
    }

    #[test]
    fn exactly_min_audio_is_accepted() {
        let engine = MockSttEngine::ok("ok");
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        assert!(engine.transcribe(&audio).is_ok());
    }

    #[test]
    fn load_missing_model_returns_model_not_found() {
        let params = TranscribeParams::default();
        let result = WhisperEngine::load("/nonexistent/model.bin", params);
        assert!(
            matches!(result, Err(SttError::ModelNotFound(_))),
            "expected ModelNotFound, got: {result:?}"
        );
    }

    #[test]
    fn box_dyn_stt_engine_compiles() {
        let engine: Box<dyn SttEngine> = Box::new(MockSttEngine::ok("ok"));
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        let _ = engine.transcribe(&audio);
    }
}
