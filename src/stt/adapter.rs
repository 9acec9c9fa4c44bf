//! Lazy, process-wide transcription adapter.
//!
//! [`Transcriber`] fronts the STT engine for the advisory (display-only)
//! transcript.  The model is loaded once per process, lazily on the first
//! call, behind a mutex; every later call shares the same engine instance.
//! A failed load is *not* cached — the next call tries again, so a model
//! file dropped into place later is picked up without a restart.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::stt::engine::{SttEngine, SttError, WhisperEngine};
use crate::stt::transcribe::{TranscribeParams, TranscriptionResult};

type EngineLoader = Box<dyn Fn() -> Result<Arc<dyn SttEngine>, SttError> + Send + Sync>;

/// Shared transcription adapter with one-time lazy model initialization.
pub struct Transcriber {
    loader: EngineLoader,
    engine: Mutex<Option<Arc<dyn SttEngine>>>,
}

impl Transcriber {
    /// A transcriber that loads a Whisper GGML model from `model_path` on
    /// first use.
    pub fn whisper(model_path: PathBuf, params: TranscribeParams) -> Self {
        Self::with_loader(Box::new(move || {
            let engine = WhisperEngine::load(&model_path, params.clone())?;
            log::info!("whisper model loaded: {}", model_path.display());
            Ok(Arc::new(engine) as Arc<dyn SttEngine>)
        }))
    }

    /// A transcriber with a custom engine loader (tests, alternative
    /// engines).
    pub fn with_loader(loader: EngineLoader) -> Self {
        Self {
            loader,
            engine: Mutex::new(None),
        }
    }

    /// Transcribe `audio` (16 kHz mono f32), initializing the engine on the
    /// first call.
    ///
    /// Safe to call repeatedly on growing or overlapping audio; each call is
    /// an independent inference pass.
    pub fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError> {
        let engine = self.engine()?;
        engine.transcribe(audio)
    }

    fn engine(&self) -> Result<Arc<dyn SttEngine>, SttError> {
        let mut slot = self.engine.lock().unwrap();
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.loader)()?;
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

impl std::fmt::Debug for Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let initialized = self.engine.lock().map(|e| e.is_some()).unwrap_or(false);
        f.debug_struct("Transcriber")
            .field("initialized", &initialized)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
