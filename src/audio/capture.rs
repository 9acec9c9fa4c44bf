//! Microphone capture behind the [`CaptureDevice`] seam.
//!
//! [`CpalCaptureDevice`] is the production implementation: `acquire` spins up
//! a dedicated audio thread that owns the cpal stream (cpal streams are not
//! `Send` on every platform) and delivers sequence-numbered 16 kHz mono
//! [`CapturedChunk`]s over a bounded tokio channel.  The returned
//! [`CaptureHandle`] releases the device on drop, so the recording session
//! can hold it as an exclusively-owned resource.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::{resample_to_16k, stereo_to_mono};

/// Sample rate of every [`CapturedChunk`] (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// CapturedChunk
// ---------------------------------------------------------------------------

/// One buffer of captured audio, already downmixed to mono and resampled to
/// 16 kHz.
///
/// `seq` is assigned on the capture thread in delivery order and is strictly
/// increasing for the lifetime of a capture handle; the recording session
/// uses it to reject reordered or duplicated deliveries.
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    /// Delivery-order sequence number, starting at 0.
    pub seq: u64,
    /// Mono PCM samples in `[-1.0, 1.0]` at 16 kHz.
    pub samples: Vec<f32>,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No input device is available, or permission to use it was denied.
    #[error("no input device available on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// The OS refused to spawn the capture thread.
    #[error("failed to spawn capture thread: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// CaptureHandle
// ---------------------------------------------------------------------------

/// Exclusively-owned handle to an acquired capture device.
///
/// Dropping the handle (or calling [`release`](Self::release)) stops chunk
/// delivery and frees the underlying device.  The release action runs at
/// most once.
pub struct CaptureHandle {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CaptureHandle {
    /// Wrap a release action.
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle that owns no resources (mock devices).
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Release the device now instead of waiting for drop.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("released", &self.release.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// Object-safe seam over the audio input device.
///
/// `acquire` must fail with [`CaptureError::NoDevice`] when no input device
/// can be opened; the caller (the recording session) guarantees there is at
/// most one live handle at a time.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the device and start delivering chunks to `tx`.
    fn acquire(&self, tx: mpsc::Sender<CapturedChunk>) -> Result<CaptureHandle, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalCaptureDevice
// ---------------------------------------------------------------------------

/// Production capture device using the system default cpal input.
#[derive(Debug, Default)]
pub struct CpalCaptureDevice;

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn acquire(&self, tx: mpsc::Sender<CapturedChunk>) -> Result<CaptureHandle, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        // The audio thread reports stream-setup success or failure back over
        // this one-shot channel before `acquire` returns.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();

        let join = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_thread(tx, thread_stop, ready_tx))
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CaptureHandle::new(move || {
                stop.store(true, Ordering::SeqCst);
                let _ = join.join();
                log::debug!("capture device released");
            })),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            // Thread died before reporting; treat as an unusable device.
            Err(_) => Err(CaptureError::NoDevice),
        }
    }
}

/// Body of the dedicated capture thread: owns the cpal stream for its whole
/// lifetime and parks until the handle asks it to stop.
fn capture_thread(
    tx: mpsc::Sender<CapturedChunk>,
    stop: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), CaptureError>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(CaptureError::NoDevice));
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    let channels = supported.channels();
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let seq = AtomicU64::new(0);

    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = stereo_to_mono(data, channels);
            let samples = resample_to_16k(&mono, sample_rate);
            let chunk = CapturedChunk {
                seq: seq.fetch_add(1, Ordering::Relaxed),
                samples,
            };
            // Capture must never block: if the channel is full or closed the
            // chunk is dropped and the sequence number records the gap.
            let _ = tx.try_send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    log::info!("audio capture started ({sample_rate} Hz, {channels} ch)");
    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }

    // Dropping the stream stops the hardware callbacks.
    drop(stream);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
