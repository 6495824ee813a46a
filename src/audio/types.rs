//! Audio types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::info;

/// Handle for controlling audio capture from outside the capture thread
///
/// Stopping takes the accumulated PCM buffer. The capture thread exits once
/// the flag is cleared.
pub(crate) struct AudioCaptureHandle {
    pub(crate) is_capturing: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
    pub(crate) pcm_buffer: Arc<Mutex<Vec<i16>>>,
}

impl AudioCaptureHandle {
    /// Stop capturing and return the accumulated mono PCM samples
    pub(crate) fn stop(&mut self) -> Vec<i16> {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        let samples = match self.pcm_buffer.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        info!("Audio capture stopped ({} samples)", samples.len());
        samples
    }

    /// Check if currently capturing
    pub(crate) fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }
}

/// Errors that can occur during audio capture
#[derive(Debug, thiserror::Error)]
pub(crate) enum AudioCaptureError {
    #[error("microphone access was refused")]
    PermissionDenied,

    #[error("no audio input device found")]
    NoInputDevice,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("audio session has been released")]
    Released,

    #[error("no supported audio configuration found")]
    NoSupportedConfig,

    #[error("audio configuration error: {0}")]
    ConfigError(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("audio stream error: {0}")]
    StreamError(#[from] cpal::BuildStreamError),

    #[error("audio play error: {0}")]
    PlayError(#[from] cpal::PlayStreamError),

    #[error("default config error: {0}")]
    DefaultConfigError(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to encode captured audio: {0}")]
    WavEncode(#[from] hound::Error),
}
