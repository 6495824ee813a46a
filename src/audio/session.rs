//! Recording session lifecycle
//!
//! One microphone take: `Idle -> Recording -> Idle`, with a terminal
//! `Released` state reached on teardown. The hardware handle is owned
//! exclusively by the session and is released on every exit path, including
//! drop while a recording is still running.

use super::types::{AudioCaptureError, AudioCaptureHandle};
use super::TARGET_SAMPLE_RATE;
use chrono::{DateTime, Local};
use std::io::Cursor;
use tracing::{info, warn};

/// Audio session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Recording,
    Released,
}

/// A completed microphone take, WAV-encoded for the transcription service
#[derive(Debug, Clone)]
pub(crate) struct RecordedAudio {
    /// 16-bit mono PCM in a WAV envelope
    pub(crate) wav_bytes: Vec<u8>,
    pub(crate) sample_rate: u32,
    pub(crate) duration_secs: f64,
}

/// Manages the lifecycle of a single microphone recording
pub(crate) struct AudioCaptureSession {
    state: SessionState,
    handle: Option<AudioCaptureHandle>,
    started_at: Option<DateTime<Local>>,
}

impl AudioCaptureSession {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Idle,
            handle: None,
            started_at: None,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Start recording from the default input device
    ///
    /// Rejected while a recording is already in progress. Any failure leaves
    /// the session `Idle` with no partially-acquired resource.
    pub(crate) fn start(&mut self) -> Result<(), AudioCaptureError> {
        match self.state {
            SessionState::Recording => Err(AudioCaptureError::AlreadyRecording),
            SessionState::Released => Err(AudioCaptureError::Released),
            SessionState::Idle => {
                // On macOS a refused microphone permission surfaces as the
                // device vanishing at stream-build time
                let handle = super::start_capture().map_err(|e| match e {
                    AudioCaptureError::StreamError(cpal::BuildStreamError::DeviceNotAvailable) => {
                        AudioCaptureError::PermissionDenied
                    }
                    other => other,
                })?;
                self.handle = Some(handle);
                self.started_at = Some(Local::now());
                self.state = SessionState::Recording;
                info!("Recording session started");
                Ok(())
            }
        }
    }

    /// Stop recording and return the captured audio
    ///
    /// Valid only from `Recording`; calling from `Idle` is a warning no-op
    /// that returns `None`.
    pub(crate) fn stop(&mut self) -> Result<Option<RecordedAudio>, AudioCaptureError> {
        if self.state != SessionState::Recording {
            warn!("stop() called with no recording in progress");
            return Ok(None);
        }

        let samples = match self.handle.take() {
            Some(mut handle) => handle.stop(),
            None => Vec::new(),
        };
        self.state = SessionState::Idle;
        self.started_at = None;

        let duration_secs = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
        let wav_bytes = encode_wav(&samples)?;
        info!(
            "Recording stopped: {:.1}s of audio ({} bytes WAV)",
            duration_secs,
            wav_bytes.len()
        );

        Ok(Some(RecordedAudio {
            wav_bytes,
            sample_rate: TARGET_SAMPLE_RATE,
            duration_secs,
        }))
    }

    pub(crate) fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Force-release the microphone on teardown
    ///
    /// Best-effort: never propagates an error into the caller. After this
    /// call the session is terminal and cannot be restarted.
    pub(crate) fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if handle.is_capturing() {
                warn!("Releasing audio session while a recording was in progress");
            }
            let _ = handle.stop();
        }
        self.started_at = None;
        self.state = SessionState::Released;
    }
}

impl Default for AudioCaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        if self.state == SessionState::Recording {
            self.release();
        }
    }
}

/// Wrap mono PCM samples into a WAV envelope
fn encode_wav(samples: &[i16]) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
