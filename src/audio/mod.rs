//! Audio capture module using cpal for cross-platform microphone access
//!
//! Captures audio from the default input device, resampled to 16kHz mono PCM,
//! which is what the transcription service expects. Unlike a streaming STT
//! pipeline, capture here accumulates the whole take in memory; the session
//! wraps it into a WAV buffer when the inspector stops recording.

mod resampler;
mod session;
mod types;

pub(crate) use session::{AudioCaptureSession, RecordedAudio, SessionState};
pub(crate) use types::AudioCaptureError;

use types::AudioCaptureHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::{process_samples, CHUNK_SIZE};
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tracing::{error, info, warn};

/// Target sample rate for the transcription service (16kHz)
pub(crate) const TARGET_SAMPLE_RATE: u32 = 16000;

/// Start audio capture on a dedicated thread
///
/// Initializes the default audio input device and begins capturing microphone
/// audio, resampled to [`TARGET_SAMPLE_RATE`] mono PCM. Device setup runs on
/// the capture thread, but its outcome is reported back synchronously so a
/// refused or missing microphone fails the caller immediately instead of
/// surfacing later in a log line.
///
/// # Errors
/// Returns `AudioCaptureError` if:
/// - No audio input device is available
/// - The audio device configuration is not supported
/// - The audio stream cannot be started
pub(crate) fn start_capture() -> Result<AudioCaptureHandle, AudioCaptureError> {
    let is_capturing = Arc::new(AtomicBool::new(true));
    let pcm_buffer: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));

    let is_capturing_thread = is_capturing.clone();
    let pcm_buffer_thread = pcm_buffer.clone();
    let (ready_tx, ready_rx) = mpsc::channel();

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(is_capturing_thread, pcm_buffer_thread, ready_tx) {
            error!("Audio capture error: {}", e);
        }
    });

    // Wait for the capture thread to report stream startup
    match ready_rx.recv() {
        Ok(Ok(())) => Ok(AudioCaptureHandle {
            is_capturing,
            thread_handle: Some(thread_handle),
            pcm_buffer,
        }),
        Ok(Err(e)) => {
            let _ = thread_handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread_handle.join();
            Err(AudioCaptureError::ConfigError(
                "capture thread exited during startup".into(),
            ))
        }
    }
}

/// Run audio capture on the current thread (blocking)
///
/// Reports stream startup success or failure once through `ready_tx`, then
/// keeps the stream alive until the capture flag is cleared.
fn run_capture(
    is_capturing: Arc<AtomicBool>,
    pcm_buffer: Arc<Mutex<Vec<i16>>>,
    ready_tx: mpsc::Sender<Result<(), AudioCaptureError>>,
) -> Result<(), AudioCaptureError> {
    // Startup failures are reported to the caller, not logged here
    let stream = match build_stream(&is_capturing, &pcm_buffer) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return Ok(());
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return Ok(());
    }

    info!("Audio capture started");
    let _ = ready_tx.send(Ok(()));

    // Keep the stream alive until capture is stopped
    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    Ok(())
}

/// Select a device config and build the cpal input stream
fn build_stream(
    is_capturing: &Arc<AtomicBool>,
    pcm_buffer: &Arc<Mutex<Vec<i16>>>,
) -> Result<cpal::Stream, AudioCaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(AudioCaptureError::NoInputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| AudioCaptureError::ConfigError(e.to_string()))?;

    // Prefer a config that supports the target rate natively
    let mut best_config = None;
    let mut found_target_rate = false;

    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= TARGET_SAMPLE_RATE
            && config.max_sample_rate().0 >= TARGET_SAMPLE_RATE
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(TARGET_SAMPLE_RATE)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }

    let supported_config = best_config.ok_or(AudioCaptureError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported, using {}Hz instead",
            TARGET_SAMPLE_RATE,
            supported_config.sample_rate().0
        );
    }

    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    info!("Audio config: {} channels, {} Hz", channels, sample_rate);

    // Create resampler if the device rate doesn't match the target
    let (resampler, input_chunk_size): (Option<Arc<Mutex<SincFixedIn<f32>>>>, usize) =
        if sample_rate != TARGET_SAMPLE_RATE {
            info!(
                "Creating resampler: {} Hz -> {} Hz",
                sample_rate, TARGET_SAMPLE_RATE
            );
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames = (CHUNK_SIZE as f64 * sample_rate as f64
                / TARGET_SAMPLE_RATE as f64)
                .ceil() as usize;
            match SincFixedIn::<f32>::new(
                TARGET_SAMPLE_RATE as f64 / sample_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            ) {
                Ok(resampler) => (Some(Arc::new(Mutex::new(resampler))), input_frames),
                Err(e) => {
                    error!("Failed to create resampler: {}", e);
                    (None, CHUNK_SIZE)
                }
            }
        } else {
            (None, CHUNK_SIZE)
        };

    // Buffer for accumulating input samples (before resampling)
    let input_buffer: Arc<Mutex<Vec<i16>>> =
        Arc::new(Mutex::new(Vec::with_capacity(input_chunk_size * 2)));

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match device.default_input_config()?.sample_format() {
        SampleFormat::I16 => {
            let is_capturing = is_capturing.clone();
            let input_buffer = input_buffer.clone();
            let pcm_buffer = pcm_buffer.clone();
            let resampler = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !is_capturing.load(Ordering::SeqCst) {
                        return;
                    }
                    process_samples(
                        data,
                        channels,
                        &input_buffer,
                        input_chunk_size,
                        &pcm_buffer,
                        &resampler,
                    );
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let is_capturing = is_capturing.clone();
            let input_buffer = input_buffer.clone();
            let pcm_buffer = pcm_buffer.clone();
            let resampler = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !is_capturing.load(Ordering::SeqCst) {
                        return;
                    }
                    // Convert f32 to i16
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    process_samples(
                        &samples,
                        channels,
                        &input_buffer,
                        input_chunk_size,
                        &pcm_buffer,
                        &resampler,
                    );
                },
                err_callback,
                None,
            )?
        }
        sample_format => {
            return Err(AudioCaptureError::UnsupportedFormat(format!(
                "{:?}",
                sample_format
            )));
        }
    };

    Ok(stream)
}
