//! Audio resampling and sample processing

use rubato::{Resampler, SincFixedIn};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Resampler processing block in input frames (0.1s of audio at 16kHz)
pub(crate) const CHUNK_SIZE: usize = 1600;

/// Process incoming audio samples: convert to mono, optionally resample, and
/// append to the shared PCM buffer the capture handle drains on stop.
pub(crate) fn process_samples(
    data: &[i16],
    channels: usize,
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    pcm_buffer: &Arc<Mutex<Vec<i16>>>,
    resampler: &Option<Arc<Mutex<SincFixedIn<f32>>>>,
) {
    // Convert to mono by averaging channels
    let mono_samples: Vec<i16> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        data.to_vec()
    };

    let Some(resampler_arc) = resampler else {
        // Already at the target rate - accumulate directly
        if let Ok(mut pcm) = pcm_buffer.lock() {
            pcm.extend(mono_samples);
        }
        return;
    };

    // Buffer input until a full resampler block is available
    let Ok(mut input_buf) = input_buffer.lock() else {
        return;
    };
    input_buf.extend(mono_samples);

    while input_buf.len() >= input_chunk_size {
        let input_chunk: Vec<i16> = input_buf.drain(..input_chunk_size).collect();
        let input_f32: Vec<f32> = input_chunk.iter().map(|&s| s as f32 / 32768.0).collect();

        if let Ok(mut resampler) = resampler_arc.lock() {
            match resampler.process(&[input_f32], None) {
                Ok(resampled) => {
                    let output_i16: Vec<i16> = resampled[0]
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    if let Ok(mut pcm) = pcm_buffer.lock() {
                        pcm.extend(&output_i16);
                    }
                }
                Err(e) => {
                    error!("Resampling error: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        let input_buffer = Arc::new(Mutex::new(Vec::new()));
        let pcm_buffer = Arc::new(Mutex::new(Vec::new()));

        // Two stereo frames: (100, 200) and (-100, -300)
        process_samples(
            &[100, 200, -100, -300],
            2,
            &input_buffer,
            CHUNK_SIZE,
            &pcm_buffer,
            &None,
        );

        let pcm = pcm_buffer.lock().unwrap();
        assert_eq!(*pcm, vec![150, -200]);
    }

    #[test]
    fn test_mono_passthrough_accumulates() {
        let input_buffer = Arc::new(Mutex::new(Vec::new()));
        let pcm_buffer = Arc::new(Mutex::new(Vec::new()));

        process_samples(&[1, 2, 3], 1, &input_buffer, CHUNK_SIZE, &pcm_buffer, &None);
        process_samples(&[4, 5], 1, &input_buffer, CHUNK_SIZE, &pcm_buffer, &None);

        let pcm = pcm_buffer.lock().unwrap();
        assert_eq!(*pcm, vec![1, 2, 3, 4, 5]);
    }
}
