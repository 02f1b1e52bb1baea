//! Audio device handling: microphone capture, speaker playback, and
//! the sample-level helpers (RMS, resampling, WAV encoding) shared by
//! the capture adapters and the playback sequencer.

mod capture;
mod playback;

pub use capture::{AudioCapture, BufferHandle, PREFERRED_SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, decode_wav};

use crate::{Error, Result};

/// Root-mean-square level of a block of samples.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Resamples mono audio between rates using an FFT fixed-input
/// resampler. Trailing samples that do not fill a whole chunk are
/// dropped.
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();

    let mut output = Vec::new();
    for chunk in input.chunks(chunk_size) {
        if chunk.len() == chunk_size {
            let result = resampler
                .process(&[chunk.to_vec()], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend_from_slice(&result[0]);
        }
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}
