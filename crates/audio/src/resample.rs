//! PCM resampling
//!
//! FFT-based rubato resampler for anything long enough to be worth it,
//! linear interpolation for very short buffers. Output is trimmed for the
//! resampler's group delay so `len_out ≈ len_in * to / from`.

use rubato::{FftFixedIn, Resampler};

use crate::AudioError;

const CHUNK_SIZE: usize = 1024;

/// Buffers shorter than this skip the FFT resampler.
const MIN_FFT_INPUT: usize = 256;

/// Resample mono f32 PCM from `from_rate` to `to_rate`.
pub fn resample_f32(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected_len =
        ((samples.len() as u64 * to_rate as u64) / from_rate as u64) as usize;

    if samples.len() < MIN_FFT_INPUT {
        return Ok(resample_linear(samples, from_rate, to_rate, expected_len));
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|err| AudioError::Resample(err.to_string()))?;
    let delay = resampler.output_delay();

    let mut output: Vec<f32> = Vec::with_capacity(expected_len + CHUNK_SIZE);
    let mut position = 0;

    loop {
        let needed = resampler.input_frames_next();
        if samples.len() - position < needed {
            break;
        }
        let chunk = [&samples[position..position + needed]];
        let frames = resampler
            .process(&chunk, None)
            .map_err(|err| AudioError::Resample(err.to_string()))?;
        output.extend_from_slice(&frames[0]);
        position += needed;
    }

    if position < samples.len() {
        let chunk = [&samples[position..]];
        let frames = resampler
            .process_partial(Some(&chunk), None)
            .map_err(|err| AudioError::Resample(err.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the resampler's internal tail.
    let frames = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|err| AudioError::Resample(err.to_string()))?;
    output.extend_from_slice(&frames[0]);

    // Drop the group delay from the front, then pin the length.
    let mut output: Vec<f32> = output.into_iter().skip(delay).collect();
    output.resize(expected_len, 0.0);
    Ok(output)
}

/// Resample signed 16-bit little-endian PCM bytes.
pub fn resample_pcm16(bytes: &[u8], from_rate: u32, to_rate: u32) -> Result<Vec<u8>, AudioError> {
    if from_rate == to_rate {
        return Ok(bytes.to_vec());
    }
    let samples = crate::encode::pcm16_bytes_to_f32(bytes);
    let resampled = resample_f32(&samples, from_rate, to_rate)?;
    Ok(crate::encode::f32_to_pcm16_bytes(&resampled).to_vec())
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32, expected_len: usize) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let mut output = Vec::with_capacity(expected_len);
    for i in 0..expected_len {
        let src = i as f64 / ratio;
        let lo = src.floor() as usize;
        let hi = (lo + 1).min(samples.len().saturating_sub(1));
        let frac = (src - lo as f64) as f32;
        output.push(samples[lo] * (1.0 - frac) + samples[hi] * frac);
    }
    output
}
