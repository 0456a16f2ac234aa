//! Container/codec decoding via symphonia
//!
//! Uploaded files (wav, mp3, flac, ogg, ...) are probed, decoded track by
//! packet, downmixed to mono and resampled to the rate the model expects.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::resample::resample_f32;
use crate::AudioError;

/// Decoded mono PCM.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode arbitrary audio bytes to f32 mono PCM at `target_rate`.
pub fn decode_audio(bytes: &[u8], target_rate: u32) -> Result<DecodedAudio, AudioError> {
    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AudioError::Decode(format!("failed to probe format: {err}")))?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(AudioError::NoTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Decode("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|err| AudioError::Decode(format!("failed to create decoder: {err}")))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(AudioError::Decode(format!("read error: {err}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet; keep going with the rest of the file.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(AudioError::Decode(format!("decode error: {err}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);

        let needs_realloc = sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < decoded.capacity() * channels);
        if needs_realloc {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        if channels == 1 {
            mono.extend_from_slice(buf.samples());
        } else {
            // Downmix by averaging the channels of each frame.
            mono.extend(
                buf.samples()
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    if mono.is_empty() {
        return Err(AudioError::Decode("no audio frames decoded".to_string()));
    }

    debug!(
        samples = mono.len(),
        source_rate, target_rate, "decoded uploaded audio"
    );

    let samples = if source_rate == target_rate {
        mono
    } else {
        resample_f32(&mono, source_rate, target_rate)?
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer
                    .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_roundtrip() {
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let bytes = wav_bytes(&samples, 16_000);

        let decoded = decode_audio(&bytes, 16_000).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), samples.len());
        assert!((decoded.duration_seconds() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_resamples_to_target() {
        let samples: Vec<f32> = vec![0.1; 48_000];
        let bytes = wav_bytes(&samples, 48_000);

        let decoded = decode_audio(&bytes, 16_000).unwrap();
        // One second of input stays one second of output.
        let expected = 16_000f64;
        let actual = decoded.samples.len() as f64;
        assert!((actual - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_audio(b"definitely not audio", 16_000).is_err());
    }
}
