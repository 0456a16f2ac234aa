//! PCM encoding into the speech response formats
//!
//! The synthesis executors emit signed 16-bit little-endian mono PCM at a
//! known rate; this module muxes that into wav/flac/mp3 or passes it
//! through untouched for `pcm`.

use std::io::Cursor;

use bytes::Bytes;
use speaches_core::AudioFormat;

use crate::AudioError;

/// Convert f32 samples in [-1, 1] to PCM16 bytes.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Bytes {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(bytes)
}

/// Reinterpret PCM16 bytes as f32 samples. A trailing odd byte is dropped.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

fn pcm16_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode mono PCM16 at `sample_rate` into `format`.
pub fn encode_pcm16(pcm: &[u8], sample_rate: u32, format: AudioFormat) -> Result<Bytes, AudioError> {
    match format {
        AudioFormat::Pcm => Ok(Bytes::copy_from_slice(pcm)),
        AudioFormat::Wav => encode_wav(pcm, sample_rate),
        AudioFormat::Flac => encode_flac(pcm, sample_rate),
        AudioFormat::Mp3 => encode_mp3(pcm, sample_rate),
    }
}

fn encode_wav(pcm: &[u8], sample_rate: u32) -> Result<Bytes, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|err| {
            AudioError::Encode {
                format: "wav",
                message: err.to_string(),
            }
        })?;
        for sample in pcm16_bytes_to_i16(pcm) {
            writer.write_sample(sample).map_err(|err| AudioError::Encode {
                format: "wav",
                message: err.to_string(),
            })?;
        }
        writer.finalize().map_err(|err| AudioError::Encode {
            format: "wav",
            message: err.to_string(),
        })?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}

fn encode_flac(pcm: &[u8], sample_rate: u32) -> Result<Bytes, AudioError> {
    let flac_error = |message: String| AudioError::Encode {
        format: "flac",
        message,
    };

    let samples: Vec<i32> = pcm16_bytes_to_i16(pcm)
        .into_iter()
        .map(i32::from)
        .collect();

    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, err)| flac_error(err.to_string()))?;
    let source =
        flacenc::source::MemSource::from_samples(&samples, 1, 16, sample_rate as usize);
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|err| flac_error(format!("{:?}", err)))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|err| flac_error(err.to_string()))?;
    Ok(Bytes::from(sink.into_inner()))
}

fn encode_mp3(pcm: &[u8], sample_rate: u32) -> Result<Bytes, AudioError> {
    use mp3lame_encoder::{Builder, FlushNoGap, MonoPcm};

    let mp3_error = |message: String| AudioError::Encode {
        format: "mp3",
        message,
    };

    let samples = pcm16_bytes_to_i16(pcm);

    let mut builder = Builder::new().ok_or_else(|| mp3_error("lame init failed".to_string()))?;
    builder
        .set_num_channels(1)
        .map_err(|err| mp3_error(err.to_string()))?;
    builder
        .set_sample_rate(sample_rate)
        .map_err(|err| mp3_error(err.to_string()))?;
    builder
        .set_brate(mp3lame_encoder::Bitrate::Kbps160)
        .map_err(|err| mp3_error(err.to_string()))?;
    builder
        .set_quality(mp3lame_encoder::Quality::Good)
        .map_err(|err| mp3_error(err.to_string()))?;
    let mut encoder = builder
        .build()
        .map_err(|err| mp3_error(err.to_string()))?;

    let mut output = Vec::new();
    output.reserve(mp3lame_encoder::max_required_buffer_size(samples.len()));
    let written = encoder
        .encode(MonoPcm(&samples), output.spare_capacity_mut())
        .map_err(|err| mp3_error(err.to_string()))?;
    // SAFETY: `encode` initialized exactly `written` bytes of spare capacity.
    unsafe { output.set_len(output.len() + written) };

    output.reserve(mp3lame_encoder::max_required_buffer_size(0));
    let written = encoder
        .flush::<FlushNoGap>(output.spare_capacity_mut())
        .map_err(|err| mp3_error(err.to_string()))?;
    // SAFETY: as above, for the flushed tail.
    unsafe { output.set_len(output.len() + written) };

    Ok(Bytes::from(output))
}
