//! Audio I/O for the speaches gateway
//!
//! Three concerns, one per module:
//! - [`decode`]: uploaded container/codec bytes → f32 mono PCM at a
//!   requested rate (symphonia)
//! - [`resample`]: PCM rate conversion (rubato, linear fallback for
//!   short buffers)
//! - [`encode`]: raw PCM16 → the response formats of the speech endpoint
//!   (wav via hound, flac, mp3, or passthrough pcm)

pub mod decode;
pub mod encode;
pub mod resample;

pub use decode::{decode_audio, DecodedAudio};
pub use encode::{encode_pcm16, f32_to_pcm16_bytes, pcm16_bytes_to_f32};
pub use resample::{resample_f32, resample_pcm16};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("audio has no decodable track")]
    NoTrack,

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("encoding to {format} failed: {message}")]
    Encode { format: &'static str, message: String },
}

impl From<AudioError> for speaches_core::Error {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Decode(message) => speaches_core::Error::BadAudio(message),
            AudioError::NoTrack => {
                speaches_core::Error::BadAudio("no decodable audio track".to_string())
            }
            other => speaches_core::Error::Audio(other.to_string()),
        }
    }
}
