//! Single-voice synthesis over ONNX Runtime
//!
//! The model's identity encodes exactly one voice; its `.onnx.json`
//! side-car carries the sample rate, the phoneme-id table and the
//! inference scales. Speed maps onto the model's length scale
//! (`length_scale = 1 / speed`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use speaches_core::{Error, ModelId, Result, SingleVoiceArtifact};

use crate::device::PlacementPreferences;
use crate::{split_sentences, PcmChunkStream};

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;

/// Sequence markers of the phoneme-id table.
const BOS: &str = "^";
const EOS: &str = "$";
const PAD: &str = "_";

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

#[derive(Debug, Clone, Deserialize)]
struct AudioSection {
    sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct InferenceSection {
    #[serde(default = "default_noise_scale")]
    noise_scale: f32,
    #[serde(default = "default_length_scale")]
    length_scale: f32,
    #[serde(default = "default_noise_w")]
    noise_w: f32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

/// The `.onnx.json` side-car. Only the sections the executor consumes
/// are modeled; the file carries more.
#[derive(Debug, Clone, Deserialize)]
struct VoiceConfig {
    audio: AudioSection,
    #[serde(default)]
    inference: InferenceSection,
    phoneme_id_map: HashMap<String, Vec<i64>>,
}

/// A loaded single-voice model.
pub struct SingleVoiceSession {
    model_id: ModelId,
    session: AsyncMutex<Session>,
    config: VoiceConfig,
}

impl SingleVoiceSession {
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Native output rate from the side-car.
    pub fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }
}

pub fn validate_speed(speed: f32) -> Result<()> {
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(Error::invalid_param(
            "speed",
            format!("must be between {MIN_SPEED} and {MAX_SPEED}, got {speed}"),
        ));
    }
    Ok(())
}

pub fn load(
    model_id: &ModelId,
    artifact: &SingleVoiceArtifact,
    placement: &PlacementPreferences,
) -> Result<SingleVoiceSession> {
    let raw = std::fs::read_to_string(&artifact.config)
        .map_err(|err| Error::load_failed(model_id, format!("voice config: {err}")))?;
    let config: VoiceConfig = serde_json::from_str(&raw)
        .map_err(|err| Error::load_failed(model_id, format!("voice config: {err}")))?;

    let session = Session::builder()
        .and_then(|builder| builder.with_execution_providers(placement.ort_providers()))
        .and_then(|builder| builder.with_intra_threads(4))
        .and_then(|builder| builder.commit_from_file(&artifact.weights))
        .map_err(|err| Error::load_failed(model_id, format!("ONNX session: {err}")))?;

    info!(
        model = %model_id,
        sample_rate = config.audio.sample_rate,
        "single-voice model ready"
    );

    Ok(SingleVoiceSession {
        model_id: model_id.clone(),
        session: AsyncMutex::new(session),
        config,
    })
}

/// Synthesize text, yielding PCM16 chunks at the native rate (or
/// `target_sample_rate` when given), one sentence slice per inference.
pub fn synthesize(
    session: Arc<SingleVoiceSession>,
    text: String,
    speed: f32,
    target_sample_rate: Option<u32>,
) -> PcmChunkStream {
    Box::pin(async_stream::try_stream! {
        let started = Instant::now();
        let native_rate = session.sample_rate();
        let sample_rate = target_sample_rate.unwrap_or(native_rate);
        let text_len = text.len();

        for sentence in split_sentences(&text) {
            let ids = encode_phonemes(&session.config, &sentence);
            if ids.len() <= 2 {
                continue;
            }
            let samples = {
                let mut ort_session = session.session.lock().await;
                run_inference(&mut ort_session, &session.config.inference, &ids, speed)?
            };
            if samples.is_empty() {
                continue;
            }
            let pcm = speaches_audio::f32_to_pcm16_bytes(&samples);
            let pcm = if sample_rate != native_rate {
                Bytes::from(
                    speaches_audio::resample_pcm16(&pcm, native_rate, sample_rate)
                        .map_err(speaches_core::Error::from)?,
                )
            } else {
                pcm
            };
            yield pcm;
        }

        info!(
            model = %session.model_id,
            characters = text_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "synthesis finished"
        );
    })
}

/// Map characters through the side-car's phoneme-id table:
/// `^ p _ p _ ... p $`. Characters without an entry are dropped.
fn encode_phonemes(config: &VoiceConfig, text: &str) -> Vec<i64> {
    let map = &config.phoneme_id_map;
    let pad = map.get(PAD).and_then(|ids| ids.first()).copied();

    let mut ids: Vec<i64> = Vec::with_capacity(text.len() * 2 + 2);
    if let Some(bos) = map.get(BOS).and_then(|ids| ids.first()) {
        ids.push(*bos);
    }
    for ch in text.to_lowercase().chars() {
        let key = ch.to_string();
        if let Some(mapped) = map.get(&key) {
            ids.extend_from_slice(mapped);
            if let Some(pad) = pad {
                ids.push(pad);
            }
        }
    }
    if let Some(eos) = map.get(EOS).and_then(|ids| ids.first()) {
        ids.push(*eos);
    }
    ids
}

fn run_inference(
    session: &mut Session,
    inference: &InferenceSection,
    ids: &[i64],
    speed: f32,
) -> Result<Vec<f32>> {
    let inference_error = |what: &str| {
        let what = what.to_string();
        move |err: ort::Error| Error::Inference(format!("{what}: {err}"))
    };

    let input = Tensor::from_array(([1_usize, ids.len()], ids.to_vec()))
        .map_err(inference_error("input tensor"))?;
    let input_lengths = Tensor::from_array(([1_usize], vec![ids.len() as i64]))
        .map_err(inference_error("input_lengths tensor"))?;
    let scales = Tensor::from_array((
        [3_usize],
        vec![
            inference.noise_scale,
            inference.length_scale / speed,
            inference.noise_w,
        ],
    ))
    .map_err(inference_error("scales tensor"))?;

    let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
    feed.insert("input".to_string(), input.into());
    feed.insert("input_lengths".to_string(), input_lengths.into());
    feed.insert("scales".to_string(), scales.into());

    let outputs = session
        .run(SessionInputs::from(feed))
        .map_err(inference_error("inference"))?;

    let (_, samples) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(inference_error("output tensor"))?;
    Ok(samples.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VoiceConfig {
        let map: HashMap<String, Vec<i64>> = [
            ("^", vec![1i64]),
            ("$", vec![2]),
            ("_", vec![0]),
            ("h", vec![10]),
            ("i", vec![11]),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
        VoiceConfig {
            audio: AudioSection {
                sample_rate: 22_050,
            },
            inference: InferenceSection::default(),
            phoneme_id_map: map,
        }
    }

    #[test]
    fn test_speed_bounds() {
        assert!(validate_speed(0.25).is_ok());
        assert!(validate_speed(4.0).is_ok());
        assert!(validate_speed(0.24).is_err());
        assert!(validate_speed(4.01).is_err());
    }

    #[test]
    fn test_encode_wraps_and_interleaves() {
        let config = test_config();
        let ids = encode_phonemes(&config, "hi");
        assert_eq!(ids, vec![1, 10, 0, 11, 0, 2]);
    }

    #[test]
    fn test_encode_drops_unmapped_characters() {
        let config = test_config();
        let ids = encode_phonemes(&config, "h!i");
        assert_eq!(ids, vec![1, 10, 0, 11, 0, 2]);
    }

    #[test]
    fn test_encode_lowercases() {
        let config = test_config();
        assert_eq!(encode_phonemes(&config, "HI"), encode_phonemes(&config, "hi"));
    }

    #[test]
    fn test_config_parses_with_defaults() {
        let raw = r#"{
            "audio": {"sample_rate": 22050, "quality": "medium"},
            "phoneme_id_map": {"^": [1], "$": [2], "_": [0]},
            "espeak": {"voice": "en-us"}
        }"#;
        let config: VoiceConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.audio.sample_rate, 22_050);
        assert_eq!(config.inference.length_scale, 1.0);
        assert_eq!(config.inference.noise_scale, 0.667);
    }
}
