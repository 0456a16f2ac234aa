//! Voice-pack synthesis over ONNX Runtime
//!
//! One artifact carries the acoustic model plus a directory of named
//! voice style tensors. Synthesis goes phonemize → tokenize → one ONNX
//! run per sentence slice, yielding PCM16 chunks as they come off the
//! model. `Session::run` needs exclusive access, so the ort session sits
//! behind an async mutex; concurrent requests interleave per sentence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use speaches_core::{Error, ModelId, Result, VoicePackArtifact, OPENAI_VOICE_ALIASES};

use crate::device::PlacementPreferences;
use crate::{split_sentences, PcmChunkStream};

/// Native output rate of the voice-pack family.
pub const NATIVE_SAMPLE_RATE: u32 = 24_000;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Maximum token context per inference, pad tokens included.
const MAX_CONTEXT: usize = 512;

/// Dimensions of one voice style vector.
const STYLE_DIM: usize = 256;

/// A loaded voice-pack model: ONNX session, tokenizer, G2P frontends and
/// the voice table.
pub struct VoicePackSession {
    model_id: ModelId,
    session: AsyncMutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    g2p_american: misaki_rs::G2P,
    g2p_british: misaki_rs::G2P,
    /// Voice name → style tensor stored flat, `STYLE_DIM` floats per
    /// token-count entry.
    voices: HashMap<String, Vec<f32>>,
    default_voice: String,
}

impl VoicePackSession {
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn voice_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.voices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    /// Map a requested voice onto the pack. Unknown voices from the
    /// OpenAI set fall back to the default voice; anything else is a
    /// parameter error.
    pub fn resolve_voice(&self, voice: &str) -> Result<String> {
        if self.voices.contains_key(voice) {
            return Ok(voice.to_string());
        }
        if OPENAI_VOICE_ALIASES.contains(&voice) {
            warn!(
                voice,
                fallback = %self.default_voice,
                "OpenAI voice name not in this pack, substituting the default voice"
            );
            return Ok(self.default_voice.clone());
        }
        Err(Error::invalid_param(
            "voice",
            format!(
                "'{voice}' is not a known voice. Supported voices: {}",
                self.voice_names().join(", ")
            ),
        ))
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

/// Load a voice-pack session from its artifacts.
pub fn load(
    model_id: &ModelId,
    artifact: &VoicePackArtifact,
    placement: &PlacementPreferences,
) -> Result<VoicePackSession> {
    let session = Session::builder()
        .and_then(|builder| builder.with_execution_providers(placement.ort_providers()))
        .and_then(|builder| builder.with_intra_threads(4))
        .and_then(|builder| builder.commit_from_file(&artifact.weights))
        .map_err(|err| Error::load_failed(model_id, format!("ONNX session: {err}")))?;

    let tokenizer = load_tokenizer(&artifact.tokenizer)
        .map_err(|reason| Error::load_failed(model_id, reason))?;

    let voices = load_voice_table(&artifact.voices_dir)
        .map_err(|reason| Error::load_failed(model_id, reason))?;
    if voices.is_empty() {
        return Err(Error::load_failed(model_id, "voice table is empty"));
    }
    let default_voice = default_voice_name(&voices);

    info!(
        model = %model_id,
        voices = voices.len(),
        default_voice,
        "voice pack ready"
    );

    Ok(VoicePackSession {
        model_id: model_id.clone(),
        session: AsyncMutex::new(session),
        tokenizer,
        g2p_american: misaki_rs::G2P::new(misaki_rs::Language::EnglishUS),
        g2p_british: misaki_rs::G2P::new(misaki_rs::Language::EnglishGB),
        voices,
        default_voice,
    })
}

/// Synthesize text with a resolved voice, yielding PCM16 chunks lazily,
/// one sentence slice per inference. The caller keeps the lease alive
/// while the stream is consumed.
pub fn synthesize(
    session: Arc<VoicePackSession>,
    text: String,
    voice: String,
    speed: f32,
    target_sample_rate: Option<u32>,
) -> PcmChunkStream {
    Box::pin(async_stream::try_stream! {
        let started = Instant::now();
        let sample_rate = target_sample_rate.unwrap_or(NATIVE_SAMPLE_RATE);
        let text_len = text.len();

        for sentence in split_sentences(&text) {
            let samples = synthesize_sentence(&session, &sentence, &voice, speed).await?;
            if samples.is_empty() {
                continue;
            }
            let pcm = speaches_audio::f32_to_pcm16_bytes(&samples);
            let pcm = if sample_rate != NATIVE_SAMPLE_RATE {
                Bytes::from(
                    speaches_audio::resample_pcm16(&pcm, NATIVE_SAMPLE_RATE, sample_rate)
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

async fn synthesize_sentence(
    session: &VoicePackSession,
    sentence: &str,
    voice: &str,
    speed: f32,
) -> Result<Vec<f32>> {
    // British voice prefixes select the British G2P frontend.
    let phonemes = {
        let g2p = if voice.starts_with("bf_") || voice.starts_with("bm_") {
            &session.g2p_british
        } else {
            &session.g2p_american
        };
        let (phonemes, _) = g2p
            .g2p(sentence)
            .map_err(|err| Error::Inference(format!("phonemization failed: {err}")))?;
        phonemes
    };
    if phonemes.is_empty() {
        return Ok(Vec::new());
    }

    let encoding = session
        .tokenizer
        .encode(phonemes.as_str(), false)
        .map_err(|err| Error::Inference(format!("tokenization failed: {err}")))?;

    // The pad token (id 0) wraps the sequence at both ends.
    let raw_ids = encoding.get_ids();
    let mut token_ids: Vec<i64> = Vec::with_capacity(raw_ids.len() + 2);
    token_ids.push(0);
    token_ids.extend(raw_ids.iter().map(|&id| id as i64));
    token_ids.push(0);

    if token_ids.len() > MAX_CONTEXT {
        return Err(Error::invalid_param(
            "input",
            format!(
                "sentence too long: {} tokens (max {MAX_CONTEXT})",
                token_ids.len()
            ),
        ));
    }

    let style = style_vector(session, voice, token_ids.len())?;

    let mut ort_session = session.session.lock().await;
    run_inference(&mut ort_session, &token_ids, &style, speed)
}

/// Style vectors are stored per token count; pick the slice matching the
/// content length.
fn style_vector(session: &VoicePackSession, voice: &str, token_count: usize) -> Result<Vec<f32>> {
    let styles = session
        .voices
        .get(voice)
        .ok_or_else(|| Error::invalid_param("voice", format!("'{voice}' is not a known voice")))?;

    let entries = styles.len() / STYLE_DIM;
    let content_len = token_count.saturating_sub(2).max(1);
    let index = content_len.min(entries.saturating_sub(1));
    let offset = index * STYLE_DIM;
    Ok(styles[offset..offset + STYLE_DIM].to_vec())
}

fn run_inference(
    session: &mut Session,
    token_ids: &[i64],
    style: &[f32],
    speed: f32,
) -> Result<Vec<f32>> {
    let inference_error = |what: &str| {
        let what = what.to_string();
        move |err: ort::Error| Error::Inference(format!("{what}: {err}"))
    };

    let input_ids = Tensor::from_array(([1_usize, token_ids.len()], token_ids.to_vec()))
        .map_err(inference_error("input_ids tensor"))?;
    let style_tensor = Tensor::from_array(([1_usize, STYLE_DIM], style.to_vec()))
        .map_err(inference_error("style tensor"))?;
    let speed_tensor =
        Tensor::from_array(([1_usize], vec![speed])).map_err(inference_error("speed tensor"))?;

    let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
    feed.insert("input_ids".to_string(), input_ids.into());
    feed.insert("style".to_string(), style_tensor.into());
    feed.insert("speed".to_string(), speed_tensor.into());

    let outputs = session
        .run(SessionInputs::from(feed))
        .map_err(inference_error("inference"))?;

    let (_, samples) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(inference_error("output tensor"))?;
    Ok(samples.to_vec())
}

/// The tokenizer ships a `TemplateProcessing` post-processor current
/// `tokenizers` releases cannot deserialize; strip it and patch the model
/// section so the char-level vocab loads. Pad wrapping happens manually
/// at encode time.
fn load_tokenizer(path: &Path) -> std::result::Result<tokenizers::Tokenizer, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let mut json: serde_json::Value =
        serde_json::from_str(&raw).map_err(|err| format!("tokenizer is not valid JSON: {err}"))?;

    if let Some(object) = json.as_object_mut() {
        object.remove("post_processor");
        if let Some(model) = object.get_mut("model").and_then(|model| model.as_object_mut()) {
            model
                .entry("type")
                .or_insert_with(|| serde_json::Value::String("WordLevel".to_string()));
            model
                .entry("unk_token")
                .or_insert_with(|| serde_json::Value::String("$".to_string()));
        }
    }

    let patched = serde_json::to_string(&json)
        .map_err(|err| format!("failed to re-serialize tokenizer: {err}"))?;
    tokenizers::Tokenizer::from_bytes(patched.as_bytes())
        .map_err(|err| format!("failed to load tokenizer: {err}"))
}

/// Read every `<voice>.bin` in the voices directory as a flat f32 style
/// tensor of shape `(N, 1, STYLE_DIM)`.
fn load_voice_table(dir: &Path) -> std::result::Result<HashMap<String, Vec<f32>>, String> {
    let entries =
        std::fs::read_dir(dir).map_err(|err| format!("failed to read {}: {err}", dir.display()))?;

    let mut voices = HashMap::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("bin") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match load_style_tensor(&path) {
            Ok(styles) => {
                voices.insert(name.to_string(), styles);
            }
            Err(reason) => warn!(voice = name, reason, "skipping unreadable voice file"),
        }
    }
    debug!(count = voices.len(), "loaded voice table");
    Ok(voices)
}

fn load_style_tensor(path: &Path) -> std::result::Result<Vec<f32>, String> {
    let bytes =
        std::fs::read(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "style file size {} is not a multiple of 4",
            bytes.len()
        ));
    }
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if floats.is_empty() || floats.len() % STYLE_DIM != 0 {
        return Err(format!(
            "style file has {} floats, not a multiple of {STYLE_DIM}",
            floats.len()
        ));
    }
    Ok(floats)
}

/// `af_heart` is the conventional default of this family; otherwise the
/// lexicographically first voice keeps the choice deterministic.
fn default_voice_name(voices: &HashMap<String, Vec<f32>>) -> String {
    if voices.contains_key("af_heart") {
        return "af_heart".to_string();
    }
    let mut names: Vec<&String> = voices.keys().collect();
    names.sort();
    names[0].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_bounds() {
        assert!(validate_speed(0.5).is_ok());
        assert!(validate_speed(2.0).is_ok());
        assert!(validate_speed(1.0).is_ok());
        assert!(validate_speed(0.49).is_err());
        assert!(validate_speed(2.01).is_err());
    }

    #[test]
    fn test_default_voice_prefers_af_heart() {
        let mut voices = HashMap::new();
        voices.insert("bm_george".to_string(), vec![0.0; STYLE_DIM]);
        voices.insert("af_heart".to_string(), vec![0.0; STYLE_DIM]);
        assert_eq!(default_voice_name(&voices), "af_heart");

        voices.remove("af_heart");
        voices.insert("af_bella".to_string(), vec![0.0; STYLE_DIM]);
        assert_eq!(default_voice_name(&voices), "af_bella");
    }

    #[test]
    fn test_style_tensor_shape_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af_heart.bin");

        std::fs::write(&path, vec![0u8; STYLE_DIM * 4 * 3]).unwrap();
        let styles = load_style_tensor(&path).unwrap();
        assert_eq!(styles.len(), STYLE_DIM * 3);

        std::fs::write(&path, vec![0u8; 10]).unwrap();
        assert!(load_style_tensor(&path).is_err());
    }

    #[test]
    fn test_voice_table_skips_non_bin_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("af_heart.bin"), vec![0u8; STYLE_DIM * 4]).unwrap();
        std::fs::write(dir.path().join("README.txt"), b"not a voice").unwrap();

        let voices = load_voice_table(dir.path()).unwrap();
        assert_eq!(voices.len(), 1);
        assert!(voices.contains_key("af_heart"));
    }
}
