//! Local model catalog
//!
//! Resolves model ids against the HuggingFace cache directory layout
//! (`models--owner--name/snapshots/<revision>/...`), classifies each
//! model into a family from its side-car metadata, and hands out the
//! artifact paths the executors load from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use speaches_core::{
    AsrArtifact, Error, ModelFamily, ModelId, Result, SingleVoiceArtifact, VoicePackArtifact,
};

/// YAML front matter of a model card README.
#[derive(Debug, Default, Deserialize)]
struct CardData {
    #[serde(default)]
    library_name: Option<String>,
    #[serde(default)]
    pipeline_tag: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    language: Option<Languages>,
}

/// `language:` may be a single string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Languages {
    One(String),
    Many(Vec<String>),
}

impl CardData {
    fn languages(&self) -> Vec<String> {
        match &self.language {
            None => Vec::new(),
            Some(Languages::One(language)) => vec![language.clone()],
            Some(Languages::Many(languages)) => languages.clone(),
        }
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.pipeline_tag.as_deref() == Some(tag)
            || self
                .tags
                .as_deref()
                .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }
}

/// A locally installed model, as reported by `/v1/models`.
#[derive(Debug, Clone)]
pub struct LocalModel {
    pub id: ModelId,
    pub family: ModelFamily,
    /// Unix mtime of the repo directory.
    pub created: i64,
    pub languages: Vec<String>,
}

pub struct ModelCatalog {
    cache_dir: PathBuf,
    offline: bool,
    family_cache: Mutex<HashMap<ModelId, ModelFamily>>,
}

impl ModelCatalog {
    pub fn new(cache_dir: PathBuf, offline: bool) -> Self {
        Self {
            cache_dir,
            offline,
            family_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether remote listing/downloading is disabled (`HF_HUB_OFFLINE`).
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Repo directory for a model id, if its artifacts are installed.
    pub fn repo_path(&self, model_id: &ModelId) -> Option<PathBuf> {
        let dir_name = format!("models--{}", model_id.as_str().replace('/', "--"));
        let path = self.cache_dir.join(dir_name);
        path.is_dir().then_some(path)
    }

    /// The snapshot directory holding the model files: the revision
    /// `refs/main` points at when present, otherwise the first snapshot.
    pub fn snapshot_dir(&self, model_id: &ModelId) -> Result<PathBuf> {
        let repo = self
            .repo_path(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.clone()))?;
        let snapshots = repo.join("snapshots");

        let main_ref = repo.join("refs").join("main");
        if let Ok(revision) = std::fs::read_to_string(&main_ref) {
            let candidate = snapshots.join(revision.trim());
            if candidate.is_dir() {
                return Ok(candidate);
            }
        }

        let first = std::fs::read_dir(&snapshots)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .find(|path| path.is_dir())
            })
            .ok_or_else(|| Error::ModelNotFound(model_id.clone()))?;
        Ok(first)
    }

    /// Classify a model by its side-car metadata. Cached per id.
    pub fn classify(&self, model_id: &ModelId) -> Result<ModelFamily> {
        if let Some(family) = self.family_cache.lock().get(model_id) {
            return Ok(*family);
        }
        let snapshot = self.snapshot_dir(model_id)?;
        let family = classify_snapshot(&snapshot);
        debug!(model = %model_id, ?family, "classified model");
        self.family_cache.lock().insert(model_id.clone(), family);
        Ok(family)
    }

    pub fn asr_artifact(&self, model_id: &ModelId) -> Result<AsrArtifact> {
        let snapshot = self.snapshot_dir(model_id)?;
        let weights = find_file(&snapshot, |path| {
            has_extension(path, "gguf")
                || (has_extension(path, "bin") && file_stem_contains(path, "ggml"))
        })
        .ok_or_else(|| Error::load_failed(model_id, "no GGML weights in model snapshot"))?;
        Ok(AsrArtifact { weights })
    }

    pub fn voice_pack_artifact(&self, model_id: &ModelId) -> Result<VoicePackArtifact> {
        let snapshot = self.snapshot_dir(model_id)?;
        let weights = find_file(&snapshot, |path| has_extension(path, "onnx"))
            .ok_or_else(|| Error::load_failed(model_id, "no ONNX weights in model snapshot"))?;
        let tokenizer = find_file(&snapshot, |path| file_name_is(path, "tokenizer.json"))
            .ok_or_else(|| Error::load_failed(model_id, "no tokenizer.json in model snapshot"))?;
        let voices_dir = find_dir(&snapshot, "voices")
            .ok_or_else(|| Error::load_failed(model_id, "no voices directory in model snapshot"))?;
        Ok(VoicePackArtifact {
            weights,
            tokenizer,
            voices_dir,
        })
    }

    pub fn single_voice_artifact(&self, model_id: &ModelId) -> Result<SingleVoiceArtifact> {
        let snapshot = self.snapshot_dir(model_id)?;
        let config = find_file(&snapshot, |path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".onnx.json"))
        })
        .ok_or_else(|| Error::load_failed(model_id, "no .onnx.json side-car in model snapshot"))?;
        // The weights sit next to the side-car: `<voice>.onnx.json` → `<voice>.onnx`.
        let weights = config.with_extension("");
        if !weights.is_file() {
            return Err(Error::load_failed(model_id, "no ONNX weights in model snapshot"));
        }
        Ok(SingleVoiceArtifact { weights, config })
    }

    /// All installed models with a recognized family.
    pub fn list_local_models(&self) -> Vec<LocalModel> {
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };

        let mut models = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let Some(id) = model_id_from_repo_dir(&entry.path()) else {
                continue;
            };
            let family = match self.classify(&id) {
                Ok(family) => family,
                Err(_) => continue,
            };
            if family == ModelFamily::Unknown {
                continue;
            }
            let created = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|duration| duration.as_secs() as i64)
                .unwrap_or(0);
            let languages = self
                .snapshot_dir(&id)
                .ok()
                .and_then(|snapshot| read_card_data(&snapshot))
                .map(|card| card.languages())
                .unwrap_or_default();
            models.push(LocalModel {
                id,
                family,
                created,
                languages,
            });
        }
        models.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        models
    }

    /// Download a model's files into the local cache. Blocking; callers
    /// run it on a worker thread.
    pub fn download_model(&self, model_id: &ModelId) -> Result<()> {
        if self.offline {
            return Err(Error::Offline);
        }
        let api = hf_hub::api::sync::Api::new()
            .map_err(|err| Error::Internal(format!("artifact store init failed: {err}")))?;
        let repo = api.model(model_id.to_string());
        let info = repo
            .info()
            .map_err(|err| Error::Internal(format!("failed to query '{model_id}': {err}")))?;
        for sibling in &info.siblings {
            repo.get(&sibling.rfilename).map_err(|err| {
                Error::Internal(format!(
                    "failed to download {}/{}: {err}",
                    model_id, sibling.rfilename
                ))
            })?;
        }
        debug!(model = %model_id, files = info.siblings.len(), "model downloaded");
        Ok(())
    }

    /// Remove a model's local artifacts.
    pub fn delete_local_model(&self, model_id: &ModelId) -> Result<()> {
        let repo = self
            .repo_path(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.clone()))?;
        std::fs::remove_dir_all(&repo)
            .map_err(|err| Error::Internal(format!("failed to delete {}: {err}", repo.display())))?;
        self.family_cache.lock().remove(model_id);
        Ok(())
    }
}

fn classify_snapshot(snapshot: &Path) -> ModelFamily {
    if let Some(card) = read_card_data(snapshot) {
        if card.has_tag("automatic-speech-recognition") {
            return ModelFamily::Asr;
        }
        if card.has_tag("text-to-speech") {
            return classify_tts_shape(snapshot);
        }
        if card.library_name.as_deref() == Some("whisper.cpp") {
            return ModelFamily::Asr;
        }
        warn!(snapshot = %snapshot.display(), "model card matched no known family");
        return ModelFamily::Unknown;
    }

    // No card; fall back to the artifact shapes themselves.
    if find_file(snapshot, |path| {
        has_extension(path, "gguf") || (has_extension(path, "bin") && file_stem_contains(path, "ggml"))
    })
    .is_some()
    {
        return ModelFamily::Asr;
    }
    classify_tts_shape(snapshot)
}

/// Voice packs carry a voices directory; single-voice models carry the
/// `.onnx.json` side-car of exactly one voice.
fn classify_tts_shape(snapshot: &Path) -> ModelFamily {
    if find_dir(snapshot, "voices").is_some() {
        return ModelFamily::TtsVoicePack;
    }
    let has_sidecar = find_file(snapshot, |path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".onnx.json"))
    })
    .is_some();
    if has_sidecar {
        return ModelFamily::TtsSingleVoice;
    }
    ModelFamily::Unknown
}

fn read_card_data(snapshot: &Path) -> Option<CardData> {
    let readme = std::fs::read_to_string(snapshot.join("README.md")).ok()?;
    let rest = readme.strip_prefix("---")?;
    let (front_matter, _) = rest.split_once("\n---")?;
    match serde_yaml::from_str(front_matter) {
        Ok(card) => Some(card),
        Err(err) => {
            warn!(snapshot = %snapshot.display(), %err, "unparsable model card front matter");
            None
        }
    }
}

fn model_id_from_repo_dir(path: &Path) -> Option<ModelId> {
    let name = path.file_name()?.to_str()?;
    let repo = name.strip_prefix("models--")?;
    if !path.is_dir() {
        return None;
    }
    Some(ModelId::new(repo.replace("--", "/")))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}

fn file_stem_contains(path: &Path, needle: &str) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.contains(needle))
}

fn file_name_is(path: &Path, name: &str) -> bool {
    path.file_name().and_then(|file| file.to_str()) == Some(name)
}

/// Depth-first search for the first file matching the predicate.
fn find_file(dir: &Path, predicate: impl Fn(&Path) -> bool + Copy) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.is_file() && predicate(&path) {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.into_iter().find_map(|subdir| find_file(&subdir, predicate))
}

fn find_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    candidate.is_dir().then_some(candidate)
}
