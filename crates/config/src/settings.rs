//! Server settings
//!
//! All keys are read from the environment with the `SPEACHES_` prefix
//! (e.g. `SPEACHES_MODEL_IDLE_TIMEOUT=600`). List-valued keys use a
//! comma separator.

use std::path::PathBuf;

use serde::Deserialize;

use crate::ConfigError;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Seconds a model stays resident after its last lease is released.
fn default_model_idle_timeout() -> i64 {
    300
}

fn default_chat_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_transcription_model() -> String {
    "ggerganov/whisper.cpp".to_string()
}

fn default_speech_model() -> String {
    "onnx-community/Kokoro-82M-v1.0-ONNX".to_string()
}

fn default_aliases_path() -> PathBuf {
    PathBuf::from("model_aliases.json")
}

fn default_ort_provider_priority() -> Vec<String> {
    vec!["cuda".to_string(), "cpu".to_string()]
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on every endpoint except `/health` when set.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Idle seconds before an unused model is unloaded.
    /// `0` unloads immediately on last release; negative never unloads.
    #[serde(default = "default_model_idle_timeout")]
    pub model_idle_timeout: i64,

    /// Advisory cap on concurrently resident models per family. When
    /// reached, the eldest-idle model is evicted on the next lease.
    #[serde(default)]
    pub max_models: Option<usize>,

    /// Upstream OpenAI-compatible chat-completions endpoint.
    #[serde(default = "default_chat_completion_base_url")]
    pub chat_completion_base_url: String,
    #[serde(default)]
    pub chat_completion_api_key: Option<String>,

    /// Default ASR model used to transcribe chat input audio.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Default TTS model used to speak chat responses.
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Ordered ONNX Runtime execution-provider preference.
    #[serde(default = "default_ort_provider_priority")]
    pub ort_provider_priority: Vec<String>,
    /// Providers never to use, even when available.
    #[serde(default)]
    pub ort_excluded_providers: Vec<String>,

    /// Path of the alias file, `alias → canonical id`.
    #[serde(default = "default_aliases_path")]
    pub model_aliases_path: PathBuf,

    /// `HF_HUB_CACHE`; the platform default when unset.
    #[serde(skip)]
    pub hf_hub_cache: Option<PathBuf>,
    /// `HF_HUB_OFFLINE` presence disables remote model listing.
    #[serde(skip)]
    pub hf_hub_offline: bool,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings: Settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("SPEACHES")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ort_provider_priority")
                    .with_list_parse_key("ort_excluded_providers"),
            )
            .build()?
            .try_deserialize()?;

        settings.hf_hub_cache = std::env::var_os("HF_HUB_CACHE").map(PathBuf::from);
        settings.hf_hub_offline = std::env::var_os("HF_HUB_OFFLINE").is_some();
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(0) = self.max_models {
            return Err(ConfigError::InvalidValue {
                field: "max_models".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding locally cached model repositories.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.hf_hub_cache.clone().unwrap_or_else(|| {
            dirs_fallback_home()
                .join(".cache")
                .join("huggingface")
                .join("hub")
        })
    }
}

fn dirs_fallback_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            log_level: default_log_level(),
            model_idle_timeout: default_model_idle_timeout(),
            max_models: None,
            chat_completion_base_url: default_chat_completion_base_url(),
            chat_completion_api_key: None,
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            ort_provider_priority: default_ort_provider_priority(),
            ort_excluded_providers: Vec::new(),
            model_aliases_path: default_aliases_path(),
            hf_hub_cache: None,
            hf_hub_offline: false,
        }
    }
}
