//! Model alias table
//!
//! A flat JSON object mapping alias → canonical model id, e.g.
//! `{"tts-1": "speaches-ai/Kokoro-82M-v1.0-ONNX"}`. Loaded once at
//! startup; resolution happens at request ingress before the id is used
//! anywhere else.

use std::collections::HashMap;
use std::path::Path;

use speaches_core::ModelId;
use tracing::debug;

use crate::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct ModelAliases {
    aliases: HashMap<String, String>,
}

impl ModelAliases {
    /// Load the alias file. A missing file is an empty table, not an
    /// error; a malformed file is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no model alias file, starting with an empty table");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::AliasFile {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })
            }
        };
        let aliases: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|err| ConfigError::AliasFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        debug!(count = aliases.len(), "loaded model aliases");
        Ok(Self { aliases })
    }

    pub fn from_map(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Map an incoming id through the table; unknown ids pass through.
    pub fn resolve(&self, model: &str) -> ModelId {
        match self.aliases.get(model) {
            Some(canonical) => ModelId::new(canonical.clone()),
            None => ModelId::new(model),
        }
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_known_alias() {
        let aliases = ModelAliases::from_map(HashMap::from([(
            "tts-1".to_string(),
            "speaches-ai/Kokoro-82M-v1.0-ONNX".to_string(),
        )]));
        assert_eq!(
            aliases.resolve("tts-1").as_str(),
            "speaches-ai/Kokoro-82M-v1.0-ONNX"
        );
    }

    #[test]
    fn test_unknown_id_passes_through() {
        let aliases = ModelAliases::default();
        assert_eq!(aliases.resolve("acme/asr-tiny").as_str(), "acme/asr-tiny");
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let aliases = ModelAliases::load(&dir.path().join("model_aliases.json")).unwrap();
        assert!(aliases.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_aliases.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"whisper-1": "acme/asr-tiny"}}"#).unwrap();

        let aliases = ModelAliases::load(&path).unwrap();
        assert_eq!(aliases.resolve("whisper-1").as_str(), "acme/asr-tiny");
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_aliases.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(ModelAliases::load(&path).is_err());
    }
}
