//! Hardware backend selection
//!
//! The configured provider priority list, minus the excluded set, maps
//! onto ONNX Runtime execution providers. Providers unavailable at
//! runtime are skipped by ort itself, so listing `cuda` on a CPU-only
//! host simply falls through to the next entry. The ASR executor maps
//! the same preference list onto whisper.cpp's GPU toggle.

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch,
};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PlacementPreferences {
    priority: Vec<String>,
    excluded: Vec<String>,
}

impl PlacementPreferences {
    pub fn new(priority: Vec<String>, excluded: Vec<String>) -> Self {
        Self { priority, excluded }
    }

    fn active(&self) -> impl Iterator<Item = &str> {
        self.priority
            .iter()
            .map(String::as_str)
            .filter(|provider| !self.excluded.iter().any(|excluded| excluded == provider))
    }

    /// Execution providers for an ONNX session, highest priority first.
    pub fn ort_providers(&self) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        for name in self.active() {
            match name.to_ascii_lowercase().as_str() {
                "cuda" => providers.push(CUDAExecutionProvider::default().build()),
                "coreml" => providers.push(CoreMLExecutionProvider::default().build()),
                "directml" => providers.push(DirectMLExecutionProvider::default().build()),
                "cpu" => providers.push(CPUExecutionProvider::default().build()),
                other => warn!(provider = other, "unknown execution provider, skipping"),
            }
        }
        providers
    }

    /// Whether any GPU backend is preferred; drives whisper.cpp's GPU flag.
    pub fn wants_gpu(&self) -> bool {
        self.active()
            .any(|provider| matches!(provider.to_ascii_lowercase().as_str(), "cuda" | "coreml" | "directml"))
    }
}

impl Default for PlacementPreferences {
    fn default() -> Self {
        Self {
            priority: vec!["cuda".to_string(), "cpu".to_string()],
            excluded: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_providers_are_filtered() {
        let placement = PlacementPreferences::new(
            vec!["cuda".to_string(), "cpu".to_string()],
            vec!["cuda".to_string()],
        );
        assert_eq!(placement.ort_providers().len(), 1);
        assert!(!placement.wants_gpu());
    }

    #[test]
    fn test_default_prefers_gpu() {
        let placement = PlacementPreferences::default();
        assert!(placement.wants_gpu());
        assert_eq!(placement.ort_providers().len(), 2);
    }

    #[test]
    fn test_unknown_provider_is_skipped() {
        let placement =
            PlacementPreferences::new(vec!["tpu".to_string(), "cpu".to_string()], Vec::new());
        assert_eq!(placement.ort_providers().len(), 1);
    }
}
