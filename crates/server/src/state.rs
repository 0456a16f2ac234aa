//! Shared application state
//!
//! Everything the handlers need is constructed once at startup and
//! injected here: one model manager per executor family (wired to the
//! catalog through its loader factory), the alias table, the transcript
//! cache and the upstream client. No module-level singletons.

use std::ops::Deref;
use std::sync::Arc;

use speaches_config::{ModelAliases, Settings};
use speaches_core::ModelId;
use speaches_executors::kokoro::VoicePackSession;
use speaches_executors::piper::SingleVoiceSession;
use speaches_executors::whisper::AsrSession;
use speaches_executors::{kokoro, piper, whisper, PlacementPreferences};
use speaches_models::{Loader, LoaderFactory, ModelCatalog, ModelManager};

use crate::cache::TranscriptCache;
use crate::upstream::UpstreamClient;

pub struct AppStateInner {
    pub settings: Settings,
    pub aliases: ModelAliases,
    pub catalog: Arc<ModelCatalog>,
    pub asr: ModelManager<AsrSession>,
    pub voice_packs: ModelManager<VoicePackSession>,
    pub single_voices: ModelManager<SingleVoiceSession>,
    pub transcripts: TranscriptCache,
    pub upstream: UpstreamClient,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &AppStateInner {
        &self.inner
    }
}

impl AppState {
    pub fn new(settings: Settings, aliases: ModelAliases) -> Self {
        let catalog = Arc::new(ModelCatalog::new(
            settings.model_cache_dir(),
            settings.hf_hub_offline,
        ));
        let placement = PlacementPreferences::new(
            settings.ort_provider_priority.clone(),
            settings.ort_excluded_providers.clone(),
        );
        let ttl = settings.model_idle_timeout;
        let max_models = settings.max_models;

        let asr_factory: LoaderFactory<AsrSession> = {
            let catalog = Arc::clone(&catalog);
            let placement = placement.clone();
            Box::new(move |model_id: &ModelId| {
                let catalog = Arc::clone(&catalog);
                let placement = placement.clone();
                let model_id = model_id.clone();
                let loader: Loader<AsrSession> = Arc::new(move || {
                    let artifact = catalog.asr_artifact(&model_id)?;
                    whisper::load(&model_id, &artifact, &placement)
                });
                loader
            })
        };

        let voice_pack_factory: LoaderFactory<VoicePackSession> = {
            let catalog = Arc::clone(&catalog);
            let placement = placement.clone();
            Box::new(move |model_id: &ModelId| {
                let catalog = Arc::clone(&catalog);
                let placement = placement.clone();
                let model_id = model_id.clone();
                let loader: Loader<VoicePackSession> = Arc::new(move || {
                    let artifact = catalog.voice_pack_artifact(&model_id)?;
                    kokoro::load(&model_id, &artifact, &placement)
                });
                loader
            })
        };

        let single_voice_factory: LoaderFactory<SingleVoiceSession> = {
            let catalog = Arc::clone(&catalog);
            let placement = placement.clone();
            Box::new(move |model_id: &ModelId| {
                let catalog = Arc::clone(&catalog);
                let placement = placement.clone();
                let model_id = model_id.clone();
                let loader: Loader<SingleVoiceSession> = Arc::new(move || {
                    let artifact = catalog.single_voice_artifact(&model_id)?;
                    piper::load(&model_id, &artifact, &placement)
                });
                loader
            })
        };

        let upstream = UpstreamClient::new(
            settings.chat_completion_base_url.clone(),
            settings.chat_completion_api_key.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                asr: ModelManager::new(ttl, max_models, asr_factory),
                voice_packs: ModelManager::new(ttl, max_models, voice_pack_factory),
                single_voices: ModelManager::new(ttl, max_models, single_voice_factory),
                catalog,
                transcripts: TranscriptCache::new(),
                upstream,
                aliases,
                settings,
            }),
        }
    }
}
