//! Audio transcript cache
//!
//! Chat completions speak their answers; when a follow-up turn references
//! an earlier audio response by id, the cached text stands in for the
//! audio so the conversation does not have to be re-transcribed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use moka::future::Cache;

const CACHE_SIZE: u64 = 4096;
const TTL_SECONDS: u64 = 60 * 60;

#[derive(Clone)]
pub struct TranscriptCache {
    cache: Cache<String, String>,
}

impl TranscriptCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(CACHE_SIZE)
                .time_to_live(Duration::from_secs(TTL_SECONDS))
                .build(),
        }
    }

    pub async fn insert(&self, audio_id: String, transcript: String) {
        self.cache.insert(audio_id, transcript).await;
    }

    pub async fn get(&self, audio_id: &str) -> Option<String> {
        self.cache.get(audio_id).await
    }

    /// Unix timestamp an id inserted now stops resolving at.
    pub fn expires_at(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        now + TTL_SECONDS as i64
    }
}

impl Default for TranscriptCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = TranscriptCache::new();
        cache
            .insert("audio_1".to_string(), "hello there".to_string())
            .await;
        assert_eq!(cache.get("audio_1").await.as_deref(), Some("hello there"));
        assert_eq!(cache.get("audio_2").await, None);
    }

    #[test]
    fn test_expiry_is_in_the_future() {
        let cache = TranscriptCache::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!(cache.expires_at() >= now + 3590);
    }
}
