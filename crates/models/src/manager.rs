//! Per-executor model manager
//!
//! Keyed by model id, one slot per model. The outer map lock is held only
//! to find or create a slot; loading and reference counting happen under
//! the slot's own locks, so one slow load never blocks leases of other
//! models.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use speaches_core::{Error, ModelId, Result};

use crate::slot::{Loader, ModelLease, ModelSlot};

/// Produces the loader closure for a model id. Injected per executor
/// family at startup.
pub type LoaderFactory<T> = Box<dyn Fn(&ModelId) -> Loader<T> + Send + Sync>;

struct ManagerInner<T: Send + Sync + 'static> {
    slots: Mutex<HashMap<ModelId, Arc<ModelSlot<T>>>>,
    ttl_seconds: i64,
    max_models: Option<usize>,
    loader_factory: LoaderFactory<T>,
}

/// Reference-counted, TTL-unloading cache of inference sessions.
pub struct ModelManager<T: Send + Sync + 'static> {
    inner: Arc<ManagerInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for ModelManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ModelManager<T> {
    pub fn new(ttl_seconds: i64, max_models: Option<usize>, loader_factory: LoaderFactory<T>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                slots: Mutex::new(HashMap::new()),
                ttl_seconds,
                max_models,
                loader_factory,
            }),
        }
    }

    /// Lease a session, loading it on first use. The lease releases on
    /// drop; the last release starts the TTL clock.
    pub async fn lease(&self, model_id: &ModelId) -> Result<ModelLease<T>> {
        let slot = self.find_or_create_slot(model_id);
        slot.lease().await
    }

    fn find_or_create_slot(&self, model_id: &ModelId) -> Arc<ModelSlot<T>> {
        let evict_candidate = {
            let mut slots = self.inner.slots.lock();
            if let Some(slot) = slots.get(model_id) {
                return Arc::clone(slot);
            }

            let candidate = self
                .inner
                .max_models
                .filter(|max| slots.len() >= *max)
                .and_then(|_| eldest_idle(&slots));

            if candidate.is_none() {
                return self.insert_slot(&mut slots, model_id);
            }
            candidate
        };

        // Advisory eviction: unload the eldest idle model outside the map
        // lock (its unload callback re-enters the map).
        if let Some(victim) = evict_candidate {
            info!(
                evicted = %victim.model_id(),
                requested = %model_id,
                "resident model cap reached, evicting eldest idle model"
            );
            if let Err(err) = victim.force_unload() {
                debug!(model = %victim.model_id(), %err, "eviction skipped");
            }
        }

        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get(model_id) {
            return Arc::clone(slot);
        }
        self.insert_slot(&mut slots, model_id)
    }

    fn insert_slot(
        &self,
        slots: &mut HashMap<ModelId, Arc<ModelSlot<T>>>,
        model_id: &ModelId,
    ) -> Arc<ModelSlot<T>> {
        let loader = (self.inner.loader_factory)(model_id);
        let weak: Weak<ManagerInner<T>> = Arc::downgrade(&self.inner);
        let on_unloaded = Box::new(move |unloaded: &ModelId| {
            if let Some(inner) = weak.upgrade() {
                inner.slots.lock().remove(unloaded);
            }
        });
        let slot = Arc::new(ModelSlot::new(
            model_id.clone(),
            self.inner.ttl_seconds,
            loader,
            on_unloaded,
        ));
        slots.insert(model_id.clone(), Arc::clone(&slot));
        slot
    }

    /// Ids of currently resident models.
    pub fn list_loaded(&self) -> Vec<ModelId> {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.is_loaded())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_loaded(&self, model_id: &ModelId) -> bool {
        self.inner
            .slots
            .lock()
            .get(model_id)
            .is_some_and(|slot| slot.is_loaded())
    }

    /// Operator-initiated unload. `NotLoaded` when the model is not
    /// resident, `Busy` while leases are outstanding. A pending unload
    /// timer is cancelled.
    pub fn force_unload(&self, model_id: &ModelId) -> Result<()> {
        let slot = self
            .inner
            .slots
            .lock()
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::NotLoaded(model_id.clone()))?;
        slot.force_unload()
    }
}

/// The idle slot with the oldest last-release time.
fn eldest_idle<T: Send + Sync + 'static>(
    slots: &HashMap<ModelId, Arc<ModelSlot<T>>>,
) -> Option<Arc<ModelSlot<T>>> {
    slots
        .values()
        .filter_map(|slot| slot.idle_since().map(|idle| (idle, slot)))
        .min_by_key(|(idle, _)| *idle)
        .map(|(_, slot)| Arc::clone(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_manager(
        ttl_seconds: i64,
        max_models: Option<usize>,
    ) -> (ModelManager<String>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let factory: LoaderFactory<String> = Box::new(move |model_id| {
            let counter = Arc::clone(&counter);
            let name = model_id.to_string();
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(name.clone())
            })
        });
        (ModelManager::new(ttl_seconds, max_models, factory), loads)
    }

    #[tokio::test]
    async fn test_lease_and_list() {
        let (manager, loads) = counting_manager(-1, None);
        let id = ModelId::new("acme/a");

        let lease = manager.lease(&id).await.unwrap();
        assert_eq!(*lease, "acme/a");
        assert_eq!(manager.list_loaded(), vec![id.clone()]);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        // A second lease reuses the session.
        let _again = manager.lease(&id).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_models_load_independently() {
        let (manager, loads) = counting_manager(-1, None);
        let _a = manager.lease(&ModelId::new("acme/a")).await.unwrap();
        let _b = manager.lease(&ModelId::new("acme/b")).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(manager.list_loaded().len(), 2);
    }

    #[tokio::test]
    async fn test_force_unload_states() {
        let (manager, _) = counting_manager(-1, None);
        let id = ModelId::new("acme/a");

        assert!(matches!(
            manager.force_unload(&id),
            Err(Error::NotLoaded(_))
        ));

        let lease = manager.lease(&id).await.unwrap();
        assert!(matches!(manager.force_unload(&id), Err(Error::Busy(_))));

        drop(lease);
        manager.force_unload(&id).unwrap();
        assert!(manager.list_loaded().is_empty());

        // The unload callback dropped the slot from the map.
        assert!(matches!(
            manager.force_unload(&id),
            Err(Error::NotLoaded(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_unload_drops_slot_from_map() {
        let (manager, _) = counting_manager(10, None);
        let id = ModelId::new("acme/a");

        drop(manager.lease(&id).await.unwrap());
        assert!(manager.is_loaded(&id));

        tokio::time::sleep(std::time::Duration::from_secs(11)).await;
        assert!(!manager.is_loaded(&id));
        assert!(manager.list_loaded().is_empty());
    }

    #[tokio::test]
    async fn test_max_models_evicts_eldest_idle() {
        let (manager, _) = counting_manager(-1, Some(2));

        drop(manager.lease(&ModelId::new("acme/a")).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        drop(manager.lease(&ModelId::new("acme/b")).await.unwrap());
        assert_eq!(manager.list_loaded().len(), 2);

        // Third model pushes out the eldest idle ("a").
        let _c = manager.lease(&ModelId::new("acme/c")).await.unwrap();
        let loaded = manager.list_loaded();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded.contains(&ModelId::new("acme/a")));
        assert!(loaded.contains(&ModelId::new("acme/c")));
    }

    #[tokio::test]
    async fn test_max_models_never_evicts_leased() {
        let (manager, _) = counting_manager(-1, Some(1));

        let held = manager.lease(&ModelId::new("acme/a")).await.unwrap();
        // Cap is reached but the only candidate is leased; the new model
        // still loads (the cap is advisory).
        let _b = manager.lease(&ModelId::new("acme/b")).await.unwrap();
        assert_eq!(manager.list_loaded().len(), 2);
        drop(held);
    }

    #[tokio::test]
    async fn test_loader_error_leaves_nothing_loaded() {
        let factory: LoaderFactory<String> = Box::new(|model_id| {
            let model_id = model_id.clone();
            Arc::new(move || Err(Error::load_failed(&model_id, "missing file")))
        });
        let manager = ModelManager::new(-1, None, factory);

        let err = manager.lease(&ModelId::new("acme/broken")).await.unwrap_err();
        assert!(matches!(err, Error::LoadFailed { .. }));
        assert!(manager.list_loaded().is_empty());
    }
}
