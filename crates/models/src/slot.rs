//! One cached model and its lease handles
//!
//! A slot owns at most one loaded session. Leases bump a reference count;
//! the last release either unloads immediately (TTL 0), arms an unload
//! timer (TTL > 0) or does nothing (negative TTL). A lease taken before
//! the timer fires aborts it.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use speaches_core::{Error, ModelId, Result};

/// Closure constructing a session. Runs on a blocking worker thread, so
/// it may allocate for seconds without stalling the scheduler.
pub type Loader<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// Invoked after a successful unload; the manager uses it to drop the
/// slot from its map.
pub(crate) type UnloadCallback = Box<dyn Fn(&ModelId) + Send + Sync>;

struct SlotState<T> {
    session: Option<Arc<T>>,
    ref_count: usize,
    unload_timer: Option<AbortHandle>,
    last_released: Option<Instant>,
}

pub(crate) struct ModelSlot<T> {
    model_id: ModelId,
    ttl_seconds: i64,
    loader: Loader<T>,
    /// Serializes loads of this model only; leases of other models are
    /// unaffected by a slow load here.
    load_gate: AsyncMutex<()>,
    state: Mutex<SlotState<T>>,
    on_unloaded: UnloadCallback,
}

impl<T: Send + Sync + 'static> ModelSlot<T> {
    pub(crate) fn new(
        model_id: ModelId,
        ttl_seconds: i64,
        loader: Loader<T>,
        on_unloaded: UnloadCallback,
    ) -> Self {
        Self {
            model_id,
            ttl_seconds,
            loader,
            load_gate: AsyncMutex::new(()),
            state: Mutex::new(SlotState {
                session: None,
                ref_count: 0,
                unload_timer: None,
                last_released: None,
            }),
            on_unloaded,
        }
    }

    /// Acquire a lease, loading the session first when necessary.
    /// Concurrent leases of a cold slot coalesce into a single load.
    pub(crate) async fn lease(self: &Arc<Self>) -> Result<ModelLease<T>> {
        if let Some(lease) = self.try_lease_loaded() {
            return Ok(lease);
        }

        let _gate = self.load_gate.lock().await;
        // Another lease may have finished loading while we waited.
        if let Some(lease) = self.try_lease_loaded() {
            return Ok(lease);
        }

        let loader = Arc::clone(&self.loader);
        let started = Instant::now();
        let session = tokio::task::spawn_blocking(move || loader())
            .await
            .map_err(|err| Error::Internal(format!("model loader panicked: {err}")))??;
        info!(
            model = %self.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );

        let session = Arc::new(session);
        let mut state = self.state.lock();
        state.session = Some(Arc::clone(&session));
        state.ref_count += 1;
        Ok(ModelLease {
            slot: Some(Arc::clone(self)),
            session,
        })
    }

    /// Fast path: take a lease on an already-loaded session, cancelling
    /// any pending unload.
    fn try_lease_loaded(self: &Arc<Self>) -> Option<ModelLease<T>> {
        let mut state = self.state.lock();
        let session = Arc::clone(state.session.as_ref()?);
        state.ref_count += 1;
        if let Some(timer) = state.unload_timer.take() {
            debug!(model = %self.model_id, "cancelling pending unload");
            timer.abort();
        }
        Some(ModelLease {
            slot: Some(Arc::clone(self)),
            session,
        })
    }

    /// Drop one reference. On the last one, apply the TTL policy.
    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        debug!(model = %self.model_id, ref_count = state.ref_count, "lease released");
        if state.ref_count > 0 {
            return;
        }
        state.last_released = Some(Instant::now());

        if self.ttl_seconds > 0 {
            let ttl = std::time::Duration::from_secs(self.ttl_seconds as u64);
            info!(
                model = %self.model_id,
                ttl_s = self.ttl_seconds,
                "model idle, scheduling unload"
            );
            let slot = Arc::clone(self);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let timer = handle.spawn(async move {
                        tokio::time::sleep(ttl).await;
                        slot.unload_if_idle();
                    });
                    state.unload_timer = Some(timer.abort_handle());
                }
                Err(_) => warn!(
                    model = %self.model_id,
                    "no runtime to arm the unload timer; model stays resident"
                ),
            }
        } else if self.ttl_seconds == 0 {
            info!(model = %self.model_id, "model idle, unloading immediately");
            self.clear_session(&mut state);
            drop(state);
            (self.on_unloaded)(&self.model_id);
        } else {
            debug!(model = %self.model_id, "model idle, negative TTL keeps it resident");
        }
    }

    /// Timer body: the idleness decision is re-validated under the lock,
    /// a lease may have arrived between firing and locking.
    fn unload_if_idle(&self) {
        let mut state = self.state.lock();
        if state.ref_count == 0 && state.session.is_some() {
            self.clear_session(&mut state);
            drop(state);
            (self.on_unloaded)(&self.model_id);
        }
    }

    /// Operator-initiated unload. Cancels an armed timer.
    pub(crate) fn force_unload(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.session.is_none() {
            return Err(Error::NotLoaded(self.model_id.clone()));
        }
        if state.ref_count > 0 {
            return Err(Error::Busy(self.model_id.clone()));
        }
        self.clear_session(&mut state);
        drop(state);
        (self.on_unloaded)(&self.model_id);
        Ok(())
    }

    /// Drop the session and cancel any armed timer. The unload callback
    /// is invoked by callers after this lock is released; it re-enters
    /// the manager map.
    fn clear_session(&self, state: &mut SlotState<T>) {
        if let Some(timer) = state.unload_timer.take() {
            timer.abort();
        }
        state.session = None;
        info!(model = %self.model_id, "model unloaded");
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// `Some(instant)` when the slot is idle and evictable; `None` while
    /// leased or still loading.
    pub(crate) fn idle_since(&self) -> Option<Instant> {
        let state = self.state.lock();
        if state.ref_count == 0 && state.session.is_some() {
            state.last_released
        } else {
            None
        }
    }

    pub(crate) fn model_id(&self) -> &ModelId {
        &self.model_id
    }
}

/// A scoped capability: while it lives, the session is resident and will
/// not be unloaded. Releasing happens on drop on every exit path.
pub struct ModelLease<T: Send + Sync + 'static> {
    slot: Option<Arc<ModelSlot<T>>>,
    session: Arc<T>,
}

impl<T: Send + Sync + 'static> ModelLease<T> {
    /// The leased session, cloneable into spawned tasks. The clone keeps
    /// the memory alive but not the lease; hold the lease for as long as
    /// the session is used.
    pub fn session(&self) -> Arc<T> {
        Arc::clone(&self.session)
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for ModelLease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLease").finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> std::ops::Deref for ModelLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.session
    }
}

impl<T: Send + Sync + 'static> Drop for ModelLease<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.release();
        }
    }
}
