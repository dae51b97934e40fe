use std::sync::Arc;
use std::sync::Weak;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::state::reactive::{Node, Signal, Source, SubscriptionId};
use crate::store::StorageAdapter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
}

/// Synchronously readable cell mirroring one storage key.
///
/// Reads always return the best known value. The first read starts a
/// background load; writes update the cache at once and persist in the
/// background. A write made while a load is in flight wins over the loaded
/// value.
pub struct StorageAtom<T> {
    inner: Arc<AtomInner<T>>,
}

struct AtomInner<T> {
    key: String,
    default: T,
    cache: Signal<T>,
    phase: watch::Sender<Phase>,
    storage: StorageAdapter,
}

impl<T> Clone for StorageAtom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StorageAtom<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(storage: &StorageAdapter, key: &str, default: T) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        Self {
            inner: Arc::new(AtomInner {
                key: key.to_string(),
                cache: Signal::new(default.clone()),
                default,
                phase,
                storage: storage.clone(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn read(&self) -> T {
        if self.begin_load() {
            let inner = Arc::clone(&self.inner);
            let spawned = self
                .inner
                .storage
                .spawn_detached(async move { inner.finish_load().await });
            if !spawned {
                self.inner.phase.send_replace(Phase::Uninitialized);
            }
        }
        self.inner.cache.get()
    }

    /// Wait for the persisted value to be loaded, starting the load if
    /// nothing has yet.
    pub async fn load(&self) {
        if self.begin_load() {
            self.inner.finish_load().await;
            return;
        }
        let mut phase = self.inner.phase.subscribe();
        let _ = phase.wait_for(|p| *p == Phase::Ready).await;
    }

    pub fn write(&self, value: T) {
        self.inner.phase.send_replace(Phase::Ready);
        match serde_json::to_value(&value) {
            Ok(json) => self.inner.storage.set_detached(&self.inner.key, json),
            Err(e) => warn!(key = %self.inner.key, "cannot serialize value: {e}"),
        }
        self.inner.cache.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.read();
        f(&mut value);
        self.write(value);
    }

    /// Reset to the default and delete the persisted entry.
    pub fn remove(&self) {
        self.inner.phase.send_replace(Phase::Ready);
        self.inner.storage.remove_detached(&self.inner.key);
        self.inner.cache.set(self.inner.default.clone());
    }

    /// Reconcile a change made by another surface. `None` means the key was
    /// removed. Listeners fire only when the decoded value differs from the
    /// cache. Returns whether it did.
    pub fn apply_external(&self, new_value: Option<&Value>) -> bool {
        let value = self.inner.decode(new_value.cloned());
        self.inner.phase.send_replace(Phase::Ready);
        let changed = self.inner.cache.set(value);
        if changed {
            debug!(key = %self.inner.key, "applied external change");
        }
        changed
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.cache.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.cache.unsubscribe(id)
    }

    fn begin_load(&self) -> bool {
        self.inner.phase.send_if_modified(|phase| {
            if *phase == Phase::Uninitialized {
                *phase = Phase::Loading;
                true
            } else {
                false
            }
        })
    }
}

impl<T> AtomInner<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn finish_load(&self) {
        let stored = self.storage.get(&self.key).await;
        if *self.phase.borrow() == Phase::Loading {
            match stored {
                Some(value) => {
                    debug!(key = %self.key, "loaded persisted value");
                    self.cache.set(self.decode(Some(value)));
                }
                None => debug!(key = %self.key, "nothing persisted, keeping default"),
            }
        }
        self.phase.send_replace(Phase::Ready);
    }

    fn decode(&self, value: Option<Value>) -> T {
        match value {
            None => self.default.clone(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key = %self.key, "malformed stored value, using default: {e}");
                self.default.clone()
            }),
        }
    }
}

impl<T> Source for StorageAtom<T> {
    fn height(&self) -> usize {
        self.inner.cache.height()
    }

    fn register(&self, dependent: Weak<dyn Node>) {
        self.inner.cache.register(dependent);
    }
}
