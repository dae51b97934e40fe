use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, warn};

use crate::store::json_store::JsonStore;
use crate::store::memory::MemoryStore;
use crate::store::{Backend, Origin, StorageChange};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

static NEXT_SURFACE: AtomicU32 = AtomicU32::new(1);

/// Best-effort handle to the shared key-value area.
///
/// Failures never reach callers: they are logged and resolve as a missing
/// value or a no-op. Clones share the backend, the change channel and the
/// surface identity; use [`StorageAdapter::for_surface`] for a handle that
/// represents another surface.
#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<Backend>,
    changes: broadcast::Sender<StorageChange>,
    origin: Origin,
    pending: Arc<Pending>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl StorageAdapter {
    /// Open the persistent area at `dir` (or the default location), falling
    /// back to process memory if it cannot be created.
    pub fn open(dir: Option<PathBuf>) -> Self {
        let store = match dir {
            Some(dir) => JsonStore::with_base_dir(dir),
            None => JsonStore::new(),
        };
        match store {
            Ok(store) => {
                debug!(dir = %store.base_dir().display(), "using persistent storage");
                Self::with_backend(Backend::Disk(store))
            }
            Err(e) => {
                warn!("persistent storage unavailable, falling back to memory: {e}");
                Self::memory()
            }
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(Backend::Memory(MemoryStore::new()))
    }

    fn with_backend(backend: Backend) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            backend: Arc::new(backend),
            changes,
            origin: next_origin(),
            pending: Arc::new(Pending::default()),
        }
    }

    /// A handle onto the same area that identifies as a different surface.
    pub fn for_surface(&self) -> Self {
        Self {
            origin: next_origin(),
            ..self.clone()
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "storage get failed: {e}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value) {
        let old_value = self.get(key).await;
        match self.backend.set(key, &value).await {
            Ok(()) => self.publish(key, old_value, Some(value), self.origin),
            Err(e) => warn!(key, "storage set failed: {e}"),
        }
    }

    pub async fn remove(&self, key: &str) {
        let old_value = self.get(key).await;
        match self.backend.remove(key).await {
            Ok(()) => {
                if old_value.is_some() {
                    self.publish(key, old_value, None, self.origin);
                }
            }
            Err(e) => warn!(key, "storage remove failed: {e}"),
        }
    }

    pub async fn clear(&self) {
        match self.backend.clear().await {
            Ok(removed) => {
                for (key, old_value) in removed {
                    self.publish(&key, Some(old_value), None, self.origin);
                }
            }
            Err(e) => warn!("storage clear failed: {e}"),
        }
    }

    /// Fire-and-forget [`StorageAdapter::set`].
    pub fn set_detached(&self, key: &str, value: Value) {
        let this = self.clone();
        let key = key.to_string();
        self.spawn_detached(async move { this.set(&key, value).await });
    }

    /// Fire-and-forget [`StorageAdapter::remove`].
    pub fn remove_detached(&self, key: &str) {
        let this = self.clone();
        let key = key.to_string();
        self.spawn_detached(async move { this.remove(&key).await });
    }

    /// Run `task` in the background and track it for [`StorageAdapter::flush`].
    /// Returns false (and drops the task) when no runtime is available.
    pub fn spawn_detached<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime, dropping background storage task");
                return false;
            }
        };

        self.pending.count.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::clone(&self.pending);
        handle.spawn(async move {
            task.await;
            if pending.count.fetch_sub(1, Ordering::SeqCst) == 1 {
                pending.idle.notify_waiters();
            }
        });
        true
    }

    pub fn has_pending(&self) -> bool {
        self.pending.count.load(Ordering::SeqCst) > 0
    }

    /// Wait until every detached task spawned through this area has finished.
    pub async fn flush(&self) {
        loop {
            let idle = self.pending.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub(crate) fn publish(
        &self,
        key: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        origin: Origin,
    ) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
            origin,
        });
    }
}

fn next_origin() -> Origin {
    Origin::Surface(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
}
