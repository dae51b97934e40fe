use std::collections::HashSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::atom::StorageAtom;
use crate::store::StorageAdapter;

/// Routes storage change events from other surfaces into atoms.
///
/// One task per watched key. Tasks run until the change channel closes.
#[derive(Default)]
pub struct SyncListener {
    keys: HashSet<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start mirroring `atom`'s key. Watching the same key twice is ignored.
    pub fn watch<T>(&mut self, storage: &StorageAdapter, atom: &StorageAtom<T>)
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let key = atom.key().to_string();
        if !self.keys.insert(key.clone()) {
            debug!(key = %key, "already watching");
            return;
        }

        let mut changes = storage.subscribe();
        let own_origin = storage.origin();
        let storage = storage.clone();
        let atom = atom.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if change.key != key || change.origin == own_origin {
                            continue;
                        }
                        atom.apply_external(change.new_value.as_ref());
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(key = %key, missed, "change events lagged, re-reading");
                        let current = storage.get(&key).await;
                        atom.apply_external(current.as_ref());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn watched(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{Settings, Theme};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_popup_write_reaches_tab_atom() {
        let tab = StorageAdapter::memory();
        let popup = tab.for_surface();
        let atom = StorageAtom::new(&tab, "tab-of-words-settings", Settings::default());
        atom.load().await;

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            atom.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut sync = SyncListener::new();
        sync.watch(&tab, &atom);
        tokio::task::yield_now().await;

        popup
            .set("tab-of-words-settings", json!({ "theme": "dark" }))
            .await;

        wait_until(|| atom.read().theme == Theme::Dark).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_own_writes_are_not_echoed() {
        let tab = StorageAdapter::memory();
        let atom = StorageAtom::new(&tab, "n", 0u32);
        let mut sync = SyncListener::new();
        sync.watch(&tab, &atom);

        atom.write(1);
        atom.write(2);
        tab.flush().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(atom.read(), 2);
    }

    #[tokio::test]
    async fn test_other_keys_are_ignored_and_duplicates_skipped() {
        let tab = StorageAdapter::memory();
        let popup = tab.for_surface();
        let atom = StorageAtom::new(&tab, "n", 0u32);
        let mut sync = SyncListener::new();
        sync.watch(&tab, &atom);
        sync.watch(&tab, &atom);
        assert_eq!(sync.watched(), 1);

        popup.set("other", json!(5)).await;
        popup.set("n", json!(9)).await;
        wait_until(|| atom.read() == 9).await;
    }

    #[tokio::test]
    async fn test_removal_elsewhere_resets_to_default() {
        let tab = StorageAdapter::memory();
        let popup = tab.for_surface();
        let atom = StorageAtom::new(&tab, "n", 0u32);
        atom.write(4);
        tab.flush().await;

        let mut sync = SyncListener::new();
        sync.watch(&tab, &atom);
        popup.remove("n").await;
        wait_until(|| atom.read() == 0).await;
    }
}
