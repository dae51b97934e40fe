use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::store::{Origin, StorageAdapter, StorageChange};

/// Polls the persistent area so writes made by another process show up as
/// [`Origin::External`] changes on the adapter's channel.
///
/// Writes made through this process's adapters are already on the channel;
/// they only refresh the snapshot.
pub struct DiskWatcher {
    storage: StorageAdapter,
    local: broadcast::Receiver<StorageChange>,
    keys: Vec<String>,
    snapshot: HashMap<String, Option<Value>>,
}

impl DiskWatcher {
    pub fn new(storage: StorageAdapter, keys: &[&str]) -> Self {
        Self {
            local: storage.subscribe(),
            storage,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            snapshot: HashMap::new(),
        }
    }

    /// Record the current contents without publishing anything.
    pub async fn prime(&mut self) {
        for key in &self.keys {
            let value = self.storage.get(key).await;
            self.snapshot.insert(key.clone(), value);
        }
        self.absorb_local();
    }

    /// Re-read every watched key and publish the ones that differ from the
    /// last snapshot. Returns how many changes were published.
    ///
    /// Keys with a local write in flight are left for the next poll.
    pub async fn poll(&mut self) -> usize {
        if self.storage.has_pending() {
            return 0;
        }
        self.absorb_local();

        let mut published = 0;
        for key in self.keys.clone() {
            let current = self.storage.get(&key).await;
            let touched = self.absorb_local();
            if touched.contains(&key) || self.storage.has_pending() {
                continue;
            }
            let previous = self.snapshot.get(&key).cloned().flatten();
            if current != previous {
                debug!(key = %key, "external storage change detected");
                self.storage
                    .publish(&key, previous, current.clone(), Origin::External);
                self.snapshot.insert(key, current);
                published += 1;
            }
        }
        published
    }

    /// Poll every `interval` in a task, starting right away against the
    /// snapshot taken by [`DiskWatcher::prime`]. Anything written after the
    /// snapshot is published by the first poll. Memory-backed areas have no
    /// other writers, so no task is started for them.
    pub fn spawn(mut self, interval: Duration) -> Option<JoinHandle<()>> {
        if !self.storage.is_persistent() {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll().await;
            }
        }))
    }

    /// Fold in-process changes into the snapshot. Returns the keys touched.
    fn absorb_local(&mut self) -> HashSet<String> {
        let mut touched = HashSet::new();
        loop {
            match self.local.try_recv() {
                Ok(change) => {
                    if change.origin == Origin::External {
                        continue;
                    }
                    if self.keys.contains(&change.key) {
                        touched.insert(change.key.clone());
                        self.snapshot.insert(change.key, change.new_value);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(missed, "watcher lagged behind local changes");
                    touched.extend(self.keys.iter().cloned());
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return touched,
            }
        }
    }
}
