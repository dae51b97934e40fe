pub mod adapter;
pub mod json_store;
pub mod memory;
pub mod schema;
pub mod watcher;

use serde_json::Value;
use thiserror::Error;

use crate::store::json_store::JsonStore;
use crate::store::memory::MemoryStore;

pub use adapter::StorageAdapter;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which surface produced a storage change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    Surface(u32),
    /// Written outside this process and picked up by the disk watcher.
    External,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub origin: Origin,
}

/// Backing key-value area.
pub enum Backend {
    Disk(JsonStore),
    Memory(MemoryStore),
}

impl Backend {
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self {
            Backend::Disk(store) => store.get(key).await,
            Backend::Memory(store) => Ok(store.get(key)),
        }
    }

    pub async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        match self {
            Backend::Disk(store) => store.set(key, value).await,
            Backend::Memory(store) => {
                store.set(key, value.clone());
                Ok(())
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self {
            Backend::Disk(store) => store.remove(key).await,
            Backend::Memory(store) => {
                store.remove(key);
                Ok(())
            }
        }
    }

    /// Drop every entry, returning what was removed.
    pub async fn clear(&self) -> Result<Vec<(String, Value)>, StorageError> {
        match self {
            Backend::Disk(store) => store.clear().await,
            Backend::Memory(store) => Ok(store.clear()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Backend::Disk(_))
    }
}
