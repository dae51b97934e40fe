use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::store::StorageError;

const EXTENSION: &str = "json";

static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

/// Persistent storage area: one JSON document per key under `base_dir`.
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    /// Open the default area under the platform data directory.
    pub fn new() -> Result<Self, StorageError> {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabwords")
            .join("storage");
        Self::with_base_dir(base_dir)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{EXTENSION}", sanitize_key(key)))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match fs::read_to_string(self.file_path(key)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a `.tmp` sibling and rename so readers never see a
    /// partial document. Concurrent writers, in this process or another
    /// one sharing `base_dir`, each get their own sibling.
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.file_path(key);
        let n = NEXT_TMP.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}.{n}.tmp", std::process::id()));

        let json = serde_json::to_string_pretty(value)?;
        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn clear(&self) -> Result<Vec<(String, Value)>, StorageError> {
        let mut removed = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|x| x.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            // Unreadable documents are still removed, just not reported.
            if let Ok(Some(value)) = self.get(&key).await {
                removed.push((key, value));
            }
            fs::remove_file(&path).await?;
        }
        Ok(removed)
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
