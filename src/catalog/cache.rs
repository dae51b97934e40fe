use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{CatalogError, WordSource};
use crate::store::StorageAdapter;
use crate::store::schema::{Word, keys};

pub const DEFAULT_FRESHNESS_SECS: i64 = 60 * 60;

/// Word list cached in storage next to the time it was fetched.
pub struct CachedCatalog<S> {
    source: S,
    storage: StorageAdapter,
    freshness: Duration,
}

impl<S: WordSource> CachedCatalog<S> {
    pub fn new(source: S, storage: StorageAdapter) -> Self {
        Self {
            source,
            storage,
            freshness: Duration::seconds(DEFAULT_FRESHNESS_SECS),
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Cached list if it is younger than the freshness window, else a fresh
    /// fetch that replaces the cache.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<Vec<Word>, CatalogError> {
        if let Some(words) = self.cached(now).await {
            debug!(count = words.len(), "serving cached catalog");
            return Ok(words);
        }
        self.refresh(now).await
    }

    pub async fn cached(&self, now: DateTime<Utc>) -> Option<Vec<Word>> {
        let last_fetch = self.storage.get(keys::LAST_FETCH).await?.as_i64()?;
        let age = now.timestamp_millis().saturating_sub(last_fetch);
        if age >= self.freshness.num_milliseconds() {
            return None;
        }
        let words = self.storage.get(keys::WORDS).await?;
        match serde_json::from_value(words) {
            Ok(words) => Some(words),
            Err(e) => {
                warn!("cached catalog is malformed, refetching: {e}");
                None
            }
        }
    }

    /// Fetch unconditionally and store the result with `now` as its fetch time.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<Vec<Word>, CatalogError> {
        let words = self.source.fetch_all().await?;
        debug!(count = words.len(), "fetched catalog");
        self.storage
            .set(keys::WORDS, serde_json::to_value(&words)?)
            .await;
        self.storage
            .set(keys::LAST_FETCH, Value::from(now.timestamp_millis()))
            .await;
        Ok(words)
    }
}
