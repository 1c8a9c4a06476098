//! Durable metadata for cached messages
//!
//! Every [`CacheEntry`] lives twice: in an in-memory index used for lookups
//! and eviction ordering, and as a JSON record in the host key-value store.
//! Mutations write the durable record first and only then touch the index,
//! holding the index lock across both so the two never disagree for a key.

use crate::cache::entry::{CacheEntry, MessageId};
use crate::error::{PlaybackError, Result};
use bridge_traits::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of loading records from the key-value store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub malformed: usize,
}

pub struct MetadataStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    entries: Mutex<HashMap<MessageId, CacheEntry>>,
}

impl MetadataStore {
    /// Create a store whose records are keyed `<prefix><message id>`.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, id: &MessageId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Replace the in-memory index with the records found in the store.
    ///
    /// Records that fail to parse are deleted and counted as malformed.
    pub async fn load(&self) -> Result<LoadReport> {
        let keys = self
            .store
            .list_keys(&self.prefix)
            .await
            .map_err(PlaybackError::storage)?;

        let mut entries = self.entries.lock().await;
        entries.clear();
        let mut report = LoadReport::default();

        for key in keys {
            let Some(raw) = self
                .store
                .get_string(&key)
                .await
                .map_err(PlaybackError::storage)?
            else {
                continue;
            };

            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) if self.key(&entry.message_id) == key => {
                    entries.insert(entry.message_id.clone(), entry);
                    report.loaded += 1;
                }
                Ok(_) | Err(_) => {
                    warn!(key = %key, "Discarding malformed cache metadata record");
                    report.malformed += 1;
                    if let Err(e) = self.store.delete(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete malformed record");
                    }
                }
            }
        }

        debug!(loaded = report.loaded, malformed = report.malformed, "Loaded cache metadata");
        Ok(report)
    }

    pub async fn get(&self, id: &MessageId) -> Option<CacheEntry> {
        self.entries.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &MessageId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Insert or replace an entry.
    pub async fn insert(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let raw = serde_json::to_string(&entry).map_err(PlaybackError::storage)?;
        self.store
            .set_string(&self.key(&entry.message_id), &raw)
            .await
            .map_err(PlaybackError::storage)?;
        entries.insert(entry.message_id.clone(), entry);
        Ok(())
    }

    /// Bump `last_access_at` and return the updated entry.
    pub async fn touch(&self, id: &MessageId, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.lock().await;
        let Some(current) = entries.get(id) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        updated.last_access_at = now;
        let raw = serde_json::to_string(&updated).map_err(PlaybackError::storage)?;
        self.store
            .set_string(&self.key(id), &raw)
            .await
            .map_err(PlaybackError::storage)?;
        entries.insert(id.clone(), updated.clone());
        Ok(Some(updated))
    }

    /// Remove an entry, returning it if it existed.
    pub async fn remove(&self, id: &MessageId) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(id) {
            return Ok(None);
        }

        self.store
            .delete(&self.key(id))
            .await
            .map_err(PlaybackError::storage)?;
        Ok(entries.remove(id))
    }

    /// All entries, least recently accessed first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let mut all: Vec<CacheEntry> = self.entries.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.lru_key().cmp(&b.lru_key()));
        all
    }

    /// Entry count and total bytes.
    pub async fn totals(&self) -> (usize, u64) {
        let entries = self.entries.lock().await;
        let bytes = entries.values().map(|e| e.size_bytes).sum();
        (entries.len(), bytes)
    }

    /// Least recently accessed entry whose id is not in `protected`.
    pub async fn least_recently_used(&self, protected: &HashSet<MessageId>) -> Option<CacheEntry> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| !protected.contains(&e.message_id))
            .min_by(|a, b| a.lru_key().cmp(&b.lru_key()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use chrono::TimeZone;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MapStore {
        records: SyncMutex<BTreeMap<String, String>>,
        fail_writes: SyncMutex<bool>,
    }

    #[async_trait]
    impl KeyValueStore for MapStore {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            if *self.fail_writes.lock() {
                return Err(BridgeError::StorageFailed("read-only".to_string()));
            }
            self.records.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.records.lock().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.records.lock().remove(key);
            Ok(())
        }

        async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
            Ok(self
                .records
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn entry(id: &str, minute: u32) -> CacheEntry {
        CacheEntry::new(MessageId::new(id), PathBuf::from(format!("/c/{id}")), 10, at(minute))
    }

    #[tokio::test]
    async fn test_insert_persists_and_reloads() {
        let kv = Arc::new(MapStore::default());
        let store = MetadataStore::new(kv.clone(), "voice_cache:");
        store.insert(entry("a", 1)).await.unwrap();
        store.insert(entry("b", 2)).await.unwrap();

        let reopened = MetadataStore::new(kv, "voice_cache:");
        let report = reopened.load().await.unwrap();
        assert_eq!(report, LoadReport { loaded: 2, malformed: 0 });
        assert_eq!(reopened.get(&MessageId::new("a")).await, Some(entry("a", 1)));
        assert_eq!(reopened.totals().await, (2, 20));
    }

    #[tokio::test]
    async fn test_malformed_records_are_dropped() {
        let kv = Arc::new(MapStore::default());
        kv.set_string("voice_cache:bad", "{not json").await.unwrap();
        kv.set_string("voice_cache:other", &serde_json::to_string(&entry("a", 1)).unwrap())
            .await
            .unwrap();
        kv.set_string("settings:x", "1").await.unwrap();

        let store = MetadataStore::new(kv.clone(), "voice_cache:");
        let report = store.load().await.unwrap();
        assert_eq!(report, LoadReport { loaded: 0, malformed: 2 });
        assert!(kv.list_keys("voice_cache:").await.unwrap().is_empty());
        assert!(kv.has_key("settings:x").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_index_untouched() {
        let kv = Arc::new(MapStore::default());
        let store = MetadataStore::new(kv.clone(), "voice_cache:");
        *kv.fail_writes.lock() = true;

        let err = store.insert(entry("a", 1)).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Storage(_)));
        assert!(!store.contains(&MessageId::new("a")).await);
    }

    #[tokio::test]
    async fn test_touch_reorders_lru() {
        let kv = Arc::new(MapStore::default());
        let store = MetadataStore::new(kv, "voice_cache:");
        store.insert(entry("a", 1)).await.unwrap();
        store.insert(entry("b", 2)).await.unwrap();

        let none = HashSet::new();
        assert_eq!(
            store.least_recently_used(&none).await.unwrap().message_id,
            MessageId::new("a")
        );

        store.touch(&MessageId::new("a"), at(5)).await.unwrap();
        assert_eq!(
            store.least_recently_used(&none).await.unwrap().message_id,
            MessageId::new("b")
        );

        let protected: HashSet<MessageId> = [MessageId::new("b")].into_iter().collect();
        assert_eq!(
            store.least_recently_used(&protected).await.unwrap().message_id,
            MessageId::new("a")
        );

        let ordered: Vec<_> = store.entries().await.into_iter().map(|e| e.message_id).collect();
        assert_eq!(ordered, vec![MessageId::new("b"), MessageId::new("a")]);
    }

    #[tokio::test]
    async fn test_remove() {
        let kv = Arc::new(MapStore::default());
        let store = MetadataStore::new(kv.clone(), "voice_cache:");
        store.insert(entry("a", 1)).await.unwrap();

        assert!(store.remove(&MessageId::new("a")).await.unwrap().is_some());
        assert!(store.remove(&MessageId::new("a")).await.unwrap().is_none());
        assert!(!kv.has_key("voice_cache:a").await.unwrap());
    }
}
