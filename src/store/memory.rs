//! In-memory store for tests and single-process deployments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{Result, StateStore, StoreKey};

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Map-backed [`StateStore`] with lazy expiry.
///
/// Expired entries are dropped on read rather than by a sweeper; the map only
/// ever holds live-or-stale entries for keys something actually touches, which
/// is fine for the test and dev workloads this backend serves.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for test assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, key: &StoreKey, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.entries
            .write()
            .insert(key.render(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        let rendered = key.render();
        let now = Utc::now();
        {
            let entries = self.entries.read();
            match entries.get(&rendered) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it so the map does not accumulate dead keys.
        self.entries.write().remove(&rendered);
        Ok(None)
    }

    async fn delete(&self, key: &StoreKey) -> Result<()> {
        self.entries.write().remove(&key.render());
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordKind;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = InMemoryStateStore::new();
        let key = StoreKey::new(RecordKind::GenerationState, "r1");

        store
            .put(&key, "{\"a\":1}".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("{\"a\":1}"));

        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = InMemoryStateStore::new();
        let key = StoreKey::new(RecordKind::GenerationProgress, "r2");

        store
            .put(&key, "x".to_string(), Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.is_empty());
    }
}
