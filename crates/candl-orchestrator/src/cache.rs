use std::sync::Arc;

use candl_core::{Snapshot, Symbol};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::LocalStore;

const KEY_PREFIX: &str = "snapshot:";

/// Last committed snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: Snapshot,
    pub stored_at: DateTime<Utc>,
}

/// Per-symbol snapshot cache: an in-memory mirror over the durable store.
///
/// Every operation is best-effort. Store failures are logged and swallowed,
/// corrupt entries read as absent. No automatic eviction.
///
/// Durable writes go through one lock and carry a per-symbol version. A
/// write whose version was overtaken by a later `store` or `clear` is
/// dropped, so the store never ends up behind the memory mirror.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Option<LocalStore>,
    memory: Arc<DashMap<Symbol, CacheEntry>>,
    versions: Arc<DashMap<Symbol, u64>>,
    writes: Arc<Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(store: Option<LocalStore>) -> Self {
        Self {
            store,
            memory: Arc::new(DashMap::new()),
            versions: Arc::new(DashMap::new()),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn memory_only() -> Self {
        Self::new(None)
    }

    fn key(symbol: &Symbol) -> String {
        format!("{}{}", KEY_PREFIX, symbol)
    }

    fn bump(&self, symbol: &Symbol) -> u64 {
        let mut version = self.versions.entry(symbol.clone()).or_insert(0);
        *version += 1;
        *version
    }

    /// Overwrite the entry for `symbol`.
    pub async fn store(&self, symbol: &Symbol, snapshot: Snapshot, stored_at: DateTime<Utc>) {
        let entry = CacheEntry { snapshot, stored_at };
        let version = self.bump(symbol);
        self.memory.insert(symbol.clone(), entry.clone());
        self.write_through(symbol, version, &entry).await;
    }

    /// Update the memory mirror now and write through on a background task.
    pub fn store_in_background(&self, symbol: &Symbol, snapshot: Snapshot, stored_at: DateTime<Utc>) {
        let entry = CacheEntry { snapshot, stored_at };
        let version = self.bump(symbol);
        self.memory.insert(symbol.clone(), entry.clone());

        if self.store.is_some() {
            let cache = self.clone();
            let symbol = symbol.clone();
            tokio::spawn(async move {
                cache.write_through(&symbol, version, &entry).await;
            });
        }
    }

    async fn write_through(&self, symbol: &Symbol, version: u64, entry: &CacheEntry) {
        let Some(store) = &self.store else {
            return;
        };
        let _writing = self.writes.lock().await;
        let current = self.versions.get(symbol).map(|v| *v);
        if current != Some(version) {
            tracing::debug!(
                "Skipping write of {} generation {}: superseded",
                symbol,
                entry.snapshot.generation
            );
            return;
        }
        if let Err(e) = store.put_json(&Self::key(symbol), entry).await {
            tracing::warn!("Failed to persist snapshot for {}: {}", symbol, e);
        }
    }

    pub async fn load(&self, symbol: &Symbol) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(symbol) {
            return Some(entry.clone());
        }

        let store = self.store.as_ref()?;
        match store.get_json::<CacheEntry>(&Self::key(symbol)).await {
            Ok(Some(entry)) if entry.snapshot.symbol == *symbol => {
                self.memory.insert(symbol.clone(), entry.clone());
                Some(entry)
            }
            Ok(Some(_)) => {
                tracing::debug!("Cached snapshot for {} belongs to another symbol, ignoring", symbol);
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Treating unreadable cache entry for {} as absent: {}", symbol, e);
                None
            }
        }
    }

    /// Remove the entry. Pending background writes for `symbol` are dropped.
    pub async fn clear(&self, symbol: &Symbol) {
        self.bump(symbol);
        self.memory.remove(symbol);
        if let Some(store) = &self.store {
            let _writing = self.writes.lock().await;
            if let Err(e) = store.remove(&Self::key(symbol)).await {
                tracing::warn!("Failed to remove cached snapshot for {}: {}", symbol, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_snapshot;
    use std::time::Duration;

    #[tokio::test]
    async fn test_store_overwrites_and_clear_removes() {
        let store = LocalStore::in_memory().await.unwrap();
        let cache = SnapshotCache::new(Some(store));
        let sym = Symbol::parse("AAPL").unwrap();

        cache.store(&sym, sample_snapshot("AAPL", 1, 100.0), Utc::now()).await;
        cache.store(&sym, sample_snapshot("AAPL", 2, 101.0), Utc::now()).await;

        let entry = cache.load(&sym).await.unwrap();
        assert_eq!(entry.snapshot.generation, 2);
        assert_eq!(entry.snapshot.quote.price, 101.0);

        cache.clear(&sym).await;
        assert!(cache.load(&sym).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_absent() {
        let store = LocalStore::in_memory().await.unwrap();
        store.put_raw("snapshot:MSFT", "{\"snapshot\": 42").await.unwrap();

        let cache = SnapshotCache::new(Some(store));
        assert!(cache.load(&Symbol::parse("MSFT").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("candl.db").display());
        let sym = Symbol::parse("NVDA").unwrap();

        {
            let cache = SnapshotCache::new(Some(LocalStore::connect(&url).await.unwrap()));
            cache.store(&sym, sample_snapshot("NVDA", 7, 120.5), Utc::now()).await;
        }

        let reopened = SnapshotCache::new(Some(LocalStore::connect(&url).await.unwrap()));
        let entry = reopened.load(&sym).await.unwrap();
        assert_eq!(entry.snapshot.generation, 7);
        assert_eq!(entry.snapshot.symbol, sym);
    }

    #[tokio::test]
    async fn test_clear_drops_pending_background_write() {
        let store = LocalStore::in_memory().await.unwrap();
        let cache = SnapshotCache::new(Some(store.clone()));
        let sym = Symbol::parse("AAPL").unwrap();

        cache.store_in_background(&sym, sample_snapshot("AAPL", 1, 100.0), Utc::now());
        cache.clear(&sym).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get_raw("snapshot:AAPL").await.unwrap().is_none());
        let reopened = SnapshotCache::new(Some(store));
        assert!(reopened.load(&sym).await.is_none());
    }

    #[tokio::test]
    async fn test_older_background_write_never_lands_last() {
        let store = LocalStore::in_memory().await.unwrap();
        let cache = SnapshotCache::new(Some(store.clone()));
        let sym = Symbol::parse("AAPL").unwrap();

        cache.store_in_background(&sym, sample_snapshot("AAPL", 1, 100.0), Utc::now());
        cache.store_in_background(&sym, sample_snapshot("AAPL", 2, 101.0), Utc::now());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reopened = SnapshotCache::new(Some(store));
        assert_eq!(reopened.load(&sym).await.unwrap().snapshot.generation, 2);
    }

    #[tokio::test]
    async fn test_memory_only_cache() {
        let cache = SnapshotCache::memory_only();
        let sym = Symbol::parse("TSLA").unwrap();
        assert!(cache.load(&sym).await.is_none());
        cache.store_in_background(&sym, sample_snapshot("TSLA", 3, 200.0), Utc::now());
        assert_eq!(cache.load(&sym).await.unwrap().snapshot.generation, 3);
    }
}
