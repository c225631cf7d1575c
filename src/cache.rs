//! Query cache persisted through the snapshot bridge.
//!
//! Holds the last fetched JSON for each query key, serves it when the
//! network is unavailable, and writes the whole cache back to the snapshot
//! after every successful fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{OfflineError, Result};
use crate::snapshot::SnapshotBridge;
use crate::sync::NetworkMonitor;

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving cached data
  Offline,
}

/// Result from a cache lookup, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was fetched from the network
  pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedQuery {
  data: Value,
  fetched_at: DateTime<Utc>,
}

/// Serialized form stored in the snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueries {
  queries: BTreeMap<String, CachedQuery>,
}

pub struct QueryCache {
  bridge: SnapshotBridge,
  monitor: NetworkMonitor,
  entries: Mutex<BTreeMap<String, CachedQuery>>,
}

impl QueryCache {
  pub fn new(bridge: SnapshotBridge, monitor: NetworkMonitor) -> Self {
    Self {
      bridge,
      monitor,
      entries: Mutex::new(BTreeMap::new()),
    }
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CachedQuery>>> {
    self
      .entries
      .lock()
      .map_err(|e| OfflineError::storage(format!("Lock poisoned: {}", e)))
  }

  /// Load the persisted snapshot into memory. Returns the number of queries restored.
  ///
  /// An unreadable payload is logged and ignored.
  pub fn restore(&self) -> Result<usize> {
    let Some(snapshot) = self.bridge.restore()? else {
      return Ok(0);
    };

    let persisted: PersistedQueries = match serde_json::from_slice(&snapshot.payload) {
      Ok(persisted) => persisted,
      Err(e) => {
        warn!(error = %e, "ignoring unreadable cache snapshot");
        return Ok(0);
      }
    };

    let count = persisted.queries.len();
    *self.entries()? = persisted.queries;
    debug!(count, "restored query cache");
    Ok(count)
  }

  /// Cached data for `key`, if any.
  pub fn get(&self, key: &str) -> Result<Option<CacheResult<Value>>> {
    Ok(self.entries()?.get(key).map(|cached| CacheResult {
      data: cached.data.clone(),
      source: CacheSource::Offline,
      fetched_at: cached.fetched_at,
    }))
  }

  /// Fetch `key` from the network when online, falling back to the cache.
  ///
  /// 1. Offline: serve the cached value
  /// 2. Online: run the fetcher; store the result and persist the cache
  /// 3. Fetch failed with a network error: serve the cached value
  ///
  /// With nothing cached, the network error is returned.
  pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    if !self.monitor.is_online() {
      return self
        .get(key)?
        .ok_or_else(|| OfflineError::network(format!("offline and nothing cached for {}", key)));
    }

    match fetcher().await {
      Ok(data) => {
        let fetched_at = Utc::now();
        self.store(key, data.clone(), fetched_at)?;
        Ok(CacheResult {
          data,
          source: CacheSource::Network,
          fetched_at,
        })
      }
      Err(OfflineError::Network(message)) => match self.get(key)? {
        Some(cached) => {
          debug!(key, error = %message, "network failed; serving cached data");
          Ok(cached)
        }
        None => Err(OfflineError::Network(message)),
      },
      Err(e) => Err(e),
    }
  }

  /// Record a fetch result and rewrite the snapshot.
  ///
  /// Unchanged data is written too, so the snapshot's age tracks the last
  /// successful fetch.
  fn store(&self, key: &str, data: Value, fetched_at: DateTime<Utc>) -> Result<()> {
    let payload = {
      let mut entries = self.entries()?;
      entries.insert(key.to_string(), CachedQuery { data, fetched_at });

      let persisted = PersistedQueries {
        queries: entries.clone(),
      };
      serde_json::to_vec(&persisted)?
    };

    // A failed snapshot only means a colder restart
    if let Err(e) = self.bridge.persist_payload(&payload) {
      warn!(error = %e, "failed to persist query cache");
    }
    Ok(())
  }

  /// Forget every cached query and delete the snapshot (logout/reset).
  pub fn clear(&self) -> Result<()> {
    self.entries()?.clear();
    self.bridge.remove()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{OfflineStore, SqliteStore};
  use serde_json::json;
  use std::sync::Arc;

  fn cache(store: Arc<dyn OfflineStore>, online: bool) -> (QueryCache, NetworkMonitor) {
    let monitor = NetworkMonitor::new(online);
    let cache = QueryCache::new(SnapshotBridge::new(store), monitor.clone());
    (cache, monitor)
  }

  fn memory() -> Arc<dyn OfflineStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_fetch_online_returns_network_data() {
    let (cache, _) = cache(memory(), true);

    let result = cache
      .fetch("training/modules", || async { Ok::<_, OfflineError>(json!([{ "id": "m-1" }])) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, json!([{ "id": "m-1" }]));
  }

  #[tokio::test]
  async fn test_offline_serves_cached_data() {
    let (cache, monitor) = cache(memory(), true);
    cache
      .fetch("training/modules", || async { Ok::<_, OfflineError>(json!(["cached"])) })
      .await
      .unwrap();

    monitor.set_online(false);
    let result = cache
      .fetch("training/modules", || async {
        Err::<Value, _>(OfflineError::invalid_request("fetched while offline"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!(["cached"]));
  }

  #[tokio::test]
  async fn test_network_failure_falls_back_to_cache() {
    let (cache, _) = cache(memory(), true);
    cache
      .fetch("k", || async { Ok::<_, OfflineError>(json!(1)) })
      .await
      .unwrap();

    let result = cache
      .fetch("k", || async { Err::<Value, _>(OfflineError::network("timeout")) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!(1));
  }

  #[tokio::test]
  async fn test_offline_without_cache_is_error() {
    let (cache, _) = cache(memory(), false);
    let result = cache.fetch("k", || async { Ok::<_, OfflineError>(json!(1)) }).await;
    assert!(matches!(result, Err(OfflineError::Network(_))));
  }

  #[tokio::test]
  async fn test_response_errors_are_not_masked() {
    let (cache, _) = cache(memory(), true);
    cache.fetch("k", || async { Ok::<_, OfflineError>(json!(1)) }).await.unwrap();

    let result = cache
      .fetch("k", || async { Err::<Value, _>(OfflineError::response(403, "forbidden")) })
      .await;
    assert!(matches!(result, Err(OfflineError::Response { status: 403, .. })));
  }

  #[tokio::test]
  async fn test_restore_after_restart() {
    let store = memory();
    {
      let (cache, _) = cache(Arc::clone(&store), true);
      cache
        .fetch("training/modules", || async { Ok::<_, OfflineError>(json!([{ "id": "m-1" }])) })
        .await
        .unwrap();
    }

    let (restarted, _) = cache(store, false);
    assert_eq!(restarted.restore().unwrap(), 1);

    let result = restarted
      .fetch("training/modules", || async { Ok::<_, OfflineError>(json!(null)) })
      .await
      .unwrap();
    assert_eq!(result.data, json!([{ "id": "m-1" }]));
  }

  #[tokio::test]
  async fn test_refetch_of_same_data_keeps_snapshot_fresh() {
    let store = memory();
    let max_age = Some(chrono::Duration::milliseconds(300));
    let monitor = NetworkMonitor::new(true);
    let cache = QueryCache::new(
      SnapshotBridge::new(Arc::clone(&store)).with_max_age(max_age),
      monitor.clone(),
    );

    cache
      .fetch("training/modules", || async { Ok::<_, OfflineError>(json!([1])) })
      .await
      .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    cache
      .fetch("training/modules", || async { Ok::<_, OfflineError>(json!([1])) })
      .await
      .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let restarted = QueryCache::new(
      SnapshotBridge::new(store).with_max_age(max_age),
      monitor,
    );
    assert_eq!(restarted.restore().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_unreadable_snapshot_is_ignored() {
    let store = memory();
    SnapshotBridge::new(Arc::clone(&store))
      .persist_if_changed(b"not json")
      .unwrap();

    let (cache, _) = cache(store, true);
    assert_eq!(cache.restore().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_clear_removes_snapshot() {
    let store = memory();
    let (cache, _) = cache(Arc::clone(&store), true);
    cache.fetch("k", || async { Ok::<_, OfflineError>(json!(1)) }).await.unwrap();

    cache.clear().unwrap();

    assert!(cache.get("k").unwrap().is_none());
    assert!(SnapshotBridge::new(store).restore().unwrap().is_none());
  }
}
