//! Cache snapshot bridge.
//!
//! Moves the serialized query cache in and out of the store under a single
//! fixed key. The payload is never inspected; only its age and buster are
//! checked on restore.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{payload_digest, OfflineStore, SnapshotStamp};

pub use crate::store::CacheSnapshot;

/// Key of the single snapshot record.
pub const SNAPSHOT_KEY: &str = "client";

/// Snapshots older than this are discarded on restore unless configured otherwise.
pub fn default_max_age() -> Duration {
  Duration::hours(24)
}

#[derive(Clone)]
pub struct SnapshotBridge {
  store: Arc<dyn OfflineStore>,
  max_age: Option<Duration>,
  buster: String,
}

impl SnapshotBridge {
  pub fn new(store: Arc<dyn OfflineStore>) -> Self {
    Self {
      store,
      max_age: Some(default_max_age()),
      buster: String::new(),
    }
  }

  /// `None` keeps snapshots regardless of age.
  pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
    self.buster = buster.into();
    self
  }

  /// Overwrite the stored snapshot.
  pub fn persist(&self, snapshot: &CacheSnapshot) -> Result<()> {
    self.store.put_snapshot(SNAPSHOT_KEY, snapshot)?;
    debug!(bytes = snapshot.payload.len(), "persisted cache snapshot");
    Ok(())
  }

  /// Persist `payload` under the configured buster with a fresh timestamp.
  pub fn persist_payload(&self, payload: &[u8]) -> Result<()> {
    self.persist(&CacheSnapshot::new(payload).with_buster(self.buster.clone()))
  }

  /// Persist `payload` unless the stored snapshot has the same payload and buster.
  ///
  /// Returns whether a write happened.
  pub fn persist_if_changed(&self, payload: &[u8]) -> Result<bool> {
    let stamp = SnapshotStamp {
      digest: payload_digest(payload),
      buster: self.buster.clone(),
    };
    if self.store.snapshot_stamp(SNAPSHOT_KEY)?.as_ref() == Some(&stamp) {
      return Ok(false);
    }

    self.persist_payload(payload)?;
    Ok(true)
  }

  /// The stored snapshot, or `None` when there is none or it was discarded.
  pub fn restore(&self) -> Result<Option<CacheSnapshot>> {
    let Some(snapshot) = self.store.get_snapshot(SNAPSHOT_KEY)? else {
      return Ok(None);
    };

    if snapshot.buster != self.buster {
      info!(
        stored = %snapshot.buster,
        expected = %self.buster,
        "discarding cache snapshot with stale buster"
      );
      self.remove()?;
      return Ok(None);
    }

    if let Some(max_age) = self.max_age {
      if Utc::now() - snapshot.persisted_at > max_age {
        info!(persisted_at = %snapshot.persisted_at, "discarding expired cache snapshot");
        self.remove()?;
        return Ok(None);
      }
    }

    Ok(Some(snapshot))
  }

  /// Delete the stored snapshot, if any.
  pub fn remove(&self) -> Result<()> {
    self.store.delete_snapshot(SNAPSHOT_KEY)
  }
}
