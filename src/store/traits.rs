//! Storage trait and record types shared by the queue and the snapshot bridge.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::queue::QueuedRequest;

/// The persisted state of the client query cache.
///
/// The payload is opaque to the store and to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
  pub payload: Vec<u8>,
  /// Version tag; a snapshot written under a different buster is discarded on restore
  pub buster: String,
  pub persisted_at: DateTime<Utc>,
}

impl CacheSnapshot {
  pub fn new(payload: impl Into<Vec<u8>>) -> Self {
    Self {
      payload: payload.into(),
      buster: String::new(),
      persisted_at: Utc::now(),
    }
  }

  pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
    self.buster = buster.into();
    self
  }

  /// SHA-256 of the payload, hex encoded.
  pub fn digest(&self) -> String {
    payload_digest(&self.payload)
  }
}

/// What identifies a stored snapshot's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStamp {
  pub digest: String,
  pub buster: String,
}

pub(crate) fn payload_digest(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}

/// Durable key-value store for pending requests and the cache snapshot.
///
/// Implementations must return requests in insertion order and keep an
/// entry's position when it is re-put under the same id.
pub trait OfflineStore: Send + Sync {
  /// Insert or replace a pending request, keyed by its id.
  fn put_request(&self, request: &QueuedRequest) -> Result<()>;

  /// Get a single pending request.
  fn get_request(&self, id: &str) -> Result<Option<QueuedRequest>>;

  /// All pending requests, oldest first.
  fn get_all_requests(&self) -> Result<Vec<QueuedRequest>>;

  /// Remove a pending request. Absent ids are not an error.
  fn delete_request(&self, id: &str) -> Result<()>;

  /// Number of pending requests.
  fn count_requests(&self) -> Result<usize>;

  /// Overwrite the snapshot stored under `key`.
  fn put_snapshot(&self, key: &str, snapshot: &CacheSnapshot) -> Result<()>;

  fn get_snapshot(&self, key: &str) -> Result<Option<CacheSnapshot>>;

  /// Digest and buster of the stored snapshot, without loading the payload.
  fn snapshot_stamp(&self, key: &str) -> Result<Option<SnapshotStamp>>;

  /// Remove the snapshot stored under `key`. Absent keys are not an error.
  fn delete_snapshot(&self, key: &str) -> Result<()>;
}
