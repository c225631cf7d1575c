//! Deferred request queue.
//!
//! Mutations that cannot reach the server are captured as [`QueuedRequest`]s
//! and persisted through the injected [`OfflineStore`]. Replay happens
//! elsewhere (see `sync::ReplayEngine`).

mod request;

pub use request::{Method, QueuedRequest, IDEMPOTENCY_KEY_HEADER};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::OfflineStore;
use crate::sync::{WorkerHandle, SYNC_REQUESTS_TAG};

/// Entry point for queueing requests while offline.
#[derive(Clone)]
pub struct OfflineQueue {
  store: Arc<dyn OfflineStore>,
  worker: Option<WorkerHandle>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn OfflineStore>) -> Self {
    Self {
      store,
      worker: None,
    }
  }

  /// Arm background sync on this worker whenever a request is queued.
  pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
    self.worker = Some(worker);
    self
  }

  /// Persist `request` for later replay.
  ///
  /// The entry is durable once this returns. Arming background sync is
  /// best-effort: the reconnect trigger replays the queue regardless.
  pub async fn enqueue(&self, request: QueuedRequest) -> Result<()> {
    self.store.put_request(&request)?;

    info!(
      id = %request.id,
      method = %request.method,
      url = %request.url,
      "queued request for later sync"
    );

    self.arm_background_sync();
    Ok(())
  }

  fn arm_background_sync(&self) {
    match &self.worker {
      Some(worker) => {
        if let Err(e) = worker.register_sync(SYNC_REQUESTS_TAG) {
          warn!(error = %e, "background sync registration failed");
        }
      }
      None => debug!("no sync worker; relying on reconnect trigger"),
    }
  }

  /// Pending requests, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    self.store.get_all_requests()
  }

  /// Number of changes waiting to be synced.
  pub fn pending_count(&self) -> Result<usize> {
    self.store.count_requests()
  }

  /// Drop a queued request without sending it.
  pub fn remove(&self, id: &str) -> Result<()> {
    self.store.delete_request(id)?;
    info!(id, "removed queued request");
    Ok(())
  }
}
