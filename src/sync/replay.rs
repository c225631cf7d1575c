//! Replay of queued requests against the live network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::network::NetworkMonitor;
use super::transport::Transport;
use crate::error::{OfflineError, Result};
use crate::queue::QueuedRequest;
use crate::store::OfflineStore;

/// How a `replay_all` call ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayOutcome {
  /// Every pending entry was attempted
  #[default]
  Completed,
  /// Offline; nothing was attempted
  SkippedOffline,
  /// Another replay was in flight and will run again on our behalf
  Coalesced,
  /// The queue could not be read
  StorageUnavailable,
}

/// Counters from one `replay_all` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub outcome: ReplayOutcome,
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Entries still queued when the call returned
  pub remaining: usize,
}

impl ReplayReport {
  fn with_outcome(outcome: ReplayOutcome) -> Self {
    Self {
      outcome,
      ..Self::default()
    }
  }
}

struct EngineInner<T> {
  store: Arc<dyn OfflineStore>,
  transport: Arc<T>,
  monitor: NetworkMonitor,
  in_flight: Mutex<()>,
  rerun: AtomicBool,
}

/// Drains the queue in FIFO order.
///
/// Clones share one single-flight lock: a call that overlaps a running
/// replay returns `Coalesced` and the running replay makes one more pass.
pub struct ReplayEngine<T: Transport> {
  inner: Arc<EngineInner<T>>,
}

impl<T: Transport> Clone for ReplayEngine<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Transport> ReplayEngine<T> {
  pub fn new(store: Arc<dyn OfflineStore>, transport: Arc<T>, monitor: NetworkMonitor) -> Self {
    Self {
      inner: Arc::new(EngineInner {
        store,
        transport,
        monitor,
        in_flight: Mutex::new(()),
        rerun: AtomicBool::new(false),
      }),
    }
  }

  /// Number of requests waiting to be replayed.
  pub fn pending_count(&self) -> Result<usize> {
    self.inner.store.count_requests()
  }

  /// Attempt every pending request once, oldest first.
  ///
  /// Never fails: per-entry failures are logged and the entry stays queued
  /// for the next trigger.
  pub async fn replay_all(&self) -> ReplayReport {
    let inner = &self.inner;

    if !inner.monitor.is_online() {
      debug!("offline; skipping replay");
      return ReplayReport::with_outcome(ReplayOutcome::SkippedOffline);
    }

    // Set before trying the lock so a holder that is about to release
    // still observes the request once it has.
    inner.rerun.store(true, Ordering::SeqCst);
    let mut guard = match inner.in_flight.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("replay already in flight; coalescing");
        return ReplayReport::with_outcome(ReplayOutcome::Coalesced);
      }
    };

    let mut report = ReplayReport::default();
    loop {
      while inner.rerun.swap(false, Ordering::SeqCst) && inner.monitor.is_online() {
        self.replay_pass(&mut report).await;
        if report.outcome == ReplayOutcome::StorageUnavailable {
          break;
        }
      }

      report.remaining = match inner.store.count_requests() {
        Ok(count) => count,
        Err(e) => {
          warn!(error = %e, "failed to count pending requests");
          report.failed
        }
      };
      drop(guard);

      // A call coalesced after the last pass is ours to serve
      if report.outcome == ReplayOutcome::StorageUnavailable
        || !inner.rerun.load(Ordering::SeqCst)
        || !inner.monitor.is_online()
      {
        break;
      }
      guard = match inner.in_flight.try_lock() {
        Ok(guard) => guard,
        // Whoever holds it now drains on our behalf
        Err(_) => break,
      };
      debug!("replay requested during pass; draining again");
    }

    if report.attempted > 0 {
      info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        remaining = report.remaining,
        "replay finished"
      );
    }

    report
  }

  async fn replay_pass(&self, report: &mut ReplayReport) {
    let entries = match self.inner.store.get_all_requests() {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "failed to read queued requests");
        report.outcome = ReplayOutcome::StorageUnavailable;
        return;
      }
    };

    for entry in entries {
      report.attempted += 1;
      match self.replay_one(&entry).await {
        Ok(()) => {
          report.succeeded += 1;
          debug!(id = %entry.id, method = %entry.method, url = %entry.url, "replayed request");
        }
        Err(e) => {
          report.failed += 1;
          warn!(
            id = %entry.id,
            method = %entry.method,
            url = %entry.url,
            transient = e.is_transient(),
            error = %e,
            "failed to replay request; keeping it queued"
          );
        }
      }
    }
  }

  async fn replay_one(&self, entry: &QueuedRequest) -> Result<()> {
    let response = self.inner.transport.send(entry).await?;
    if !response.is_success() {
      return Err(OfflineError::response(response.status, response.body_text()));
    }

    // A failed delete leaves a delivered request queued; it will be sent again
    self.inner.store.delete_request(&entry.id)
  }
}
