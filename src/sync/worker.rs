//! Background sync worker.
//!
//! Runs as its own task, detached from whoever queued the work. It replays
//! the queue when asked to, and fires registered background-sync tags once
//! connectivity is available.

use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::network::NetworkMonitor;
use super::replay::ReplayEngine;
use super::transport::Transport;
use crate::error::{OfflineError, Result};

/// Background-sync tag armed by the queue.
pub const SYNC_REQUESTS_TAG: &str = "sync-requests";

/// Messages accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
  /// Replay the queue now
  SyncQueue,
  /// Fire this tag once connectivity is available
  Register(String),
}

/// Sending side of the worker channel.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  pub fn post(&self, message: WorkerMessage) -> Result<()> {
    self
      .tx
      .send(message)
      .map_err(|_| OfflineError::WorkerUnavailable)
  }

  pub fn register_sync(&self, tag: &str) -> Result<()> {
    self.post(WorkerMessage::Register(tag.to_string()))
  }

  /// Whether the worker task is still receiving.
  pub fn is_reachable(&self) -> bool {
    !self.tx.is_closed()
  }

  #[cfg(test)]
  pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

/// The worker task state. Stops once every [`WorkerHandle`] is dropped.
pub struct SyncWorker<T: Transport> {
  engine: ReplayEngine<T>,
  monitor: NetworkMonitor,
  rx: mpsc::UnboundedReceiver<WorkerMessage>,
  registered: BTreeSet<String>,
}

impl<T: Transport> SyncWorker<T> {
  /// Spawn the worker on the current runtime.
  pub fn spawn(
    engine: ReplayEngine<T>,
    monitor: NetworkMonitor,
  ) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Self {
      engine,
      monitor,
      rx,
      registered: BTreeSet::new(),
    };

    let task = tokio::spawn(worker.run());
    (WorkerHandle { tx }, task)
  }

  async fn run(mut self) {
    let mut online_rx = self.monitor.subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    debug!(online = was_online, "sync worker started");

    loop {
      tokio::select! {
        message = self.rx.recv() => match message {
          Some(WorkerMessage::SyncQueue) => {
            debug!("sync requested");
            self.engine.replay_all().await;
          }
          Some(WorkerMessage::Register(tag)) => {
            self.registered.insert(tag);
            if self.monitor.is_online() {
              self.fire_registered().await;
            }
          }
          None => break,
        },
        changed = online_rx.changed() => {
          if changed.is_err() {
            break;
          }
          let online = *online_rx.borrow_and_update();
          if online && !was_online {
            self.fire_registered().await;
          }
          was_online = online;
        }
      }
    }

    debug!("sync worker stopped");
  }

  async fn fire_registered(&mut self) {
    for tag in std::mem::take(&mut self.registered) {
      match tag.as_str() {
        SYNC_REQUESTS_TAG => {
          info!(tag = %tag, "background sync fired");
          self.engine.replay_all().await;
        }
        other => warn!(tag = other, "ignoring unknown background sync tag"),
      }
    }
  }
}
