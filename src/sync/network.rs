//! Online/offline signal with change notifications.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::transport::Transport;

/// Shared connectivity state. Clones observe and publish the same signal.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Publish the current connectivity. Subscribers are only woken on change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Probe `health_path` once and publish the result.
  pub async fn probe<T: Transport>(&self, transport: &T, health_path: &str) -> bool {
    let online = match transport.get(health_path, &BTreeMap::new()).await {
      Ok(response) => response.is_success(),
      Err(e) => {
        debug!(error = %e, "health probe failed");
        false
      }
    };
    self.set_online(online);
    online
  }

  /// Probe `health_path` every `interval` until the task is aborted.
  pub fn spawn_probe<T: Transport>(
    &self,
    transport: Arc<T>,
    health_path: String,
    interval: Duration,
  ) -> JoinHandle<()> {
    let monitor = self.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        monitor.probe(transport.as_ref(), &health_path).await;
      }
    })
  }
}
