//! Reconnect trigger.
//!
//! Fires on every offline -> online transition, and once at start when
//! already online. Firing hands the replay to the background worker when it
//! is reachable and otherwise replays in-process; both paths end up in the
//! same shared [`ReplayEngine`].

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::network::NetworkMonitor;
use super::replay::{ReplayEngine, ReplayReport};
use super::transport::Transport;
use super::worker::{WorkerHandle, WorkerMessage};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
  Idle,
  Triggering,
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
  /// The worker was asked to replay
  Signaled,
  /// Replay ran in-process
  Replayed(ReplayReport),
}

struct TriggerInner<T: Transport> {
  engine: ReplayEngine<T>,
  monitor: NetworkMonitor,
  worker: Option<WorkerHandle>,
  state: Mutex<TriggerState>,
}

pub struct ReconnectTrigger<T: Transport> {
  inner: Arc<TriggerInner<T>>,
}

impl<T: Transport> Clone for ReconnectTrigger<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Transport> ReconnectTrigger<T> {
  pub fn new(
    engine: ReplayEngine<T>,
    monitor: NetworkMonitor,
    worker: Option<WorkerHandle>,
  ) -> Self {
    Self {
      inner: Arc::new(TriggerInner {
        engine,
        monitor,
        worker,
        state: Mutex::new(TriggerState::Idle),
      }),
    }
  }

  pub fn state(&self) -> TriggerState {
    *self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, state: TriggerState) {
    *self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
  }

  /// Replay now, via the worker if it is reachable. Also the "retry now" entry point.
  pub async fn trigger_sync(&self) -> TriggerOutcome {
    self.set_state(TriggerState::Triggering);

    if let Some(worker) = self.inner.worker.as_ref().filter(|w| w.is_reachable()) {
      match worker.post(WorkerMessage::SyncQueue) {
        Ok(()) => {
          debug!("signaled sync worker");
          self.set_state(TriggerState::Idle);
          return TriggerOutcome::Signaled;
        }
        Err(e) => debug!(error = %e, "sync worker unreachable; replaying in-process"),
      }
    }

    let report = self.inner.engine.replay_all().await;
    self.set_state(TriggerState::Idle);
    TriggerOutcome::Replayed(report)
  }

  /// Trigger a sync when online with requests waiting.
  ///
  /// Picks up entries queued by other processes sharing the store, which
  /// never see this process's connectivity transitions.
  pub async fn trigger_if_pending(&self) -> Result<Option<TriggerOutcome>> {
    if !self.inner.monitor.is_online() || self.inner.engine.pending_count()? == 0 {
      return Ok(None);
    }
    Ok(Some(self.trigger_sync().await))
  }

  /// Listen for connectivity changes for the rest of the process.
  pub fn spawn(&self) -> JoinHandle<()> {
    let trigger = self.clone();

    tokio::spawn(async move {
      let mut online_rx = trigger.inner.monitor.subscribe();
      let mut was_online = *online_rx.borrow_and_update();

      if was_online {
        info!("online at start; triggering sync");
        trigger.trigger_sync().await;
      }

      while online_rx.changed().await.is_ok() {
        let online = *online_rx.borrow_and_update();
        if online && !was_online {
          info!("connectivity restored; triggering sync");
          trigger.trigger_sync().await;
        }
        was_online = online;
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{Method, OfflineQueue, QueuedRequest};
  use crate::store::{OfflineStore, SqliteStore};
  use crate::sync::{ReplayOutcome, SyncWorker};
  use crate::testing::RecordingTransport;
  use std::time::Duration;

  struct Fixture {
    store: Arc<dyn OfflineStore>,
    queue: OfflineQueue,
    transport: RecordingTransport,
    monitor: NetworkMonitor,
    engine: ReplayEngine<RecordingTransport>,
  }

  fn fixture(online: bool) -> Fixture {
    let store: Arc<dyn OfflineStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let transport = RecordingTransport::new();
    let monitor = NetworkMonitor::new(online);
    let engine = ReplayEngine::new(
      Arc::clone(&store),
      Arc::new(transport.clone()),
      monitor.clone(),
    );
    Fixture {
      queue: OfflineQueue::new(Arc::clone(&store)),
      store,
      transport,
      monitor,
      engine,
    }
  }

  async fn settle(done: impl Fn() -> bool) {
    for _ in 0..100 {
      if done() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  #[tokio::test]
  async fn test_trigger_without_worker_replays_directly() {
    let f = fixture(true);
    f.queue
      .enqueue(QueuedRequest::new(Method::Post, "/api/v1/checklists/c-1/start"))
      .await
      .unwrap();
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), None);

    let outcome = trigger.trigger_sync().await;

    match outcome {
      TriggerOutcome::Replayed(report) => {
        assert_eq!(report.outcome, ReplayOutcome::Completed);
        assert_eq!(report.succeeded, 1);
      }
      other => panic!("expected in-process replay, got {:?}", other),
    }
    assert_eq!(trigger.state(), TriggerState::Idle);
    assert_eq!(f.store.count_requests().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_trigger_with_worker_signals() {
    let f = fixture(true);
    let (handle, mut rx) = WorkerHandle::channel();
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), Some(handle));

    assert_eq!(trigger.trigger_sync().await, TriggerOutcome::Signaled);
    assert_eq!(rx.try_recv().unwrap(), WorkerMessage::SyncQueue);
    assert!(f.transport.sent().is_empty());
    assert_eq!(trigger.state(), TriggerState::Idle);
  }

  #[tokio::test]
  async fn test_unreachable_worker_falls_back_to_direct_replay() {
    let f = fixture(true);
    f.queue
      .enqueue(QueuedRequest::new(Method::Put, "/api/v1/training/assignments/a-1/start"))
      .await
      .unwrap();
    let (handle, rx) = WorkerHandle::channel();
    drop(rx);
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), Some(handle));

    assert!(matches!(
      trigger.trigger_sync().await,
      TriggerOutcome::Replayed(_)
    ));
    assert_eq!(f.store.count_requests().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_fires_on_start_when_online() {
    let f = fixture(true);
    f.queue
      .enqueue(QueuedRequest::new(Method::Post, "/api/v1/training/assign"))
      .await
      .unwrap();
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), None);

    let _task = trigger.spawn();
    settle(|| f.store.count_requests().unwrap() == 0).await;

    assert_eq!(f.transport.sent_urls(), vec!["/api/v1/training/assign"]);
  }

  #[tokio::test]
  async fn test_offline_post_replayed_once_after_reconnect() {
    let f = fixture(false);
    let (handle, _worker) = SyncWorker::spawn(f.engine.clone(), f.monitor.clone());
    let queue = f.queue.clone().with_worker(handle.clone());
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), Some(handle));
    let _listener = trigger.spawn();

    let body = serde_json::json!({ "title": "Test" });
    queue
      .enqueue(
        QueuedRequest::new(Method::Post, "/api/v1/training/modules")
          .with_json(&body)
          .unwrap(),
      )
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(f.transport.sent().is_empty());

    // Both the worker's tag and the trigger fire on this transition
    f.monitor.set_online(true);
    settle(|| f.store.count_requests().unwrap() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = f.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Post);
    assert_eq!(sent[0].url, "/api/v1/training/modules");
    assert_eq!(sent[0].body_text(), Some(r#"{"title":"Test"}"#));
    assert_eq!(f.store.count_requests().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_sweep_signals_worker_for_externally_queued_requests() {
    let f = fixture(true);
    let (handle, mut rx) = WorkerHandle::channel();
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), Some(handle));

    assert_eq!(trigger.trigger_if_pending().await.unwrap(), None);

    // Written by another process: no worker registration, no transition
    f.store
      .put_request(&QueuedRequest::new(Method::Post, "/api/v1/checklists/c-1/start"))
      .unwrap();

    assert_eq!(
      trigger.trigger_if_pending().await.unwrap(),
      Some(TriggerOutcome::Signaled)
    );
    assert_eq!(rx.try_recv().unwrap(), WorkerMessage::SyncQueue);
  }

  #[tokio::test]
  async fn test_sweep_replays_directly_and_skips_when_offline() {
    let f = fixture(false);
    f.store
      .put_request(&QueuedRequest::new(Method::Post, "/api/v1/training/assign"))
      .unwrap();
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), None);

    assert_eq!(trigger.trigger_if_pending().await.unwrap(), None);
    assert!(f.transport.sent().is_empty());

    f.monitor.set_online(true);
    let outcome = trigger.trigger_if_pending().await.unwrap();

    assert!(matches!(outcome, Some(TriggerOutcome::Replayed(_))));
    assert_eq!(f.transport.sent_urls(), vec!["/api/v1/training/assign"]);
    assert_eq!(f.store.count_requests().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_going_offline_does_not_fire() {
    let f = fixture(true);
    let trigger = ReconnectTrigger::new(f.engine.clone(), f.monitor.clone(), None);
    let _task = trigger.spawn();
    tokio::time::sleep(Duration::from_millis(20)).await;

    f.queue
      .enqueue(QueuedRequest::new(Method::Post, "/x"))
      .await
      .unwrap();
    f.monitor.set_online(false);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(f.transport.sent().is_empty());
    assert_eq!(f.store.count_requests().unwrap(), 1);
  }
}
