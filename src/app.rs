use crate::config::Config;
use crate::event::{Event, EventHandler};
use chrono::{DateTime, Utc};
use color_eyre::Result;
use kcsync::api::{Identity, KitchenCoachClient};
use kcsync::cache::QueryCache;
use kcsync::queue::OfflineQueue;
use kcsync::snapshot::{CacheSnapshot, SnapshotBridge, SNAPSHOT_KEY};
use kcsync::store::{OfflineStore, SqliteStore};
use kcsync::sync::{
  HttpTransport, NetworkMonitor, ReconnectTrigger, ReplayEngine, ReplayReport, SyncWorker,
  TriggerOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between status log lines in daemon mode
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Point-in-time view of the offline state.
#[derive(Debug, Clone)]
pub struct Status {
  pub online: bool,
  pub pending: usize,
  pub snapshot_persisted_at: Option<DateTime<Utc>>,
}

/// Wires the store, network and sync components together.
pub struct App {
  config: Config,
  force_offline: bool,
  store: Arc<dyn OfflineStore>,
  monitor: NetworkMonitor,
  transport: Arc<HttpTransport>,
  engine: ReplayEngine<HttpTransport>,
  bridge: SnapshotBridge,
  cache: Arc<QueryCache>,
  queue: OfflineQueue,
}

impl App {
  pub fn new(config: Config, force_offline: bool) -> Result<Self> {
    let path = match &config.storage.path {
      Some(path) => path.clone(),
      None => SqliteStore::default_path()?,
    };
    let store: Arc<dyn OfflineStore> = Arc::new(SqliteStore::open(&path)?);
    debug!(path = %path.display(), "opened offline store");

    let monitor = NetworkMonitor::new(!force_offline && !config.network.start_offline);
    let transport = Arc::new(HttpTransport::new(
      &config.api.base_url,
      config.api.request_timeout(),
    )?);
    let engine = ReplayEngine::new(Arc::clone(&store), Arc::clone(&transport), monitor.clone());

    let bridge = SnapshotBridge::new(Arc::clone(&store))
      .with_max_age(config.snapshot.max_age())
      .with_buster(config.snapshot.buster.clone());
    let cache = Arc::new(QueryCache::new(bridge.clone(), monitor.clone()));
    let queue = OfflineQueue::new(Arc::clone(&store));

    Ok(Self {
      config,
      force_offline,
      store,
      monitor,
      transport,
      engine,
      bridge,
      cache,
      queue,
    })
  }

  /// Settle connectivity with one health probe, unless forced offline.
  pub async fn connect(&self) -> bool {
    if self.force_offline {
      self.monitor.set_online(false);
      return false;
    }

    self
      .monitor
      .probe(self.transport.as_ref(), &self.config.network.health_path)
      .await
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn bridge(&self) -> &SnapshotBridge {
    &self.bridge
  }

  /// API client over the warm query cache.
  pub fn client(&self) -> Result<KitchenCoachClient<HttpTransport>> {
    self.cache.restore()?;

    Ok(KitchenCoachClient::new(
      Arc::clone(&self.transport),
      self.queue.clone(),
      self.monitor.clone(),
      Arc::clone(&self.cache),
      Identity {
        user_id: self.config.api.user_id.clone(),
        access_token: Config::access_token(),
      },
    ))
  }

  pub fn status(&self) -> Result<Status> {
    Ok(Status {
      online: self.monitor.is_online(),
      pending: self.queue.pending_count()?,
      snapshot_persisted_at: self.stored_snapshot()?.map(|s| s.persisted_at),
    })
  }

  /// The stored snapshot as-is, without freshness checks.
  pub fn stored_snapshot(&self) -> Result<Option<CacheSnapshot>> {
    Ok(self.store.get_snapshot(SNAPSHOT_KEY)?)
  }

  /// Replay the queue once in this process.
  pub async fn sync_once(&self) -> ReplayReport {
    let trigger = ReconnectTrigger::new(self.engine.clone(), self.monitor.clone(), None);
    match trigger.trigger_sync().await {
      TriggerOutcome::Replayed(report) => report,
      // Unreachable without a worker
      TriggerOutcome::Signaled => ReplayReport::default(),
    }
  }

  /// Run until Ctrl-C: probe connectivity, replay on reconnect, log status.
  pub async fn run(&self) -> Result<()> {
    let restored = self.cache.restore()?;
    info!(restored, "query cache restored");

    let (worker, worker_task) = SyncWorker::spawn(self.engine.clone(), self.monitor.clone());
    let trigger = ReconnectTrigger::new(self.engine.clone(), self.monitor.clone(), Some(worker));

    let probe_task = if self.force_offline {
      warn!("forced offline; connectivity will not be probed");
      None
    } else {
      self.connect().await;
      Some(self.monitor.spawn_probe(
        Arc::clone(&self.transport),
        self.config.network.health_path.clone(),
        self.config.network.probe_interval(),
      ))
    };
    let trigger_task = trigger.spawn();

    info!(
      base_url = %self.transport.base_url(),
      online = self.monitor.is_online(),
      "sync daemon started"
    );

    let mut events = EventHandler::new(STATUS_INTERVAL);
    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          match self.queue.pending_count() {
            Ok(pending) => info!(pending, online = self.monitor.is_online(), "status"),
            Err(e) => warn!(error = %e, "failed to count pending requests"),
          }
          // Requests queued by one-shot CLI calls never arm this worker
          if let Err(e) = trigger.trigger_if_pending().await {
            warn!(error = %e, "pending sweep failed");
          }
        }
        Event::Shutdown => break,
      }
    }

    info!("shutting down");
    trigger_task.abort();
    if let Some(task) = probe_task {
      task.abort();
    }
    worker_task.abort();

    Ok(())
  }
}
