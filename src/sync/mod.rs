//! Getting queued requests back onto the network.
//!
//! - [`NetworkMonitor`] owns the online/offline signal
//! - [`ReplayEngine`] drains the queue, single-flight
//! - [`SyncWorker`] is the background task that replays on request or when a
//!   registered sync tag fires
//! - [`ReconnectTrigger`] reacts to connectivity changes and picks a path

mod network;
mod replay;
mod transport;
mod trigger;
mod worker;

pub use network::NetworkMonitor;
pub use replay::{ReplayEngine, ReplayOutcome, ReplayReport};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use trigger::{ReconnectTrigger, TriggerOutcome, TriggerState};
pub use worker::{SyncWorker, WorkerHandle, WorkerMessage, SYNC_REQUESTS_TAG};
