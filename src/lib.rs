//! Offline outbox and cache persistence for the KitchenCoach client.
//!
//! Writes made while offline are persisted to a local queue and replayed in
//! order once connectivity returns. The query cache is snapshotted to the
//! same store so a restart begins warm.

pub mod api;
pub mod cache;
pub mod error;
pub mod queue;
pub mod snapshot;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{OfflineError, Result};
