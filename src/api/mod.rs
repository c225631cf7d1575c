//! KitchenCoach API client.
//!
//! Mutations go straight to the server when online and are queued through
//! [`crate::queue::OfflineQueue`] otherwise. Reads go through the query cache.

mod client;
pub mod types;

pub use client::{Dispatch, Identity, KitchenCoachClient, API_BASE};
