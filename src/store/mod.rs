//! Durable storage for queued requests and the query cache snapshot.
//!
//! The store is injected wherever it is needed (`Arc<dyn OfflineStore>`);
//! tests open a private in-memory instance each.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CacheSnapshot, OfflineStore, SnapshotStamp};

pub(crate) use traits::payload_digest;
