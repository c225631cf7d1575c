//! SQLite implementation of the offline store.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{CacheSnapshot, OfflineStore, SnapshotStamp};
use crate::error::{OfflineError, Result};
use crate::queue::QueuedRequest;

/// SQLite-backed store holding one long-lived connection.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| OfflineError::storage(format!("Failed to create store directory: {}", e)))?;
      }
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::storage(format!(
        "Failed to open offline store at {}: {}",
        path.display(),
        e
      ))
    })?;

    // The daemon and one-shot CLI invocations may share the file
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| OfflineError::storage(format!("Failed to set busy timeout: {}", e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    tracing::debug!(path = %path.display(), "opened offline store");
    Ok(store)
  }

  /// Open a private in-memory store. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| OfflineError::storage(format!("Failed to open in-memory store: {}", e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database location under the user data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| OfflineError::storage("Could not determine data directory"))?;

    Ok(data_dir.join("kcsync").join("offline.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| OfflineError::storage(format!("Lock poisoned: {}", e)))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(OFFLINE_SCHEMA)
      .map_err(|e| OfflineError::storage(format!("Failed to run store migrations: {}", e)))
  }
}

/// Schema for the request queue and the snapshot record.
const OFFLINE_SCHEMA: &str = r#"
-- Pending mutations; seq preserves insertion order across upserts
CREATE TABLE IF NOT EXISTS requests (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL
);

-- Fixed-key query cache snapshots
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    digest TEXT NOT NULL,
    buster TEXT NOT NULL,
    persisted_at TEXT NOT NULL
);
"#;

/// A request row as stored, before its text columns are parsed.
struct RequestRow {
  id: String,
  method: String,
  url: String,
  headers: String,
  body: Option<Vec<u8>>,
  enqueued_at: String,
}

impl RequestRow {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      method: row.get(1)?,
      url: row.get(2)?,
      headers: row.get(3)?,
      body: row.get(4)?,
      enqueued_at: row.get(5)?,
    })
  }

  fn into_request(self) -> Result<QueuedRequest> {
    let method = self
      .method
      .parse()
      .map_err(|e| OfflineError::storage(format!("Corrupt request {}: {}", self.id, e)))?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers)
      .map_err(|e| OfflineError::storage(format!("Corrupt headers for {}: {}", self.id, e)))?;
    let enqueued_at = parse_timestamp(&self.enqueued_at)?;

    Ok(QueuedRequest {
      id: self.id,
      url: self.url,
      method,
      headers,
      body: self.body,
      enqueued_at,
    })
  }
}

const SELECT_REQUEST: &str =
  "SELECT id, method, url, headers, body, enqueued_at FROM requests";

impl OfflineStore for SqliteStore {
  fn put_request(&self, request: &QueuedRequest) -> Result<()> {
    let headers = serde_json::to_string(&request.headers)?;
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT INTO requests (id, method, url, headers, body, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           method = excluded.method,
           url = excluded.url,
           headers = excluded.headers,
           body = excluded.body,
           enqueued_at = excluded.enqueued_at",
        params![
          request.id,
          request.method.as_str(),
          request.url,
          headers,
          request.body,
          format_timestamp(&request.enqueued_at),
        ],
      )
      .map_err(|e| OfflineError::storage(format!("Failed to store request: {}", e)))?;

    Ok(())
  }

  fn get_request(&self, id: &str) -> Result<Option<QueuedRequest>> {
    let conn = self.conn()?;

    let row = conn
      .query_row(
        &format!("{} WHERE id = ?1", SELECT_REQUEST),
        params![id],
        RequestRow::from_row,
      )
      .optional()
      .map_err(|e| OfflineError::storage(format!("Failed to read request: {}", e)))?;

    row.map(RequestRow::into_request).transpose()
  }

  fn get_all_requests(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(&format!("{} ORDER BY seq", SELECT_REQUEST))
      .map_err(|e| OfflineError::storage(format!("Failed to prepare query: {}", e)))?;

    let rows = stmt
      .query_map([], RequestRow::from_row)
      .map_err(|e| OfflineError::storage(format!("Failed to query requests: {}", e)))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| OfflineError::storage(format!("Failed to read request row: {}", e)))?;

    rows.into_iter().map(RequestRow::into_request).collect()
  }

  fn delete_request(&self, id: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM requests WHERE id = ?1", params![id])
      .map_err(|e| OfflineError::storage(format!("Failed to delete request: {}", e)))?;
    Ok(())
  }

  fn count_requests(&self) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))
      .map_err(|e| OfflineError::storage(format!("Failed to count requests: {}", e)))?;
    Ok(count as usize)
  }

  fn put_snapshot(&self, key: &str, snapshot: &CacheSnapshot) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO snapshots (key, payload, digest, buster, persisted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          key,
          snapshot.payload,
          snapshot.digest(),
          snapshot.buster,
          format_timestamp(&snapshot.persisted_at),
        ],
      )
      .map_err(|e| OfflineError::storage(format!("Failed to store snapshot: {}", e)))?;
    Ok(())
  }

  fn get_snapshot(&self, key: &str) -> Result<Option<CacheSnapshot>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT payload, buster, persisted_at FROM snapshots WHERE key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| OfflineError::storage(format!("Failed to read snapshot: {}", e)))?;

    match row {
      Some((payload, buster, persisted_at)) => Ok(Some(CacheSnapshot {
        payload,
        buster,
        persisted_at: parse_timestamp(&persisted_at)?,
      })),
      None => Ok(None),
    }
  }

  fn snapshot_stamp(&self, key: &str) -> Result<Option<SnapshotStamp>> {
    self
      .conn()?
      .query_row(
        "SELECT digest, buster FROM snapshots WHERE key = ?1",
        params![key],
        |row| {
          Ok(SnapshotStamp {
            digest: row.get(0)?,
            buster: row.get(1)?,
          })
        },
      )
      .optional()
      .map_err(|e| OfflineError::storage(format!("Failed to read snapshot stamp: {}", e)))
  }

  fn delete_snapshot(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM snapshots WHERE key = ?1", params![key])
      .map_err(|e| OfflineError::storage(format!("Failed to delete snapshot: {}", e)))?;
    Ok(())
  }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| OfflineError::storage(format!("Failed to parse timestamp '{}': {}", s, e)))
}
