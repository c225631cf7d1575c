//! Queued request descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{OfflineError, Result};

/// Header carrying the queued request id so the server can drop duplicate replays.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP verbs that may be deferred. Reads are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = OfflineError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(OfflineError::invalid_request(format!(
        "method {} cannot be queued",
        other
      ))),
    }
  }
}

/// A captured HTTP mutation waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  pub id: String,
  /// Absolute URL or a path relative to the API base URL
  pub url: String,
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

impl QueuedRequest {
  /// Create a descriptor with a fresh id and a matching idempotency key.
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    let id = Uuid::new_v4().to_string();
    let mut headers = BTreeMap::new();
    headers.insert(IDEMPOTENCY_KEY_HEADER.to_string(), id.clone());

    Self {
      id,
      url: url.into(),
      method,
      headers,
      body: None,
      enqueued_at: Utc::now(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Serialize `value` as the body and mark it as JSON.
  pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self> {
    let body = serde_json::to_vec(value)?;
    Ok(
      self
        .with_header("Content-Type", "application/json")
        .with_body(body),
    )
  }

  /// The body as UTF-8 text, if there is one and it is valid UTF-8.
  pub fn body_text(&self) -> Option<&str> {
    self
      .body
      .as_deref()
      .and_then(|b| std::str::from_utf8(b).ok())
  }
}
