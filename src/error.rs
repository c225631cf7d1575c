//! Error types for the offline queue and sync machinery.

use thiserror::Error;

/// Result type alias for offline queue operations.
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Errors that can occur while queueing, replaying or persisting.
#[derive(Debug, Error)]
pub enum OfflineError {
  /// The backing store could not be opened, read or written.
  #[error("Storage error: {0}")]
  Storage(String),

  /// A request did not complete (connection refused, DNS, timeout, ...).
  #[error("Network error: {0}")]
  Network(String),

  /// A request completed with a non-success status.
  #[error("Response error ({status}): {body}")]
  Response { status: u16, body: String },

  /// A request descriptor that cannot be built or dispatched.
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// The background sync worker is gone.
  #[error("Sync worker unavailable")]
  WorkerUnavailable,

  /// JSON serialization/deserialization error
  #[error("JSON error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl OfflineError {
  pub fn storage(message: impl Into<String>) -> Self {
    Self::Storage(message.into())
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::Network(message.into())
  }

  pub fn response(status: u16, body: impl Into<String>) -> Self {
    Self::Response {
      status,
      body: body.into(),
    }
  }

  pub fn invalid_request(message: impl Into<String>) -> Self {
    Self::InvalidRequest(message.into())
  }

  /// Whether a later attempt of the same request might succeed.
  ///
  /// Replay treats every failure as retryable; this only informs logging.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network(_) => true,
      Self::Response { status, .. } => matches!(*status, 408 | 425 | 429 | 500..=599),
      Self::Storage(_)
      | Self::InvalidRequest(_)
      | Self::WorkerUnavailable
      | Self::Serialization(_) => false,
    }
  }
}
