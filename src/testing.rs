//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{OfflineError, Result};
use crate::queue::QueuedRequest;
use crate::store::{CacheSnapshot, OfflineStore, SnapshotStamp};
use crate::sync::{Transport, TransportResponse};

#[derive(Default)]
struct RecordingState {
  sent: Vec<QueuedRequest>,
  gets: Vec<String>,
  failing: HashSet<String>,
  responses: HashMap<String, (u16, Vec<u8>)>,
  delay: Option<Duration>,
}

/// Transport that records every call and answers from canned rules.
///
/// Unknown URLs answer `200 {}`; URLs marked failing answer with a network error.
#[derive(Clone, Default)]
pub struct RecordingTransport {
  state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_urls(&self, urls: &[&str]) {
    let mut state = self.state.lock().unwrap();
    state.failing = urls.iter().map(|u| u.to_string()).collect();
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .state
      .lock()
      .unwrap()
      .responses
      .insert(url.to_string(), (status, body.as_bytes().to_vec()));
  }

  pub fn with_delay(self, delay: Duration) -> Self {
    self.state.lock().unwrap().delay = Some(delay);
    self
  }

  pub fn sent(&self) -> Vec<QueuedRequest> {
    self.state.lock().unwrap().sent.clone()
  }

  pub fn sent_urls(&self) -> Vec<String> {
    self.sent().into_iter().map(|r| r.url).collect()
  }

  pub fn gets(&self) -> Vec<String> {
    self.state.lock().unwrap().gets.clone()
  }

  fn answer(&self, url: &str) -> (Option<Duration>, Result<TransportResponse>) {
    let state = self.state.lock().unwrap();
    let outcome = if state.failing.contains(url) {
      Err(OfflineError::network(format!("connection refused: {}", url)))
    } else {
      let (status, body) = state
        .responses
        .get(url)
        .cloned()
        .unwrap_or((200, b"{}".to_vec()));
      Ok(TransportResponse { status, body })
    };
    (state.delay, outcome)
  }
}

impl Transport for RecordingTransport {
  async fn send(&self, request: &QueuedRequest) -> Result<TransportResponse> {
    self.state.lock().unwrap().sent.push(request.clone());
    let (delay, outcome) = self.answer(&request.url);
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    outcome
  }

  async fn get(&self, url: &str, _headers: &BTreeMap<String, String>) -> Result<TransportResponse> {
    self.state.lock().unwrap().gets.push(url.to_string());
    let (delay, outcome) = self.answer(url);
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    outcome
  }
}

/// Store whose every operation fails.
pub struct FailingStore;

fn unavailable<T>() -> Result<T> {
  Err(OfflineError::storage("disk unavailable"))
}

impl OfflineStore for FailingStore {
  fn put_request(&self, _request: &QueuedRequest) -> Result<()> {
    unavailable()
  }

  fn get_request(&self, _id: &str) -> Result<Option<QueuedRequest>> {
    unavailable()
  }

  fn get_all_requests(&self) -> Result<Vec<QueuedRequest>> {
    unavailable()
  }

  fn delete_request(&self, _id: &str) -> Result<()> {
    unavailable()
  }

  fn count_requests(&self) -> Result<usize> {
    unavailable()
  }

  fn put_snapshot(&self, _key: &str, _snapshot: &CacheSnapshot) -> Result<()> {
    unavailable()
  }

  fn get_snapshot(&self, _key: &str) -> Result<Option<CacheSnapshot>> {
    unavailable()
  }

  fn snapshot_stamp(&self, _key: &str) -> Result<Option<SnapshotStamp>> {
    unavailable()
  }

  fn delete_snapshot(&self, _key: &str) -> Result<()> {
    unavailable()
  }
}
