use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
  unwrap_data, ApiErrorBody, AssignModuleRequest, CompleteAssignmentRequest, CompleteRunRequest,
  CreateModuleRequest, UpdateModuleRequest,
};
use crate::cache::{CacheResult, QueryCache};
use crate::error::{OfflineError, Result};
use crate::queue::{Method, OfflineQueue, QueuedRequest};
use crate::sync::{NetworkMonitor, Transport, TransportResponse};

/// Root path of the versioned API.
pub const API_BASE: &str = "/api/v1";

const USER_ID_HEADER: &str = "x-user-id";

/// Who the requests are made as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub access_token: Option<String>,
}

impl Identity {
  fn headers(&self) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(USER_ID_HEADER.to_string(), self.user_id.clone());
    if let Some(token) = &self.access_token {
      headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
  }
}

/// How a mutation was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
  /// The server accepted it; carries the response data
  Sent(Value),
  /// Queued for replay once back online
  Queued { id: String },
}

/// KitchenCoach API client that defers mutations while offline.
pub struct KitchenCoachClient<T: Transport> {
  transport: Arc<T>,
  queue: OfflineQueue,
  monitor: NetworkMonitor,
  cache: Arc<QueryCache>,
  identity: Identity,
}

impl<T: Transport> KitchenCoachClient<T> {
  pub fn new(
    transport: Arc<T>,
    queue: OfflineQueue,
    monitor: NetworkMonitor,
    cache: Arc<QueryCache>,
    identity: Identity,
  ) -> Self {
    Self {
      transport,
      queue,
      monitor,
      cache,
      identity,
    }
  }

  pub fn identity(&self) -> &Identity {
    &self.identity
  }

  fn request(&self, method: Method, path: &str) -> QueuedRequest {
    self
      .identity
      .headers()
      .into_iter()
      .fold(
        QueuedRequest::new(method, format!("{}{}", API_BASE, path)),
        |request, (name, value)| request.with_header(name, value),
      )
  }

  fn json_request<B: Serialize>(
    &self,
    method: Method,
    path: &str,
    body: &B,
  ) -> Result<QueuedRequest> {
    self.request(method, path).with_json(body)
  }

  /// Send `request` now, or queue it when offline or unreachable.
  async fn dispatch(&self, request: QueuedRequest) -> Result<Dispatch> {
    if !self.monitor.is_online() {
      return self.defer(request).await;
    }

    match self.transport.send(&request).await {
      Ok(response) => {
        let data = parse_response(&response)?;
        debug!(
          method = %request.method,
          url = %request.url,
          status = response.status,
          "request sent"
        );
        Ok(Dispatch::Sent(data))
      }
      Err(OfflineError::Network(message)) => {
        warn!(url = %request.url, error = %message, "request failed; going offline");
        self.monitor.set_online(false);
        self.defer(request).await
      }
      Err(e) => Err(e),
    }
  }

  async fn defer(&self, request: QueuedRequest) -> Result<Dispatch> {
    let id = request.id.clone();
    self.queue.enqueue(request).await?;
    Ok(Dispatch::Queued { id })
  }

  async fn query(&self, key: &str, path: &str) -> Result<CacheResult<Value>> {
    let url = format!("{}{}", API_BASE, path);
    let headers = self.identity.headers();
    let transport = Arc::clone(&self.transport);
    let monitor = self.monitor.clone();

    self
      .cache
      .fetch(key, move || async move {
        let response = match transport.get(&url, &headers).await {
          Ok(response) => response,
          Err(OfflineError::Network(message)) => {
            monitor.set_online(false);
            return Err(OfflineError::Network(message));
          }
          Err(e) => return Err(e),
        };
        parse_response(&response)
      })
      .await
  }

  // --------------------------------------------------------------------------
  // Training
  // --------------------------------------------------------------------------

  pub async fn create_module(&self, module: &CreateModuleRequest) -> Result<Dispatch> {
    let request = self.json_request(Method::Post, "/training/modules", module)?;
    self.dispatch(request).await
  }

  pub async fn update_module(&self, id: &str, changes: &UpdateModuleRequest) -> Result<Dispatch> {
    let request = self.json_request(Method::Put, &format!("/training/modules/{}", id), changes)?;
    self.dispatch(request).await
  }

  pub async fn delete_module(&self, id: &str) -> Result<Dispatch> {
    let request = self.request(Method::Delete, &format!("/training/modules/{}", id));
    self.dispatch(request).await
  }

  pub async fn assign_module(&self, assignment: &AssignModuleRequest) -> Result<Dispatch> {
    let request = self.json_request(Method::Post, "/training/assign", assignment)?;
    self.dispatch(request).await
  }

  pub async fn start_assignment(&self, assignment_id: &str) -> Result<Dispatch> {
    let path = format!("/training/assignments/{}/start", assignment_id);
    self.dispatch(self.request(Method::Put, &path)).await
  }

  pub async fn complete_assignment(
    &self,
    assignment_id: &str,
    completion: &CompleteAssignmentRequest,
  ) -> Result<Dispatch> {
    let path = format!("/training/assignments/{}/complete", assignment_id);
    let request = self.json_request(Method::Put, &path, completion)?;
    self.dispatch(request).await
  }

  /// All training modules, served from cache when offline.
  pub async fn list_modules(&self) -> Result<CacheResult<Value>> {
    self.query("training/modules", "/training/modules").await
  }

  /// The current user's assignments, served from cache when offline.
  pub async fn my_assignments(&self) -> Result<CacheResult<Value>> {
    let key = format!("training/assignments:{}", self.identity.user_id);
    self.query(&key, "/training/assignments").await
  }

  // --------------------------------------------------------------------------
  // Checklists
  // --------------------------------------------------------------------------

  pub async fn start_run(&self, checklist_id: &str) -> Result<Dispatch> {
    let path = format!("/checklists/{}/start", checklist_id);
    self.dispatch(self.request(Method::Post, &path)).await
  }

  pub async fn complete_run(&self, run_id: &str, notes: Option<String>) -> Result<Dispatch> {
    let path = format!("/checklists/runs/{}/complete", run_id);
    let request = self.json_request(Method::Put, &path, &CompleteRunRequest { notes })?;
    self.dispatch(request).await
  }
}

/// 2xx bodies yield their data; anything else becomes a response error.
fn parse_response(response: &TransportResponse) -> Result<Value> {
  if !response.is_success() {
    let message = serde_json::from_slice::<ApiErrorBody>(&response.body)
      .map(|body| body.error)
      .unwrap_or_else(|_| response.body_text());
    return Err(OfflineError::response(response.status, message));
  }

  Ok(unwrap_data(&response.body)?)
}
