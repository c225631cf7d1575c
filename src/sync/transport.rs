//! Network transport used to dispatch and replay requests.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::queue::{Method, QueuedRequest};

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl TransportResponse {
  /// 2xx
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Fetch-like call into the network.
///
/// Implementations return `OfflineError::Network` when the exchange did not
/// complete; any completed exchange is `Ok`, whatever its status.
pub trait Transport: Send + Sync + 'static {
  /// Issue a queued (or about to be queued) mutation.
  fn send(
    &self,
    request: &QueuedRequest,
  ) -> impl Future<Output = Result<TransportResponse>> + Send;

  /// Issue a GET for `url` with the given headers.
  fn get(
    &self,
    url: &str,
    headers: &BTreeMap<String, String>,
  ) -> impl Future<Output = Result<TransportResponse>> + Send;
}

/// `reqwest`-backed transport resolving relative targets against a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| OfflineError::invalid_request(format!("Invalid base URL {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| OfflineError::network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve an absolute or root-relative target.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    match Url::parse(target) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .base_url
        .join(target)
        .map_err(|e| OfflineError::invalid_request(format!("Invalid URL {}: {}", target, e))),
      Err(e) => Err(OfflineError::invalid_request(format!(
        "Invalid URL {}: {}",
        target, e
      ))),
    }
  }

  async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<TransportResponse> {
    let response = builder.send().await.map_err(|e| {
      if e.is_builder() {
        OfflineError::invalid_request(e.to_string())
      } else {
        OfflineError::network(e.to_string())
      }
    })?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| OfflineError::network(format!("Failed to read response body: {}", e)))?;

    Ok(TransportResponse {
      status,
      body: body.to_vec(),
    })
  }
}

fn reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: &QueuedRequest) -> Result<TransportResponse> {
    let url = self.resolve(&request.url)?;

    let mut builder = self.client.request(reqwest_method(request.method), url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    self.execute(builder).await
  }

  async fn get(
    &self,
    url: &str,
    headers: &BTreeMap<String, String>,
  ) -> Result<TransportResponse> {
    let url = self.resolve(url)?;

    let mut builder = self.client.get(url);
    for (name, value) in headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    self.execute(builder).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::sync::oneshot;

  fn transport(base: &str) -> HttpTransport {
    HttpTransport::new(base, Duration::from_secs(5)).unwrap()
  }

  /// Accept one connection, capture the raw request and answer with `response`.
  async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = Vec::new();
      let mut chunk = [0u8; 1024];

      loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
          break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
          let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
              let (name, value) = line.split_once(':')?;
              name
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
            })
            .unwrap_or(0);
          if buf.len() >= header_end + 4 + content_length {
            break;
          }
        }
      }

      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.ok();
      let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
    });

    (base, rx)
  }

  #[test]
  fn test_resolve_root_relative() {
    let t = transport("http://localhost:3001");
    assert_eq!(
      t.resolve("/api/v1/training/modules").unwrap().as_str(),
      "http://localhost:3001/api/v1/training/modules"
    );
  }

  #[test]
  fn test_resolve_absolute_is_untouched() {
    let t = transport("http://localhost:3001");
    assert_eq!(
      t.resolve("https://kc.example.com/api/v1/checklists/c-1/start")
        .unwrap()
        .as_str(),
      "https://kc.example.com/api/v1/checklists/c-1/start"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(matches!(
      HttpTransport::new("not a url", Duration::from_secs(1)),
      Err(OfflineError::InvalidRequest(_))
    ));
  }

  #[tokio::test]
  async fn test_send_issues_recorded_request() {
    let (base, captured) = serve_once(
      "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: 12\r\nConnection: close\r\n\r\n{\"id\":\"m-1\"}",
    )
    .await;

    let req = QueuedRequest::new(Method::Post, "/api/v1/training/modules")
      .with_header("x-user-id", "u-7")
      .with_json(&serde_json::json!({ "title": "Test" }))
      .unwrap();

    let response = transport(&base).send(&req).await.unwrap();
    assert_eq!(response.status, 201);
    assert!(response.is_success());

    let raw = captured.await.unwrap();
    assert!(raw.starts_with("POST /api/v1/training/modules HTTP/1.1"));
    assert!(raw.to_lowercase().contains("x-user-id: u-7"));
    assert!(raw
      .to_lowercase()
      .contains(&format!("idempotency-key: {}", req.id)));
    assert!(raw.ends_with(r#"{"title":"Test"}"#));
  }

  #[tokio::test]
  async fn test_non_success_status_is_ok_response() {
    let (base, _captured) = serve_once(
      "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
    )
    .await;

    let req = QueuedRequest::new(Method::Put, "/api/v1/checklists/runs/r-1/complete");
    let response = transport(&base).send(&req).await.unwrap();
    assert_eq!(response.status, 500);
    assert!(!response.is_success());
    assert_eq!(response.body_text(), "boom");
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let req = QueuedRequest::new(Method::Delete, "/api/v1/training/modules/m-1");
    let result = transport(&base).send(&req).await;
    assert!(matches!(result, Err(OfflineError::Network(_))));
  }
}
