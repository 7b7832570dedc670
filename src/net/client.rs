use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use super::types::{Request, Response};

/// Transport-level failure. HTTP error statuses are not failures here; they
/// come back as a [`Response`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Unreachable(String),
  #[error("request timed out: {0}")]
  Timeout(String),
  #[error("failed to read response body: {0}")]
  Body(String),
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

/// The `fetch` primitive everything else is built on.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  /// Build a transport. `timeout` is passed through to reqwest as is.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("hush/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let resp = builder.send().await.map_err(classify_error)?;
    let status = resp.status().as_u16();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = resp.bytes().await.map_err(|e| {
      if e.is_timeout() {
        FetchError::Timeout(e.to_string())
      } else {
        FetchError::Body(e.to_string())
      }
    })?;

    debug!(url = %request.url, status, bytes = body.len(), "fetched");

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

fn classify_error(e: reqwest::Error) -> FetchError {
  if e.is_timeout() {
    FetchError::Timeout(e.to_string())
  } else if e.is_builder() {
    FetchError::InvalidRequest(e.to_string())
  } else {
    FetchError::Unreachable(e.to_string())
  }
}
