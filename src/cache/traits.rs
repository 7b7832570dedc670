//! Core traits and types for the store namespace.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Method, Request, Response};

/// Identity of a stored response: method plus full URL.
///
/// The query string is significant, the fragment is not (it never reaches
/// the network).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method,
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(request.method, &request.url)
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Name of one container in the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreName(String);

impl StoreName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for StoreName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for StoreName {
  fn from(name: &str) -> Self {
    Self::new(name)
  }
}

/// A stored response with its bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub response: Response,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
  /// Hex SHA-256 of the body at write time
  pub digest: String,
}

impl StoredEntry {
  pub fn new(response: Response) -> Self {
    let digest = body_digest(&response.body);
    Self {
      response,
      stored_at: Utc::now(),
      digest,
    }
  }

  /// Whether the body still hashes to the digest recorded at write time.
  pub fn verify(&self) -> bool {
    body_digest(&self.response.body) == self.digest
  }
}

/// Hex-encoded SHA-256 of a response body.
pub fn body_digest(body: &Bytes) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),
  #[error("failed to encode entry: {0}")]
  Encoding(#[from] serde_json::Error),
  #[error("corrupt entry for {key}: {reason}")]
  Corrupt { key: String, reason: String },
  #[error("store lock poisoned")]
  Poisoned,
  #[error("store task failed: {0}")]
  Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A namespace of named key-value containers holding captured responses.
///
/// Every operation is atomic per key: a lookup racing a write sees either the
/// old entry or the new one. Writing into a container that does not exist yet
/// creates it. Reads from a missing container find nothing.
#[async_trait]
pub trait StoreNamespace: Send + Sync {
  /// Create the container if it does not exist.
  async fn open(&self, name: &StoreName) -> StoreResult<()>;

  async fn has(&self, name: &StoreName) -> StoreResult<bool>;

  /// Look up a key within one container.
  async fn lookup(&self, name: &StoreName, key: &RequestKey) -> StoreResult<Option<StoredEntry>>;

  /// Look up a key across every container, oldest container first.
  async fn lookup_any(&self, key: &RequestKey) -> StoreResult<Option<StoredEntry>>;

  /// Insert or overwrite one entry.
  async fn put(&self, name: &StoreName, key: &RequestKey, response: &Response) -> StoreResult<()>;

  /// Write a batch of entries; either all land or none do.
  async fn put_all(&self, name: &StoreName, entries: &[(RequestKey, Response)]) -> StoreResult<()>;

  /// Remove one entry. Returns whether it was present.
  async fn delete(&self, name: &StoreName, key: &RequestKey) -> StoreResult<bool>;

  /// All container names, in creation order.
  async fn names(&self) -> StoreResult<Vec<StoreName>>;

  /// Drop a container and everything in it. Returns whether it existed.
  async fn delete_store(&self, name: &StoreName) -> StoreResult<bool>;

  /// Keys held by one container.
  async fn keys(&self, name: &StoreName) -> StoreResult<Vec<RequestKey>>;

  /// Read a namespace-wide setting. Settings live outside every container.
  async fn setting(&self, key: &str) -> StoreResult<Option<String>>;

  async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}
