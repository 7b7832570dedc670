//! Test doubles for the network and the store namespace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::{MemoryNamespace, RequestKey, StoreError, StoreName, StoreNamespace, StoredEntry};
use crate::net::{FetchError, Request, Response, Transport};

/// Transport answering from a fixed route table. Unrouted URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn route(&self, url: &str, body: &str) {
    self.route_response(url, Response::new(200, body.to_string()));
  }

  pub fn route_response(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// While offline every fetch fails as unreachable.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Fetches attempted so far, including failed ones.
  pub fn fetch_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn fetches_of(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Unreachable(format!("offline: {url}")));
    }

    let routed = self.routes.lock().unwrap().get(&url).cloned();
    Ok(routed.unwrap_or_else(|| Response::new(404, "not found")))
  }
}

/// In-memory namespace whose reads or writes can be made to fail.
#[derive(Default)]
pub struct FlakyNamespace {
  inner: MemoryNamespace,
  fail_reads: AtomicBool,
  fail_writes: AtomicBool,
}

impl FlakyNamespace {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn inner(&self) -> &MemoryNamespace {
    &self.inner
  }

  pub fn fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn check_read(&self) -> Result<(), StoreError> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(StoreError::Task("injected read failure".to_string()));
    }
    Ok(())
  }

  fn check_write(&self) -> Result<(), StoreError> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(StoreError::Task("injected write failure".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl StoreNamespace for FlakyNamespace {
  async fn open(&self, name: &StoreName) -> Result<(), StoreError> {
    self.check_write()?;
    self.inner.open(name).await
  }

  async fn has(&self, name: &StoreName) -> Result<bool, StoreError> {
    self.check_read()?;
    self.inner.has(name).await
  }

  async fn lookup(&self, name: &StoreName, key: &RequestKey) -> Result<Option<StoredEntry>, StoreError> {
    self.check_read()?;
    self.inner.lookup(name, key).await
  }

  async fn lookup_any(&self, key: &RequestKey) -> Result<Option<StoredEntry>, StoreError> {
    self.check_read()?;
    self.inner.lookup_any(key).await
  }

  async fn put(&self, name: &StoreName, key: &RequestKey, response: &Response) -> Result<(), StoreError> {
    self.check_write()?;
    self.inner.put(name, key, response).await
  }

  async fn put_all(&self, name: &StoreName, entries: &[(RequestKey, Response)]) -> Result<(), StoreError> {
    self.check_write()?;
    self.inner.put_all(name, entries).await
  }

  async fn delete(&self, name: &StoreName, key: &RequestKey) -> Result<bool, StoreError> {
    self.check_write()?;
    self.inner.delete(name, key).await
  }

  async fn names(&self) -> Result<Vec<StoreName>, StoreError> {
    self.check_read()?;
    self.inner.names().await
  }

  async fn delete_store(&self, name: &StoreName) -> Result<bool, StoreError> {
    self.check_write()?;
    self.inner.delete_store(name).await
  }

  async fn keys(&self, name: &StoreName) -> Result<Vec<RequestKey>, StoreError> {
    self.check_read()?;
    self.inner.keys(name).await
  }

  async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
    self.check_read()?;
    self.inner.setting(key).await
  }

  async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.check_write()?;
    self.inner.set_setting(key, value).await
  }
}
