//! In-process store namespace, used for `--ephemeral` runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::traits::{RequestKey, StoreName, StoreNamespace, StoreResult, StoredEntry};
use crate::net::Response;

type Container = BTreeMap<RequestKey, StoredEntry>;

/// Namespace kept entirely in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryNamespace {
  // Vec keeps creation order for `names` and `lookup_any`
  stores: RwLock<Vec<(StoreName, Container)>>,
  settings: RwLock<BTreeMap<String, String>>,
}

impl MemoryNamespace {
  pub fn new() -> Self {
    Self::default()
  }
}

fn container_mut<'a>(stores: &'a mut Vec<(StoreName, Container)>, name: &StoreName) -> &'a mut Container {
  let index = match stores.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      stores.push((name.clone(), Container::new()));
      stores.len() - 1
    }
  };
  &mut stores[index].1
}

#[async_trait]
impl StoreNamespace for MemoryNamespace {
  async fn open(&self, name: &StoreName) -> StoreResult<()> {
    let mut stores = self.stores.write().await;
    container_mut(&mut stores, name);
    Ok(())
  }

  async fn has(&self, name: &StoreName) -> StoreResult<bool> {
    Ok(self.stores.read().await.iter().any(|(n, _)| n == name))
  }

  async fn lookup(&self, name: &StoreName, key: &RequestKey) -> StoreResult<Option<StoredEntry>> {
    let stores = self.stores.read().await;
    Ok(
      stores
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, container)| container.get(key).cloned()),
    )
  }

  async fn lookup_any(&self, key: &RequestKey) -> StoreResult<Option<StoredEntry>> {
    let stores = self.stores.read().await;
    Ok(
      stores
        .iter()
        .find_map(|(_, container)| container.get(key).filter(|entry| entry.verify()).cloned()),
    )
  }

  async fn put(&self, name: &StoreName, key: &RequestKey, response: &Response) -> StoreResult<()> {
    let entry = StoredEntry::new(response.clone());
    let mut stores = self.stores.write().await;
    container_mut(&mut stores, name).insert(key.clone(), entry);
    Ok(())
  }

  async fn put_all(&self, name: &StoreName, entries: &[(RequestKey, Response)]) -> StoreResult<()> {
    // Entries are built before taking the lock so the batch lands in one step
    let built: Vec<(RequestKey, StoredEntry)> = entries
      .iter()
      .map(|(key, response)| (key.clone(), StoredEntry::new(response.clone())))
      .collect();

    let mut stores = self.stores.write().await;
    container_mut(&mut stores, name).extend(built);
    Ok(())
  }

  async fn delete(&self, name: &StoreName, key: &RequestKey) -> StoreResult<bool> {
    let mut stores = self.stores.write().await;
    Ok(
      stores
        .iter_mut()
        .find(|(n, _)| n == name)
        .map(|(_, container)| container.remove(key).is_some())
        .unwrap_or(false),
    )
  }

  async fn names(&self) -> StoreResult<Vec<StoreName>> {
    Ok(self.stores.read().await.iter().map(|(n, _)| n.clone()).collect())
  }

  async fn delete_store(&self, name: &StoreName) -> StoreResult<bool> {
    let mut stores = self.stores.write().await;
    let before = stores.len();
    stores.retain(|(n, _)| n != name);
    Ok(stores.len() != before)
  }

  async fn keys(&self, name: &StoreName) -> StoreResult<Vec<RequestKey>> {
    let stores = self.stores.read().await;
    Ok(
      stores
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, container)| container.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn setting(&self, key: &str) -> StoreResult<Option<String>> {
    Ok(self.settings.read().await.get(key).cloned())
  }

  async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
    self
      .settings
      .write()
      .await
      .insert(key.to_string(), value.to_string());
    Ok(())
  }
}
