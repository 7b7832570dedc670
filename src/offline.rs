//! Offline availability of sessions, read and toggled from the page side.
//!
//! Membership in the audio store is the only record of "available offline".
//! Every operation here is best-effort: failures are logged and reported as
//! `false`, never raised.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{RequestKey, StoreNamespace};
use crate::net::{Request, Transport};
use crate::worker::StoreLayout;

#[derive(Clone)]
pub struct OfflineFacade {
  namespace: Arc<dyn StoreNamespace>,
  transport: Arc<dyn Transport>,
  layout: StoreLayout,
}

impl OfflineFacade {
  pub fn new(
    namespace: Arc<dyn StoreNamespace>,
    transport: Arc<dyn Transport>,
    layout: StoreLayout,
  ) -> Self {
    Self {
      namespace,
      transport,
      layout,
    }
  }

  /// Whether the audio at `url` is in the audio store. Errors read as "not cached".
  pub async fn is_cached(&self, url: &Url) -> bool {
    let key = RequestKey::get(url);
    match self.namespace.lookup(self.layout.audio_store(), &key).await {
      Ok(entry) => entry.is_some(),
      Err(e) => {
        warn!(url = %url, error = %e, "offline check failed");
        false
      }
    }
  }

  /// Download the audio at `url` into the audio store.
  ///
  /// Already cached audio is left alone. A failed download leaves the store
  /// as it was. Returns whether the audio is available offline afterwards.
  #[instrument(skip(self), fields(url = %url))]
  pub async fn mark_offline(&self, url: &Url) -> bool {
    if self.is_cached(url).await {
      debug!("already available offline");
      return true;
    }

    let store = self.layout.audio_store();
    if let Err(e) = self.namespace.open(store).await {
      warn!(error = %e, "could not open audio store");
      return false;
    }

    let request = Request::get(url.clone());
    let response = match self.transport.fetch(&request).await {
      Ok(response) if response.is_success() => response,
      Ok(response) => {
        warn!(status = response.status, "download refused");
        return false;
      }
      Err(e) => {
        warn!(error = %e, "download failed");
        return false;
      }
    };

    match self
      .namespace
      .put(store, &RequestKey::from_request(&request), &response)
      .await
    {
      Ok(()) => {
        info!(bytes = response.body.len(), "available offline");
        true
      }
      Err(e) => {
        warn!(error = %e, "failed to store download");
        false
      }
    }
  }

  /// Remove the audio at `url` from the audio store. Returns whether an
  /// entry was removed; removing absent audio is a no-op.
  #[instrument(skip(self), fields(url = %url))]
  pub async fn unmark_offline(&self, url: &Url) -> bool {
    match self
      .namespace
      .delete(self.layout.audio_store(), &RequestKey::get(url))
      .await
    {
      Ok(removed) => {
        if removed {
          info!("removed from offline storage");
        }
        removed
      }
      Err(e) => {
        warn!(error = %e, "failed to remove offline audio");
        false
      }
    }
  }

  /// Every audio URL currently available offline.
  pub async fn cached_urls(&self) -> Vec<String> {
    match self.namespace.keys(self.layout.audio_store()).await {
      Ok(keys) => keys.into_iter().map(|k| k.url).collect(),
      Err(e) => {
        warn!(error = %e, "could not list offline audio");
        Vec::new()
      }
    }
  }
}
