//! Interception layer that picks a retrieval strategy for every request.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::classify::{Classifier, ResourceClass};
use super::version::{ShellVersion, StoreLayout};
use crate::cache::{RequestKey, StoreNamespace};
use crate::net::{Method, Request, Response, Transport};

/// Request interceptor for one active shell version.
///
/// This sits between the caller and the network. `handle` always produces a
/// response: network and store failures end in either a stored copy or
/// [`Response::network_error`], never in an error.
pub struct Interceptor {
  namespace: Arc<dyn StoreNamespace>,
  transport: Arc<dyn Transport>,
  classifier: Classifier,
  layout: StoreLayout,
  version: ShellVersion,
}

impl Interceptor {
  pub fn new(
    namespace: Arc<dyn StoreNamespace>,
    transport: Arc<dyn Transport>,
    classifier: Classifier,
    layout: StoreLayout,
    version: ShellVersion,
  ) -> Self {
    Self {
      namespace,
      transport,
      classifier,
      layout,
      version,
    }
  }

  pub fn version(&self) -> ShellVersion {
    self.version
  }

  /// Serve one request.
  #[instrument(skip(self, request), fields(method = %request.method, url = %request.url, version = %self.version))]
  pub async fn handle(&self, request: Request) -> Response {
    // The store only holds GET responses
    if request.method != Method::Get {
      return fetch_or_error(self.transport.as_ref(), &request).await;
    }

    match self.classifier.classify(&request) {
      ResourceClass::Shell => self.cache_first(&request).await,
      ResourceClass::Audio => self.cache_first_write_through(&request).await,
      ResourceClass::Default => self.network_first(&request).await,
    }
  }

  /// Shell strategy.
  ///
  /// 1. Look in every store - a hit is returned as is
  /// 2. On a miss, return whatever the network gives
  ///
  /// Nothing is written back; the shell store is only filled at install.
  async fn cache_first(&self, request: &Request) -> Response {
    let key = RequestKey::from_request(request);
    if let Some(response) = self.stored_anywhere(&key).await {
      debug!("shell hit");
      return response;
    }

    debug!("shell miss, going to network");
    fetch_or_error(self.transport.as_ref(), request).await
  }

  /// Audio strategy.
  ///
  /// 1. Look in the audio store - a hit means no network access at all
  /// 2. On a miss, fetch; persist a copy of a 2xx answer, return the other
  /// 3. A failed fetch writes nothing
  async fn cache_first_write_through(&self, request: &Request) -> Response {
    let key = RequestKey::from_request(request);
    let store = self.layout.audio_store();

    match self.namespace.lookup(store, &key).await {
      Ok(Some(entry)) => {
        debug!("audio hit");
        return entry.response;
      }
      Ok(None) => debug!("audio miss"),
      Err(e) => warn!(error = %e, "audio store lookup failed, treating as miss"),
    }

    let response = match self.transport.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(error = %e, "audio fetch failed");
        return Response::network_error();
      }
    };

    if response.is_success() {
      // The caller's copy does not depend on whether this write lands
      let persisted = response.clone();
      match self.namespace.put(store, &key, &persisted).await {
        Ok(()) => debug!(bytes = persisted.body.len(), "audio cached"),
        Err(e) => warn!(error = %e, "failed to cache audio"),
      }
    } else {
      debug!(status = response.status, "not caching unsuccessful audio response");
    }

    response
  }

  /// Default strategy.
  ///
  /// 1. Try the network - a 2xx answer is returned directly, uncached
  /// 2. On failure, fall back to any stored copy
  /// 3. With no stored copy, return the network's answer if there was one,
  ///    otherwise a network-error response
  async fn network_first(&self, request: &Request) -> Response {
    let answered = match self.transport.fetch(request).await {
      Ok(response) if response.is_success() => return response,
      Ok(response) => {
        debug!(status = response.status, "network answered with failure status");
        Some(response)
      }
      Err(e) => {
        debug!(error = %e, "network unavailable");
        None
      }
    };

    let key = RequestKey::from_request(request);
    if let Some(response) = self.stored_anywhere(&key).await {
      debug!("serving stored fallback");
      return response;
    }

    answered.unwrap_or_else(Response::network_error)
  }

  async fn stored_anywhere(&self, key: &RequestKey) -> Option<Response> {
    match self.namespace.lookup_any(key).await {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(error = %e, "store lookup failed, treating as miss");
        None
      }
    }
  }
}

/// Fetch straight from the network, folding transport failure into a
/// network-error response.
pub(crate) async fn fetch_or_error(transport: &dyn Transport, request: &Request) -> Response {
  match transport.fetch(request).await {
    Ok(response) => response,
    Err(e) => {
      warn!(url = %request.url, error = %e, "fetch failed");
      Response::network_error()
    }
  }
}
