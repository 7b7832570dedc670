//! Install and activation of shell versions.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::classify::Classifier;
use super::intercept::{fetch_or_error, Interceptor};
use super::version::{ShellVersion, StoreLayout};
use crate::cache::{RequestKey, StoreError, StoreName, StoreNamespace};
use crate::net::{FetchError, Request, Response, Transport};

/// Namespace setting naming the build that last took control.
const ACTIVE_SHELL: &str = "active_shell";

/// A shell version together with the assets it consists of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellBuild {
  pub version: ShellVersion,
  /// Asset paths relative to the origin
  pub assets: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
  #[error("invalid shell asset path `{0}`")]
  InvalidAsset(String),
  #[error("failed to fetch shell asset {url}: {source}")]
  Fetch {
    url: Url,
    #[source]
    source: FetchError,
  },
  #[error("shell asset {url} answered with status {status}")]
  Status { url: Url, status: u16 },
  #[error("failed to write shell store {store}: {source}")]
  Store {
    store: StoreName,
    #[source]
    source: StoreError,
  },
  #[error("no installed version is waiting to activate")]
  NothingInstalled,
}

/// Which versions are active and waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatus {
  pub active: Option<ShellVersion>,
  pub waiting: Option<ShellVersion>,
}

/// Owns the active interceptor and moves shell versions through
/// install and activation.
///
/// A failed install leaves the previously active version serving.
pub struct Registration {
  namespace: Arc<dyn StoreNamespace>,
  transport: Arc<dyn Transport>,
  origin: Url,
  layout: StoreLayout,
  audio_segment: String,
  /// Installed, not yet active
  waiting: Mutex<Option<ShellBuild>>,
  active: RwLock<Option<Arc<Interceptor>>>,
}

impl Registration {
  pub fn new(
    namespace: Arc<dyn StoreNamespace>,
    transport: Arc<dyn Transport>,
    origin: Url,
    layout: StoreLayout,
    audio_segment: impl Into<String>,
  ) -> Self {
    Self {
      namespace,
      transport,
      origin,
      layout,
      audio_segment: audio_segment.into(),
      waiting: Mutex::new(None),
      active: RwLock::new(None),
    }
  }

  pub async fn status(&self) -> RegistrationStatus {
    RegistrationStatus {
      active: self.active.read().await.as_ref().map(|i| i.version()),
      waiting: self.waiting.lock().await.as_ref().map(|b| b.version),
    }
  }

  pub async fn active_version(&self) -> Option<ShellVersion> {
    self.status().await.active
  }

  /// Fetch every shell asset and write them into the version's shell store
  /// in one batch. Any failing asset aborts the install with nothing written.
  #[instrument(skip(self, build), fields(version = %build.version))]
  pub async fn install(&self, build: ShellBuild) -> Result<(), LifecycleError> {
    let store = self.layout.shell_store(build.version);
    info!(store = %store, assets = build.assets.len(), "installing shell");

    let requests = self.asset_requests(&build)?;
    let fetches = requests.iter().map(|request| async move {
      let response = self
        .transport
        .fetch(request)
        .await
        .map_err(|source| LifecycleError::Fetch {
          url: request.url.clone(),
          source,
        })?;

      if !response.is_success() {
        return Err(LifecycleError::Status {
          url: request.url.clone(),
          status: response.status,
        });
      }

      Ok::<_, LifecycleError>((RequestKey::from_request(request), response))
    });

    let entries: Vec<(RequestKey, Response)> = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "shell install failed");
        return Err(e);
      }
    };

    self
      .namespace
      .put_all(&store, &entries)
      .await
      .map_err(|source| LifecycleError::Store {
        store: store.clone(),
        source,
      })?;

    info!(store = %store, "shell installed");
    *self.waiting.lock().await = Some(build);
    Ok(())
  }

  /// Activate the waiting version: reap every store outside its keep-set,
  /// then take over request handling immediately.
  #[instrument(skip(self))]
  pub async fn activate(&self) -> Result<ShellVersion, LifecycleError> {
    let build = self
      .waiting
      .lock()
      .await
      .take()
      .ok_or(LifecycleError::NothingInstalled)?;

    self.reap(build.version).await;
    self.claim(&build).await;

    info!(version = %build.version, "shell activated");
    Ok(build.version)
  }

  /// Install and activate without waiting for existing sessions.
  pub async fn update(&self, build: ShellBuild) -> Result<ShellVersion, LifecycleError> {
    self.install(build).await?;
    self.activate().await
  }

  /// Take over with an already installed version if its shell store is
  /// complete. Returns false when a fresh install is needed.
  #[instrument(skip(self, build), fields(version = %build.version))]
  pub async fn resume(&self, build: &ShellBuild) -> bool {
    if !self.is_complete(build).await {
      return false;
    }

    self.reap(build.version).await;
    self.claim(build).await;
    true
  }

  /// The build that last took control of this namespace, if one is recorded.
  pub async fn recorded(&self) -> Option<ShellBuild> {
    let value = match self.namespace.setting(ACTIVE_SHELL).await {
      Ok(value) => value?,
      Err(e) => {
        warn!(error = %e, "could not read active shell record");
        return None;
      }
    };

    match serde_json::from_str(&value) {
      Ok(build) => Some(build),
      Err(e) => {
        warn!(error = %e, "ignoring unreadable active shell record");
        None
      }
    }
  }

  /// Hand control back to the recorded build after an upgrade could not be
  /// installed. Stores are left as they are.
  #[instrument(skip(self))]
  pub async fn fall_back(&self) -> Option<ShellVersion> {
    let build = self.recorded().await?;
    if !self.is_complete(&build).await {
      return None;
    }

    self.claim(&build).await;
    info!(version = %build.version, "previous shell still serving");
    Some(build.version)
  }

  /// Serve a request through the active interceptor, or straight from the
  /// network when no version is active.
  pub async fn handle(&self, request: Request) -> Response {
    let active = self.active.read().await.clone();
    match active {
      Some(interceptor) => interceptor.handle(request).await,
      None => {
        debug!(url = %request.url, "no active shell, passing through");
        fetch_or_error(self.transport.as_ref(), &request).await
      }
    }
  }

  async fn reap(&self, version: ShellVersion) {
    let keep = self.layout.keep_set(version);
    let names = match self.namespace.names().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "could not list stores, skipping cleanup");
        return;
      }
    };

    for name in names.into_iter().filter(|name| !keep.contains(name)) {
      match self.namespace.delete_store(&name).await {
        Ok(_) => info!(store = %name, "deleted outdated store"),
        Err(e) => warn!(store = %name, error = %e, "failed to delete outdated store"),
      }
    }
  }

  async fn is_complete(&self, build: &ShellBuild) -> bool {
    let store = self.layout.shell_store(build.version);
    let stored: BTreeSet<RequestKey> = match self.namespace.keys(&store).await {
      Ok(keys) => keys.into_iter().collect(),
      Err(e) => {
        warn!(store = %store, error = %e, "could not read shell store");
        return false;
      }
    };

    let complete = match self.asset_requests(build) {
      Ok(requests) => requests
        .iter()
        .all(|request| stored.contains(&RequestKey::from_request(request))),
      Err(_) => false,
    };

    if !complete {
      debug!(store = %store, "shell store missing or incomplete");
    }
    complete
  }

  async fn claim(&self, build: &ShellBuild) {
    let classifier = Classifier::new(&self.origin, &build.assets, &self.audio_segment);
    let interceptor = Interceptor::new(
      Arc::clone(&self.namespace),
      Arc::clone(&self.transport),
      classifier,
      self.layout.clone(),
      build.version,
    );
    *self.active.write().await = Some(Arc::new(interceptor));

    match serde_json::to_string(build) {
      Ok(value) => {
        if let Err(e) = self.namespace.set_setting(ACTIVE_SHELL, &value).await {
          warn!(error = %e, "could not record active shell");
        }
      }
      Err(e) => warn!(error = %e, "could not encode active shell"),
    }
  }

  fn asset_requests(&self, build: &ShellBuild) -> Result<Vec<Request>, LifecycleError> {
    build
      .assets
      .iter()
      .map(|asset| {
        let path = asset.strip_prefix('/').unwrap_or(asset);
        self
          .origin
          .join(path)
          .map(Request::get)
          .map_err(|_| LifecycleError::InvalidAsset(asset.clone()))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryNamespace;
  use crate::testutil::ScriptedTransport;

  const ORIGIN: &str = "https://calm.test/app/";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn build(version: u32) -> ShellBuild {
    ShellBuild {
      version: ShellVersion(version),
      assets: vec![
        "./".to_string(),
        "./index.html".to_string(),
        "./app.js".to_string(),
        "/sessions.json".to_string(),
      ],
    }
  }

  fn serve_shell(net: &ScriptedTransport, tag: &str) {
    net.route(url("").as_str(), &format!("root {tag}"));
    net.route(url("index.html").as_str(), &format!("index {tag}"));
    net.route(url("app.js").as_str(), &format!("app {tag}"));
    net.route(url("sessions.json").as_str(), "[]");
  }

  fn registration(ns: Arc<MemoryNamespace>, net: Arc<ScriptedTransport>) -> Registration {
    Registration::new(
      ns,
      net,
      Url::parse(ORIGIN).unwrap(),
      StoreLayout::default(),
      "/audio/",
    )
  }

  #[tokio::test]
  async fn test_installed_shell_serves_offline() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    let reg = registration(ns, net.clone());

    assert_eq!(reg.update(build(1)).await.unwrap(), ShellVersion(1));
    net.set_offline(true);

    for asset in ["", "index.html", "app.js", "sessions.json"] {
      let response = reg.handle(Request::get(url(asset))).await;
      assert!(response.is_success(), "asset `{asset}` not served offline");
    }
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    net.route(url("").as_str(), "root");
    net.route(url("index.html").as_str(), "index");
    net.route(url("app.js").as_str(), "app");
    // sessions.json is not routed and answers 404
    let reg = registration(ns.clone(), net);

    let err = reg.install(build(1)).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Status { status: 404, .. }));
    assert!(ns.names().await.unwrap().is_empty());
    assert_eq!(reg.status().await.waiting, None);
  }

  #[tokio::test]
  async fn test_install_offline_fails() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    net.set_offline(true);
    let reg = registration(ns, net);

    let err = reg.update(build(1)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Fetch { .. }));
    assert_eq!(reg.active_version().await, None);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version_serving() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    let reg = registration(ns.clone(), net.clone());
    reg.update(build(1)).await.unwrap();

    net.set_offline(true);
    assert!(reg.update(build(2)).await.is_err());

    assert_eq!(reg.active_version().await, Some(ShellVersion(1)));
    let response = reg.handle(Request::get(url("index.html"))).await;
    assert_eq!(&response.body[..], b"index v1");
    assert!(ns.has(&StoreName::from("hush-shell-v1")).await.unwrap());
  }

  #[tokio::test]
  async fn test_activation_reaps_old_shell_and_keeps_audio() {
    let ns = Arc::new(MemoryNamespace::new());
    for name in ["hush-shell-v2", "hush-audio", "scratch"] {
      ns.open(&StoreName::from(name)).await.unwrap();
    }
    let net = ScriptedTransport::new();
    serve_shell(&net, "v3");
    let reg = registration(ns.clone(), net);

    reg.update(build(3)).await.unwrap();

    let mut names: Vec<String> = ns
      .names()
      .await
      .unwrap()
      .into_iter()
      .map(|n| n.to_string())
      .collect();
    names.sort();
    assert_eq!(names, vec!["hush-audio", "hush-shell-v3"]);
  }

  #[tokio::test]
  async fn test_upgrade_keeps_offline_audio() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    net.route(url("audio/rain.mp3").as_str(), "rain");
    let reg = registration(ns.clone(), net.clone());
    reg.update(build(1)).await.unwrap();
    reg.handle(Request::get(url("audio/rain.mp3"))).await;

    serve_shell(&net, "v2");
    reg.update(build(2)).await.unwrap();
    net.set_offline(true);

    let index = reg.handle(Request::get(url("index.html"))).await;
    assert_eq!(&index.body[..], b"index v2");
    let audio = reg.handle(Request::get(url("audio/rain.mp3"))).await;
    assert_eq!(&audio.body[..], b"rain");
  }

  #[tokio::test]
  async fn test_activate_without_install_errors() {
    let reg = registration(Arc::new(MemoryNamespace::new()), ScriptedTransport::new());
    assert!(matches!(reg.activate().await, Err(LifecycleError::NothingInstalled)));
  }

  #[tokio::test]
  async fn test_install_waits_until_activated() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    let reg = registration(ns, net);

    reg.install(build(1)).await.unwrap();
    assert_eq!(
      reg.status().await,
      RegistrationStatus {
        active: None,
        waiting: Some(ShellVersion(1)),
      }
    );

    reg.activate().await.unwrap();
    assert_eq!(
      reg.status().await,
      RegistrationStatus {
        active: Some(ShellVersion(1)),
        waiting: None,
      }
    );
  }

  #[tokio::test]
  async fn test_resume_uses_complete_shell_store() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    registration(ns.clone(), net.clone()).update(build(1)).await.unwrap();

    let restarted = registration(ns, net.clone());
    assert!(restarted.resume(&build(1)).await);
    assert_eq!(restarted.active_version().await, Some(ShellVersion(1)));

    net.set_offline(true);
    let response = restarted.handle(Request::get(url("app.js"))).await;
    assert_eq!(&response.body[..], b"app v1");
  }

  #[tokio::test]
  async fn test_resume_rejects_incomplete_shell_store() {
    let ns = Arc::new(MemoryNamespace::new());
    ns.put(
      &StoreName::from("hush-shell-v1"),
      &RequestKey::get(&url("index.html")),
      &Response::new(200, "index"),
    )
    .await
    .unwrap();
    let reg = registration(ns, ScriptedTransport::new());

    assert!(!reg.resume(&build(1)).await);
    assert_eq!(reg.active_version().await, None);
  }

  #[tokio::test]
  async fn test_activation_records_build() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    let reg = registration(ns.clone(), net.clone());
    assert_eq!(reg.recorded().await, None);

    reg.update(build(1)).await.unwrap();

    let restarted = registration(ns, net);
    assert_eq!(restarted.recorded().await, Some(build(1)));
  }

  #[tokio::test]
  async fn test_fall_back_after_failed_upgrade_in_new_process() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v2");
    net.route(url("audio/rain.mp3").as_str(), "rain");
    let first = registration(ns.clone(), net.clone());
    first.update(build(2)).await.unwrap();
    first.handle(Request::get(url("audio/rain.mp3"))).await;

    net.set_offline(true);
    let upgraded = registration(ns.clone(), net);
    assert!(!upgraded.resume(&build(3)).await);
    assert!(upgraded.update(build(3)).await.is_err());

    assert_eq!(upgraded.fall_back().await, Some(ShellVersion(2)));
    assert_eq!(upgraded.active_version().await, Some(ShellVersion(2)));
    let index = upgraded.handle(Request::get(url("index.html"))).await;
    assert_eq!(&index.body[..], b"index v2");
    let audio = upgraded.handle(Request::get(url("audio/rain.mp3"))).await;
    assert_eq!(&audio.body[..], b"rain");
    assert!(ns.has(&StoreName::from("hush-shell-v2")).await.unwrap());
  }

  #[tokio::test]
  async fn test_fall_back_needs_complete_recorded_store() {
    let ns = Arc::new(MemoryNamespace::new());
    let net = ScriptedTransport::new();
    serve_shell(&net, "v1");
    registration(ns.clone(), net.clone()).update(build(1)).await.unwrap();
    ns.delete(
      &StoreName::from("hush-shell-v1"),
      &RequestKey::get(&url("app.js")),
    )
    .await
    .unwrap();

    let restarted = registration(ns, net);
    assert_eq!(restarted.fall_back().await, None);
    assert_eq!(restarted.active_version().await, None);
  }

  #[tokio::test]
  async fn test_uncontrolled_requests_go_to_network() {
    let net = ScriptedTransport::new();
    net.route(url("audio/rain.mp3").as_str(), "rain");
    let ns = Arc::new(MemoryNamespace::new());
    let reg = registration(ns.clone(), net.clone());

    let response = reg.handle(Request::get(url("audio/rain.mp3"))).await;

    assert_eq!(&response.body[..], b"rain");
    assert!(ns.names().await.unwrap().is_empty());
  }
}
