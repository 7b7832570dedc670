//! CLI subcommands. Each one is a page action: it goes through the
//! registration for requests and through the offline facade for badges and
//! toggles.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{MemoryNamespace, SqliteNamespace, StoreNamespace};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::net::{HttpTransport, Request, Transport};
use crate::offline::OfflineFacade;
use crate::worker::{Registration, ShellBuild, StoreLayout};

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Install the configured shell version and activate it
  Install,
  /// List stores and how many entries each holds
  Stores,
  /// List catalog sessions with their offline status
  Sessions,
  /// Show whether a session is available offline
  Status {
    /// Session id, path below the origin, or absolute URL
    target: String,
  },
  /// Make a session available offline
  Offline { target: String },
  /// Remove a session from offline storage
  Online { target: String },
  /// List audio URLs available offline
  Downloads,
  /// Request a URL through the interceptor
  Fetch {
    target: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
}

/// Everything a command needs, wired once per process.
pub struct Context {
  origin: Url,
  catalog_url: Url,
  build: ShellBuild,
  layout: StoreLayout,
  namespace: Arc<dyn StoreNamespace>,
  registration: Registration,
  offline: OfflineFacade,
}

impl Context {
  pub fn new(config: &Config, ephemeral: bool) -> Result<Self> {
    let namespace: Arc<dyn StoreNamespace> = if ephemeral {
      Arc::new(MemoryNamespace::new())
    } else {
      Arc::new(SqliteNamespace::open(&config.store_path()?)?)
    };
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.timeout())?);

    Self::with_parts(config, namespace, transport)
  }

  pub fn with_parts(
    config: &Config,
    namespace: Arc<dyn StoreNamespace>,
    transport: Arc<dyn Transport>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let layout = config.layout();
    let registration = Registration::new(
      Arc::clone(&namespace),
      Arc::clone(&transport),
      origin.clone(),
      layout.clone(),
      config.audio.segment.clone(),
    );
    let offline = OfflineFacade::new(Arc::clone(&namespace), transport, layout.clone());

    Ok(Self {
      origin,
      catalog_url: config.catalog_url()?,
      build: config.shell_build(),
      layout,
      namespace,
      registration,
      offline,
    })
  }

  /// Put the configured shell version in control: reuse a complete install
  /// if there is one, otherwise install now. When the install fails the
  /// previously active version keeps serving. Without any shell, requests go
  /// straight to the network.
  pub async fn start(&self) {
    if self.registration.resume(&self.build).await {
      return;
    }

    match self.registration.update(self.build.clone()).await {
      Ok(version) => info!(version = %version, "shell ready"),
      Err(e) => {
        warn!(error = %e, "shell install failed");
        if self.registration.active_version().await.is_some() {
          return;
        }
        match self.registration.fall_back().await {
          Some(version) => warn!(version = %version, "serving previously installed shell"),
          None => warn!("no shell available, requests go straight to the network"),
        }
      }
    }
  }

  async fn catalog(&self) -> Result<Catalog> {
    let response = self
      .registration
      .handle(Request::get(self.catalog_url.clone()))
      .await;
    Catalog::from_response(&response)
  }

  /// Resolve a session id, a path below the origin, or an absolute URL.
  async fn resolve(&self, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
      return Ok(url);
    }

    if target.contains('/') {
      return self
        .origin
        .join(target.trim_start_matches('/'))
        .map_err(|e| eyre!("Invalid path '{}': {}", target, e));
    }

    let catalog = self.catalog().await?;
    let session = catalog
      .find(target)
      .ok_or_else(|| eyre!("Unknown session '{}'", target))?;
    session.audio_url(&self.origin)
  }
}

/// Run one command, writing user-facing output to `out`.
pub async fn run<W: Write>(ctx: &Context, command: Command, out: &mut W) -> Result<()> {
  if !matches!(command, Command::Install) {
    ctx.start().await;
  }

  match command {
    Command::Install => {
      let version = ctx
        .registration
        .update(ctx.build.clone())
        .await
        .map_err(|e| eyre!("Shell install failed: {}", e))?;
      writeln!(out, "shell {} installed and active", version)?;
    }
    Command::Stores => {
      let active = ctx.registration.active_version().await;
      let names = ctx
        .namespace
        .names()
        .await
        .map_err(|e| eyre!("Failed to list stores: {}", e))?;

      for name in names {
        let entries = ctx.namespace.keys(&name).await.map(|k| k.len()).unwrap_or(0);
        let role = if active.map(|v| ctx.layout.shell_store(v)) == Some(name.clone()) {
          "shell, active"
        } else if ctx.layout.is_audio_family(&name) {
          "audio"
        } else {
          "stale"
        };
        writeln!(out, "{:<24} {:>5} entries  ({})", name, entries, role)?;
      }
    }
    Command::Sessions => {
      let catalog = ctx.catalog().await?;
      for session in catalog.sessions() {
        let cached = match session.audio_url(&ctx.origin) {
          Ok(url) => ctx.offline.is_cached(&url).await,
          Err(_) => false,
        };
        let badge = if cached { "[offline]" } else { "         " };
        writeln!(
          out,
          "{} {:<16} {} ({} min, {})",
          badge, session.id, session.title, session.duration_minutes, session.category
        )?;
      }
    }
    Command::Status { target } => {
      let url = ctx.resolve(&target).await?;
      if ctx.offline.is_cached(&url).await {
        writeln!(out, "{}: available offline", target)?;
      } else {
        writeln!(out, "{}: not available offline", target)?;
      }
    }
    Command::Offline { target } => {
      let url = ctx.resolve(&target).await?;
      if !ctx.offline.mark_offline(&url).await {
        return Err(eyre!("Could not make '{}' available offline", target));
      }
      writeln!(out, "{}: available offline", target)?;
    }
    Command::Online { target } => {
      let url = ctx.resolve(&target).await?;
      if ctx.offline.unmark_offline(&url).await {
        writeln!(out, "{}: removed from offline storage", target)?;
      } else {
        writeln!(out, "{}: was not stored offline", target)?;
      }
    }
    Command::Downloads => {
      for url in ctx.offline.cached_urls().await {
        writeln!(out, "{}", url)?;
      }
    }
    Command::Fetch { target, output } => {
      let url = ctx.resolve(&target).await?;
      let response = ctx.registration.handle(Request::get(url.clone())).await;
      if response.is_network_error() {
        return Err(eyre!("Network error fetching {}", url));
      }
      info!(url = %url, status = response.status, bytes = response.body.len(), "fetched");

      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => out.write_all(&response.body)?,
      }
    }
  }

  Ok(())
}
