use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteNamespace;
use crate::worker::{ShellBuild, ShellVersion, StoreLayout};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL the app is served from
  pub origin: String,
  #[serde(default)]
  pub shell: ShellConfig,
  #[serde(default)]
  pub audio: AudioConfig,
  /// Catalog location relative to the origin
  #[serde(default = "default_catalog")]
  pub catalog: String,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
  /// Bump whenever any shell asset changes
  #[serde(default = "default_shell_version")]
  pub version: u32,
  #[serde(default = "default_shell_prefix")]
  pub store_prefix: String,
  #[serde(default = "default_shell_assets")]
  pub assets: Vec<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      version: default_shell_version(),
      store_prefix: default_shell_prefix(),
      assets: default_shell_assets(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
  /// Never rename this once users have sessions offline
  #[serde(default = "default_audio_store")]
  pub store: String,
  /// Older audio store names to keep on upgrade
  #[serde(default)]
  pub aliases: Vec<String>,
  /// Path fragment that marks a request as session audio
  #[serde(default = "default_audio_segment")]
  pub segment: String,
}

impl Default for AudioConfig {
  fn default() -> Self {
    Self {
      store: default_audio_store(),
      aliases: Vec::new(),
      segment: default_audio_segment(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Transport timeout; unset leaves it to the HTTP client
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Database path (default: $XDG_DATA_HOME/hush/stores.db)
  pub path: Option<PathBuf>,
}

fn default_catalog() -> String {
  "sessions.json".to_string()
}

fn default_shell_version() -> u32 {
  1
}

fn default_shell_prefix() -> String {
  "hush-shell".to_string()
}

fn default_shell_assets() -> Vec<String> {
  [
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./manifest.json",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
    "./sessions.json",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_audio_store() -> String {
  "hush-audio".to_string()
}

fn default_audio_segment() -> String {
  "/audio/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hush.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hush/config.yaml
  ///
  /// `HUSH_ORIGIN` overrides the configured origin.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/hush/config.yaml\n\
                 with at least an `origin:` entry."
        ))
      }
    };

    if let Ok(origin) = std::env::var("HUSH_ORIGIN") {
      config.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hush.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hush").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.shell.assets.is_empty() {
      return Err(eyre!("shell.assets must list at least one asset"));
    }
    if self.audio.segment.is_empty() {
      return Err(eyre!("audio.segment must not be empty"));
    }
    if self.shell.store_prefix == self.audio.store {
      return Err(eyre!("shell.store_prefix and audio.store must differ"));
    }
    Ok(())
  }

  /// Origin as a URL, always ending in `/` so relative paths join below it.
  pub fn origin_url(&self) -> Result<Url> {
    let mut origin = self.origin.clone();
    if !origin.ends_with('/') {
      origin.push('/');
    }
    Url::parse(&origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn catalog_url(&self) -> Result<Url> {
    self
      .origin_url()?
      .join(self.catalog.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid catalog path '{}': {}", self.catalog, e))
  }

  pub fn layout(&self) -> StoreLayout {
    StoreLayout::new(&self.shell.store_prefix, &self.audio.store)
      .with_aliases(self.audio.aliases.iter().cloned())
  }

  pub fn shell_build(&self) -> ShellBuild {
    ShellBuild {
      version: ShellVersion(self.shell.version),
      assets: self.shell.assets.clone(),
    }
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.network.timeout_secs.map(Duration::from_secs)
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(path) => Ok(path.clone()),
      None => SqliteNamespace::default_path(),
    }
  }
}
