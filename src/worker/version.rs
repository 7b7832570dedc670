//! Shell versions and the store names they map to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::cache::StoreName;

/// Version of the application shell. Bumped whenever any shell asset changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShellVersion(pub u32);

impl fmt::Display for ShellVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "v{}", self.0)
  }
}

/// Declared mapping from shell version to store names.
///
/// The audio store name never changes so offline sessions outlive shell
/// upgrades. `audio_aliases` lists older audio store names that must also be
/// kept.
#[derive(Debug, Clone)]
pub struct StoreLayout {
  shell_prefix: String,
  audio: StoreName,
  audio_aliases: Vec<StoreName>,
}

impl StoreLayout {
  pub fn new(shell_prefix: impl Into<String>, audio: impl Into<String>) -> Self {
    Self {
      shell_prefix: shell_prefix.into(),
      audio: StoreName::new(audio),
      audio_aliases: Vec::new(),
    }
  }

  pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.audio_aliases = aliases.into_iter().map(StoreName::new).collect();
    self
  }

  /// Shell store for a version, e.g. `hush-shell-v3`.
  pub fn shell_store(&self, version: ShellVersion) -> StoreName {
    StoreName::new(format!("{}-{}", self.shell_prefix, version))
  }

  pub fn audio_store(&self) -> &StoreName {
    &self.audio
  }

  /// Whether `name` is the audio store or one of its declared aliases.
  pub fn is_audio_family(&self, name: &StoreName) -> bool {
    name == &self.audio || self.audio_aliases.contains(name)
  }

  /// Stores that survive activation of `version`. Everything else is reaped.
  pub fn keep_set(&self, version: ShellVersion) -> BTreeSet<StoreName> {
    let mut keep: BTreeSet<StoreName> = self.audio_aliases.iter().cloned().collect();
    keep.insert(self.audio.clone());
    keep.insert(self.shell_store(version));
    keep
  }
}

impl Default for StoreLayout {
  fn default() -> Self {
    Self::new("hush-shell", "hush-audio")
  }
}
