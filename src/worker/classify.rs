//! Request classification.

use std::collections::BTreeSet;
use url::Url;

use crate::net::Request;

/// Which retrieval strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// One of the fixed shell assets: cache-first, no write-back
  Shell,
  /// Session audio: cache-first, write-through
  Audio,
  /// Everything else: network-first, cache fallback
  Default,
}

/// Sorts requests into resource classes. Shell wins over audio, audio over default.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  shell_paths: BTreeSet<String>,
  audio_segment: String,
}

impl Classifier {
  /// `shell_assets` are paths relative to `origin`, with or without a
  /// leading `./` or `/`.
  pub fn new(origin: &Url, shell_assets: &[String], audio_segment: &str) -> Self {
    let mut origin = origin.clone();
    if !origin.path().ends_with('/') {
      let path = format!("{}/", origin.path());
      origin.set_path(&path);
    }

    Self {
      origin,
      shell_paths: shell_assets.iter().map(|a| normalize_asset(a).to_string()).collect(),
      audio_segment: audio_segment.to_string(),
    }
  }

  pub fn classify(&self, request: &Request) -> ResourceClass {
    if let Some(path) = self.relative_path(&request.url) {
      if self.shell_paths.contains(path) {
        return ResourceClass::Shell;
      }
    }

    if request.url.path().contains(&self.audio_segment) {
      return ResourceClass::Audio;
    }

    ResourceClass::Default
  }

  /// Path of `url` below the origin's base path, or None for foreign URLs.
  fn relative_path<'a>(&self, url: &'a Url) -> Option<&'a str> {
    if url.origin() != self.origin.origin() {
      return None;
    }

    let base = self.origin.path();
    let path = url.path();
    if path == base.trim_end_matches('/') {
      return Some("");
    }
    path.strip_prefix(base)
  }
}

fn normalize_asset(asset: &str) -> &str {
  let asset = asset.strip_prefix("./").unwrap_or(asset);
  asset.strip_prefix('/').unwrap_or(asset)
}
