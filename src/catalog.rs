//! Session catalog, the list of playable sessions hosted next to the app.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

use crate::net::Response;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
  pub id: String,
  pub title: String,
  #[serde(alias = "duration")]
  pub duration_minutes: u32,
  pub category: String,
  /// Audio file locator, relative to the origin or absolute
  #[serde(alias = "file", alias = "url")]
  pub audio: String,
}

impl Session {
  pub fn audio_url(&self, origin: &Url) -> Result<Url> {
    origin
      .join(self.audio.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid audio locator '{}' for session {}: {}", self.audio, self.id, e))
  }
}

/// Either a bare list or `{ "sessions": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
  List(Vec<Session>),
  Wrapped { sessions: Vec<Session> },
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
  sessions: Vec<Session>,
}

impl Catalog {
  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    let document: CatalogDocument =
      serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to parse session catalog: {}", e))?;

    let sessions = match document {
      CatalogDocument::List(sessions) => sessions,
      CatalogDocument::Wrapped { sessions } => sessions,
    };

    Ok(Self { sessions })
  }

  pub fn from_response(response: &Response) -> Result<Self> {
    if response.is_network_error() {
      return Err(eyre!("Session catalog unavailable: offline and not cached"));
    }
    if !response.is_success() {
      return Err(eyre!("Session catalog request failed with status {}", response.status));
    }
    Self::from_slice(&response.body)
  }

  pub fn sessions(&self) -> &[Session] {
    &self.sessions
  }

  pub fn find(&self, id: &str) -> Option<&Session> {
    self.sessions.iter().find(|s| s.id == id)
  }
}
