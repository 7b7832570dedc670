//! SQLite implementation of the store namespace.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::traits::{RequestKey, StoreError, StoreName, StoreNamespace, StoreResult, StoredEntry};
use crate::net::{Method, Response};

/// SQLite-based store namespace.
///
/// All containers share one database file. Calls run on the blocking pool so
/// the async side never waits on disk.
#[derive(Clone)]
pub struct SqliteNamespace {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteNamespace {
  /// Open (or create) the namespace database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hush").join("stores.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
      f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
  }
}

/// Schema for the namespace tables.
const STORE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per named container; id gives creation order
CREATE TABLE IF NOT EXISTS stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses keyed by (container, method, url)
CREATE TABLE IF NOT EXISTS entries (
    store TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (store, method, url),
    FOREIGN KEY (store) REFERENCES stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_request ON entries(method, url);

-- Namespace-wide key/value settings
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Row as read from `entries`, before decoding.
struct RawEntry {
  url: String,
  status: u16,
  headers: String,
  body: Vec<u8>,
  digest: String,
  stored_at: String,
}

impl RawEntry {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      url: row.get(0)?,
      status: row.get(1)?,
      headers: row.get(2)?,
      body: row.get(3)?,
      digest: row.get(4)?,
      stored_at: row.get(5)?,
    })
  }

  fn into_entry(self) -> StoreResult<StoredEntry> {
    let corrupt = |reason: String| StoreError::Corrupt {
      key: self.url.clone(),
      reason,
    };

    let headers: Vec<(String, String)> =
      serde_json::from_str(&self.headers).map_err(|e| corrupt(format!("bad headers: {}", e)))?;
    let stored_at = parse_datetime(&self.stored_at).map_err(corrupt)?;

    let entry = StoredEntry {
      response: Response {
        status: self.status,
        headers,
        body: Bytes::from(self.body),
      },
      stored_at,
      digest: self.digest,
    };

    if !entry.verify() {
      return Err(StoreError::Corrupt {
        key: self.url,
        reason: "body does not match digest".to_string(),
      });
    }

    Ok(entry)
  }
}

const SELECT_ENTRY: &str = "SELECT e.url, e.status, e.headers, e.body, e.digest, e.stored_at FROM entries e";

fn ensure_store(conn: &Connection, name: &StoreName) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO stores (name) VALUES (?)",
    params![name.as_str()],
  )?;
  Ok(())
}

fn write_entry(conn: &Connection, name: &StoreName, key: &RequestKey, entry: &StoredEntry) -> StoreResult<()> {
  let headers = serde_json::to_string(&entry.response.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO entries (store, method, url, status, headers, body, digest, stored_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      name.as_str(),
      key.method.as_str(),
      key.url,
      entry.response.status,
      headers,
      &entry.response.body[..],
      entry.digest,
      entry.stored_at.to_rfc3339(),
    ],
  )?;
  Ok(())
}

#[async_trait]
impl StoreNamespace for SqliteNamespace {
  async fn open(&self, name: &StoreName) -> StoreResult<()> {
    let name = name.clone();
    self
      .with_conn(move |conn| {
        ensure_store(conn, &name)?;
        Ok(())
      })
      .await
  }

  async fn has(&self, name: &StoreName) -> StoreResult<bool> {
    let name = name.clone();
    self
      .with_conn(move |conn| {
        let found = conn
          .query_row(
            "SELECT 1 FROM stores WHERE name = ?",
            params![name.as_str()],
            |_| Ok(()),
          )
          .optional()?;
        Ok(found.is_some())
      })
      .await
  }

  async fn lookup(&self, name: &StoreName, key: &RequestKey) -> StoreResult<Option<StoredEntry>> {
    let name = name.clone();
    let key = key.clone();
    self
      .with_conn(move |conn| {
        let raw = conn
          .query_row(
            &format!("{SELECT_ENTRY} WHERE e.store = ? AND e.method = ? AND e.url = ?"),
            params![name.as_str(), key.method.as_str(), key.url],
            RawEntry::from_row,
          )
          .optional()?;
        raw.map(RawEntry::into_entry).transpose()
      })
      .await
  }

  async fn lookup_any(&self, key: &RequestKey) -> StoreResult<Option<StoredEntry>> {
    let key = key.clone();
    self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "{SELECT_ENTRY} INNER JOIN stores s ON s.name = e.store
           WHERE e.method = ? AND e.url = ?
           ORDER BY s.id"
        ))?;
        let rows = stmt.query_map(params![key.method.as_str(), key.url], RawEntry::from_row)?;

        // A corrupt copy in one container must not hide a good one in the next
        for raw in rows {
          match raw?.into_entry() {
            Ok(entry) => return Ok(Some(entry)),
            Err(StoreError::Corrupt { key, reason }) => {
              warn!(key = %key, reason = %reason, "skipping corrupt entry");
            }
            Err(e) => return Err(e),
          }
        }
        Ok(None)
      })
      .await
  }

  async fn put(&self, name: &StoreName, key: &RequestKey, response: &Response) -> StoreResult<()> {
    let name = name.clone();
    let key = key.clone();
    let entry = StoredEntry::new(response.clone());
    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        ensure_store(&tx, &name)?;
        write_entry(&tx, &name, &key, &entry)?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn put_all(&self, name: &StoreName, entries: &[(RequestKey, Response)]) -> StoreResult<()> {
    let name = name.clone();
    let entries: Vec<(RequestKey, StoredEntry)> = entries
      .iter()
      .map(|(key, response)| (key.clone(), StoredEntry::new(response.clone())))
      .collect();
    self
      .with_conn(move |conn| {
        // Dropping the transaction on error rolls back every row
        let tx = conn.transaction()?;
        ensure_store(&tx, &name)?;
        for (key, entry) in &entries {
          write_entry(&tx, &name, key, entry)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn delete(&self, name: &StoreName, key: &RequestKey) -> StoreResult<bool> {
    let name = name.clone();
    let key = key.clone();
    self
      .with_conn(move |conn| {
        let removed = conn.execute(
          "DELETE FROM entries WHERE store = ? AND method = ? AND url = ?",
          params![name.as_str(), key.method.as_str(), key.url],
        )?;
        Ok(removed > 0)
      })
      .await
  }

  async fn names(&self) -> StoreResult<Vec<StoreName>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY id")?;
        let names = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names.into_iter().map(StoreName::new).collect())
      })
      .await
  }

  async fn delete_store(&self, name: &StoreName) -> StoreResult<bool> {
    let name = name.clone();
    self
      .with_conn(move |conn| {
        let removed = conn.execute("DELETE FROM stores WHERE name = ?", params![name.as_str()])?;
        Ok(removed > 0)
      })
      .await
  }

  async fn keys(&self, name: &StoreName) -> StoreResult<Vec<RequestKey>> {
    let name = name.clone();
    self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare("SELECT method, url FROM entries WHERE store = ? ORDER BY url")?;
        let rows = stmt
          .query_map(params![name.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        rows
          .into_iter()
          .map(|(method, url)| {
            let method = Method::parse(&method).ok_or_else(|| StoreError::Corrupt {
              key: url.clone(),
              reason: format!("unknown method `{}`", method),
            })?;
            Ok(RequestKey { method, url })
          })
          .collect()
      })
      .await
  }

  async fn setting(&self, key: &str) -> StoreResult<Option<String>> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        let value = conn
          .query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
          )
          .optional()?;
        Ok(value)
      })
      .await
  }

  async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
    let key = key.to_string();
    let value = value.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
          params![key, value],
        )?;
        Ok(())
      })
      .await
  }
}

/// Parse an RFC 3339 timestamp as written by `write_entry`.
fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("Failed to parse datetime '{}': {}", s, e))
}
