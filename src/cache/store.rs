//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::request::Response;

/// One cached HTTP response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for named-cache storage backends.
///
/// Entries live in named caches (e.g. "static-v3", "dynamic-v3") and are
/// keyed by request identity. Implementations must make single-entry
/// operations atomic.
pub trait CacheStore: Send + Sync {
  /// Look up an entry in a named cache.
  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Write or replace an entry in a named cache.
  fn put(&self, cache: &str, key: &str, response: &Response) -> Result<()>;

  /// Delete an entire named cache. Deleting an absent cache is not an error.
  fn delete_cache(&self, cache: &str) -> Result<()>;

  /// All cache names currently present.
  fn cache_names(&self) -> Result<Vec<String>>;
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests and as a degraded fallback.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the named-cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name ON cache_entries(cache_name);
"#;

impl CacheStore for SqliteCacheStore {
  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![cache, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, content_type, body, cached_at_str)) => {
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            content_type,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_name, entry_key, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache, key, response.status, response.content_type, response.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete_cache(&self, cache: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE cache_name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM cache_entries")
      .map_err(|e| eyre!("Failed to prepare cache name query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache names: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resp(body: &str) -> Response {
    Response::html(200, body.as_bytes().to_vec())
  }

  #[test]
  fn test_put_get_roundtrip() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("dynamic-v1", "k1", &resp("hello")).unwrap();

    let entry = store.get("dynamic-v1", "k1").unwrap().unwrap();
    assert_eq!(entry.response.body, b"hello");
    assert_eq!(entry.response.status, 200);
  }

  #[test]
  fn test_put_replaces_existing_entry() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("dynamic-v1", "k1", &resp("old")).unwrap();
    store.put("dynamic-v1", "k1", &resp("new")).unwrap();

    let entry = store.get("dynamic-v1", "k1").unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
  }

  #[test]
  fn test_caches_are_isolated_by_name() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("static-v1", "k1", &resp("shell")).unwrap();

    assert!(store.get("dynamic-v1", "k1").unwrap().is_none());
  }

  #[test]
  fn test_delete_cache_is_idempotent() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("static-v1", "k1", &resp("shell")).unwrap();

    store.delete_cache("static-v1").unwrap();
    store.delete_cache("static-v1").unwrap();

    assert!(store.get("static-v1", "k1").unwrap().is_none());
    assert!(store.cache_names().unwrap().is_empty());
  }
}
