//! Durable outbox storage for mutations awaiting delivery.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Which kind of write a pending mutation carries.
///
/// Kinds map to named collections in the store; replay order is guaranteed
/// within a kind, never across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  ViolationReport,
  EmergencyAlert,
  Generic,
}

impl ResourceKind {
  /// Collection name in the durable store.
  pub fn collection(&self) -> &'static str {
    match self {
      ResourceKind::ViolationReport => "pending_reports",
      ResourceKind::EmergencyAlert => "pending_alerts",
      ResourceKind::Generic => "pending_other",
    }
  }

  pub const ALL: [ResourceKind; 3] = [
    ResourceKind::ViolationReport,
    ResourceKind::EmergencyAlert,
    ResourceKind::Generic,
  ];
}

/// One unsent write, held until the server acknowledges delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Locally assigned, monotonic within the store
  pub id: i64,
  pub kind: ResourceKind,
  /// Opaque serialized request body
  pub payload: Value,
  pub created_at: DateTime<Utc>,
  pub attempt_count: u32,
}

/// Outbox failures are a degraded-capability signal, not a crash: the caller
/// falls back to "submit now or lose it" messaging.
#[derive(Debug, Error)]
pub enum OutboxError {
  #[error("outbox storage unavailable: {0}")]
  Unavailable(String),
}

/// Trait for durable outbox backends.
///
/// Guarantees: a successful `enqueue` survives process restart; `remove` is
/// idempotent; `list_pending` returns insertion order.
pub trait OutboxStore: Send + Sync {
  /// Persist a mutation. Never touches the network.
  fn enqueue(&self, kind: ResourceKind, payload: Value) -> Result<PendingMutation, OutboxError>;

  /// All stored mutations, optionally filtered by kind, in insertion order.
  fn list_pending(&self, kind: Option<ResourceKind>) -> Result<Vec<PendingMutation>, OutboxError>;

  /// Delete by id. Removing an absent id is not an error.
  fn remove(&self, id: i64) -> Result<(), OutboxError>;

  /// Increment the attempt count after a failed replay.
  fn record_attempt(&self, id: i64) -> Result<(), OutboxError>;
}

impl<T: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<T> {
  fn enqueue(&self, kind: ResourceKind, payload: Value) -> Result<PendingMutation, OutboxError> {
    (**self).enqueue(kind, payload)
  }

  fn list_pending(&self, kind: Option<ResourceKind>) -> Result<Vec<PendingMutation>, OutboxError> {
    (**self).list_pending(kind)
  }

  fn remove(&self, id: i64) -> Result<(), OutboxError> {
    (**self).remove(id)
  }

  fn record_attempt(&self, id: i64) -> Result<(), OutboxError> {
    (**self).record_attempt(id)
  }
}

/// SQLite-backed outbox.
pub struct SqliteOutbox {
  conn: Mutex<Connection>,
}

impl SqliteOutbox {
  /// Open or create the outbox at the given path.
  pub fn open(path: &Path) -> Result<Self, OutboxError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| OutboxError::Unavailable(format!("cannot create outbox directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| OutboxError::Unavailable(format!("cannot open {}: {}", path.display(), e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory outbox for tests.
  pub fn open_in_memory() -> Result<Self, OutboxError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| OutboxError::Unavailable(e.to_string()))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<(), OutboxError> {
    let conn = self.lock()?;
    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| OutboxError::Unavailable(format!("migration failed: {}", e)))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, OutboxError> {
    self
      .conn
      .lock()
      .map_err(|e| OutboxError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

/// Schema for the outbox collections.
///
/// AUTOINCREMENT keeps ids monotonic even after deletions, which is what
/// makes "order by id" equal insertion order.
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    attempt_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_mutations_collection
    ON pending_mutations(collection, id);
"#;

fn kind_from_collection(collection: &str) -> ResourceKind {
  match collection {
    "pending_reports" => ResourceKind::ViolationReport,
    "pending_alerts" => ResourceKind::EmergencyAlert,
    _ => ResourceKind::Generic,
  }
}

impl OutboxStore for SqliteOutbox {
  fn enqueue(&self, kind: ResourceKind, payload: Value) -> Result<PendingMutation, OutboxError> {
    let conn = self.lock()?;

    let body = serde_json::to_vec(&payload)
      .map_err(|e| OutboxError::Unavailable(format!("cannot serialize payload: {}", e)))?;
    let created_at = Utc::now();

    conn
      .execute(
        "INSERT INTO pending_mutations (collection, payload, created_at, attempt_count)
         VALUES (?, ?, ?, 0)",
        params![kind.collection(), body, created_at.to_rfc3339()],
      )
      .map_err(|e| OutboxError::Unavailable(format!("cannot persist mutation: {}", e)))?;

    let id = conn.last_insert_rowid();

    Ok(PendingMutation {
      id,
      kind,
      payload,
      created_at,
      attempt_count: 0,
    })
  }

  fn list_pending(&self, kind: Option<ResourceKind>) -> Result<Vec<PendingMutation>, OutboxError> {
    let conn = self.lock()?;

    let (sql, filter) = match kind {
      Some(k) => (
        "SELECT id, collection, payload, created_at, attempt_count FROM pending_mutations
         WHERE collection = ? ORDER BY id",
        Some(k.collection()),
      ),
      None => (
        "SELECT id, collection, payload, created_at, attempt_count FROM pending_mutations
         ORDER BY id",
        None,
      ),
    };

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| OutboxError::Unavailable(format!("cannot prepare query: {}", e)))?;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(i64, String, Vec<u8>, String, u32)> {
      Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
      ))
    };

    let rows: Vec<_> = match filter {
      Some(collection) => stmt
        .query_map(params![collection], map_row)
        .map_err(|e| OutboxError::Unavailable(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect(),
      None => stmt
        .query_map([], map_row)
        .map_err(|e| OutboxError::Unavailable(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect(),
    };

    let mut pending = Vec::with_capacity(rows.len());
    for (id, collection, body, created_at, attempt_count) in rows {
      let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| OutboxError::Unavailable(format!("corrupt payload for id {}: {}", id, e)))?;
      let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

      pending.push(PendingMutation {
        id,
        kind: kind_from_collection(&collection),
        payload,
        created_at,
        attempt_count,
      });
    }

    Ok(pending)
  }

  fn remove(&self, id: i64) -> Result<(), OutboxError> {
    let conn = self.lock()?;

    // Deleting an already-absent id is a no-op by contract.
    conn
      .execute("DELETE FROM pending_mutations WHERE id = ?", params![id])
      .map_err(|e| OutboxError::Unavailable(format!("cannot remove mutation {}: {}", id, e)))?;

    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<(), OutboxError> {
    let conn = self.lock()?;

    conn
      .execute(
        "UPDATE pending_mutations SET attempt_count = attempt_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| OutboxError::Unavailable(format!("cannot record attempt for {}: {}", id, e)))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_enqueue_assigns_monotonic_ids() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    let a = outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 1})).unwrap();
    let b = outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 2})).unwrap();
    assert!(b.id > a.id);
    assert_eq!(a.attempt_count, 0);
  }

  #[test]
  fn test_list_pending_preserves_insertion_order() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    for n in 0..5 {
      outbox.enqueue(ResourceKind::ViolationReport, json!({"n": n})).unwrap();
    }

    let pending = outbox.list_pending(Some(ResourceKind::ViolationReport)).unwrap();
    let order: Vec<i64> = pending.iter().map(|m| m.payload["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn test_list_pending_filters_by_kind() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    outbox.enqueue(ResourceKind::ViolationReport, json!({})).unwrap();
    outbox.enqueue(ResourceKind::EmergencyAlert, json!({})).unwrap();

    let alerts = outbox.list_pending(Some(ResourceKind::EmergencyAlert)).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, ResourceKind::EmergencyAlert);

    let all = outbox.list_pending(None).unwrap();
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    let m = outbox.enqueue(ResourceKind::Generic, json!({})).unwrap();

    outbox.remove(m.id).unwrap();
    // Second removal of the same id is a no-op, not an error.
    outbox.remove(m.id).unwrap();
    assert!(outbox.list_pending(None).unwrap().is_empty());
  }

  #[test]
  fn test_record_attempt_increments() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    let m = outbox.enqueue(ResourceKind::EmergencyAlert, json!({})).unwrap();

    outbox.record_attempt(m.id).unwrap();
    outbox.record_attempt(m.id).unwrap();

    let pending = outbox.list_pending(Some(ResourceKind::EmergencyAlert)).unwrap();
    assert_eq!(pending[0].attempt_count, 2);
  }

  #[test]
  fn test_durability_across_reopen() {
    let dir = std::env::temp_dir().join(format!("syncguard-outbox-{}", std::process::id()));
    let path = dir.join("outbox.db");
    let _ = std::fs::remove_file(&path);

    {
      let outbox = SqliteOutbox::open(&path).unwrap();
      outbox
        .enqueue(ResourceKind::ViolationReport, json!({"type": "no_helmet"}))
        .unwrap();
    }

    // Simulated restart: a fresh handle sees the same record.
    let outbox = SqliteOutbox::open(&path).unwrap();
    let pending = outbox.list_pending(Some(ResourceKind::ViolationReport)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["type"], "no_helmet");

    let _ = std::fs::remove_file(&path);
  }
}
