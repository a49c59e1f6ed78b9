//! Sync coordinator: drains the outbox when connectivity returns.

use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::net::NetworkClient;
use crate::outbox::{OutboxStore, PendingMutation, ResourceKind};
use crate::request::Request;

/// Why a drain cycle started. Both sources run the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// Connectivity likely restored
  ConnectivityRestored,
  /// Periodic replay window elapsed
  Periodic,
}

/// Outcome of one drain cycle for one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub kind: ResourceKind,
  /// Mutations delivered and removed this cycle
  pub delivered: usize,
  /// Mutations still pending after this cycle
  pub deferred: usize,
}

/// Replays queued mutations against their registered endpoints.
///
/// Each kind drains strictly in insertion order with head-of-line blocking:
/// the first failed delivery stops that kind for the cycle, so a later write
/// can never reach the server before an earlier one. Different kinds drain
/// interleaved with no ordering guarantee between them.
///
/// Delivery is at-least-once: a success whose acknowledgment is lost will be
/// retried, so replay endpoints must tolerate duplicates.
pub struct SyncCoordinator<O, N> {
  outbox: O,
  net: N,
  /// Replay endpoint per kind; kinds without a target are never drained
  targets: HashMap<ResourceKind, String>,
  /// Per-delivery timeout so one unreachable endpoint cannot stall the drain
  timeout: Duration,
}

impl<O: OutboxStore, N: NetworkClient> SyncCoordinator<O, N> {
  pub fn new(outbox: O, net: N, targets: HashMap<ResourceKind, String>, timeout: Duration) -> Self {
    Self {
      outbox,
      net,
      targets,
      timeout,
    }
  }

  /// Run one drain cycle. Failed entries stay queued for the next trigger;
  /// there is no backoff beyond that.
  pub async fn drain(&self, trigger: SyncTrigger) -> Vec<DrainReport> {
    info!(?trigger, "draining outbox");

    let cycles = self
      .targets
      .iter()
      .map(|(kind, endpoint)| self.drain_kind(*kind, endpoint));

    let reports = join_all(cycles).await;

    for report in &reports {
      if report.delivered > 0 || report.deferred > 0 {
        info!(
          kind = report.kind.collection(),
          delivered = report.delivered,
          deferred = report.deferred,
          "drain cycle finished"
        );
      }
    }

    reports
  }

  async fn drain_kind(&self, kind: ResourceKind, endpoint: &str) -> DrainReport {
    let pending = match self.outbox.list_pending(Some(kind)) {
      Ok(pending) => pending,
      Err(e) => {
        warn!(kind = kind.collection(), "cannot read outbox: {e}");
        return DrainReport {
          kind,
          delivered: 0,
          deferred: 0,
        };
      }
    };

    let total = pending.len();
    let mut delivered = 0;

    for mutation in pending {
      if self.deliver(endpoint, &mutation).await {
        if let Err(e) = self.outbox.remove(mutation.id) {
          // The server has the write; leaving the record risks a duplicate
          // but never a loss. At-least-once is the documented contract.
          warn!(id = mutation.id, "delivered but could not remove: {e}");
        }
        delivered += 1;
      } else {
        if let Err(e) = self.outbox.record_attempt(mutation.id) {
          warn!(id = mutation.id, "could not record attempt: {e}");
        }
        // Head-of-line blocking: later entries of this kind must wait for
        // this one to succeed in a future cycle.
        break;
      }
    }

    DrainReport {
      kind,
      delivered,
      deferred: total - delivered,
    }
  }

  /// Attempt one delivery. Timeout, transport error and non-2xx all count
  /// as failure.
  async fn deliver(&self, endpoint: &str, mutation: &PendingMutation) -> bool {
    let request = Request::post(endpoint, mutation.payload.clone());

    match tokio::time::timeout(self.timeout, self.net.send(&request)).await {
      Ok(Ok(response)) => response.is_success(),
      Ok(Err(_)) | Err(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::fakes::{Outcome, ScriptedClient};
  use crate::outbox::SqliteOutbox;
  use crate::request::Response;
  use serde_json::json;

  fn targets() -> HashMap<ResourceKind, String> {
    let mut map = HashMap::new();
    map.insert(ResourceKind::ViolationReport, "/api/traffic/reports".to_string());
    map.insert(ResourceKind::EmergencyAlert, "/api/emergency/alerts".to_string());
    map
  }

  fn ok() -> Outcome {
    Outcome::Respond(Response::json(201, &json!({"ok": true})))
  }

  fn coordinator(
    outbox: SqliteOutbox,
    net: ScriptedClient,
  ) -> SyncCoordinator<SqliteOutbox, ScriptedClient> {
    SyncCoordinator::new(outbox, net, targets(), Duration::from_secs(5))
  }

  #[tokio::test]
  async fn test_drain_delivers_in_order_and_empties_outbox() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 1})).unwrap();
    outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 2})).unwrap();

    let net = ScriptedClient::new().script("/api/traffic/reports", vec![ok()]);
    let coord = coordinator(outbox, net);

    let reports = coord.drain(SyncTrigger::ConnectivityRestored).await;
    let report = reports.iter().find(|r| r.kind == ResourceKind::ViolationReport).unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.deferred, 0);

    let sent: Vec<i64> = coord
      .net
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| r.body.as_ref().unwrap()["n"].as_i64().unwrap())
      .collect();
    assert_eq!(sent, vec![1, 2]);
    assert!(coord.outbox.list_pending(None).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_head_of_line_failure_defers_later_entries() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    let first = outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 1})).unwrap();
    outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 2})).unwrap();

    // First delivery fails, so the second must not be attempted this cycle.
    let net = ScriptedClient::new().script("/api/traffic/reports", vec![Outcome::Offline, ok()]);
    let coord = coordinator(outbox, net);

    let reports = coord.drain(SyncTrigger::Periodic).await;
    let report = reports.iter().find(|r| r.kind == ResourceKind::ViolationReport).unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.deferred, 2);
    assert_eq!(coord.net.requests.lock().unwrap().len(), 1);

    let pending = coord.outbox.list_pending(Some(ResourceKind::ViolationReport)).unwrap();
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[0].attempt_count, 1);

    // Next trigger: the head succeeds and B follows, still in order.
    coord.drain(SyncTrigger::ConnectivityRestored).await;
    let sent: Vec<i64> = coord
      .net
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| r.body.as_ref().unwrap()["n"].as_i64().unwrap())
      .collect();
    assert_eq!(sent, vec![1, 1, 2]);
    assert!(coord.outbox.list_pending(None).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_2xx_counts_as_failure() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    outbox.enqueue(ResourceKind::EmergencyAlert, json!({"sos": true})).unwrap();

    let net = ScriptedClient::new().script(
      "/api/emergency/alerts",
      vec![Outcome::Respond(Response::json(500, &json!({"error": "boom"})))],
    );
    let coord = coordinator(outbox, net);

    let reports = coord.drain(SyncTrigger::Periodic).await;
    let report = reports.iter().find(|r| r.kind == ResourceKind::EmergencyAlert).unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.deferred, 1);
  }

  #[tokio::test]
  async fn test_kind_without_target_is_never_drained() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    outbox.enqueue(ResourceKind::Generic, json!({})).unwrap();

    let net = ScriptedClient::new();
    let coord = coordinator(outbox, net);

    coord.drain(SyncTrigger::Periodic).await;
    assert!(coord.net.requests.lock().unwrap().is_empty());
    assert_eq!(coord.outbox.list_pending(None).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_one_kind_failing_does_not_block_the_other() {
    let outbox = SqliteOutbox::open_in_memory().unwrap();
    outbox.enqueue(ResourceKind::ViolationReport, json!({"n": 1})).unwrap();
    outbox.enqueue(ResourceKind::EmergencyAlert, json!({"sos": true})).unwrap();

    // Reports endpoint down, alerts endpoint up.
    let net = ScriptedClient::new().script("/api/emergency/alerts", vec![ok()]);
    let coord = coordinator(outbox, net);

    coord.drain(SyncTrigger::ConnectivityRestored).await;
    assert!(coord
      .outbox
      .list_pending(Some(ResourceKind::EmergencyAlert))
      .unwrap()
      .is_empty());
    assert_eq!(
      coord
        .outbox
        .list_pending(Some(ResourceKind::ViolationReport))
        .unwrap()
        .len(),
      1
    );
  }
}
