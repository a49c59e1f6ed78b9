//! Service agent: the explicit interface the platform adapter calls into.
//!
//! Replaces implicit event-listener wiring with named methods: intercepted
//! fetches go through [`ServiceAgent::on_intercept`], sync triggers through
//! [`ServiceAgent::on_sync_trigger`], push payloads through
//! [`ServiceAgent::on_push`]. Every method absorbs its own failures; no call
//! leaves a request unresolved.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheManager, CacheStore};
use crate::net::NetworkClient;
use crate::notify::{Notification, NotificationGateway, NotificationSink, ShowStatus, WindowRegistry};
use crate::outbox::{OutboxError, OutboxStore, ResourceKind};
use crate::request::{Request, RequestRouter, ResourceClass, Response};
use crate::sync::{DrainReport, SyncCoordinator, SyncTrigger};

pub struct ServiceAgent<S, O, N, P, W> {
  router: RequestRouter,
  cache: CacheManager<S>,
  outbox: Arc<O>,
  net: Arc<N>,
  coordinator: SyncCoordinator<Arc<O>, Arc<N>>,
  gateway: NotificationGateway<P, W>,
  /// Replay endpoint per kind, also used to recognize which kind a failed
  /// mutation belongs to
  targets: HashMap<ResourceKind, String>,
}

impl<S, O, N, P, W> ServiceAgent<S, O, N, P, W>
where
  S: CacheStore,
  O: OutboxStore,
  N: NetworkClient,
  P: NotificationSink,
  W: WindowRegistry,
{
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    router: RequestRouter,
    cache: CacheManager<S>,
    outbox: O,
    net: N,
    gateway: NotificationGateway<P, W>,
    targets: HashMap<ResourceKind, String>,
    sync_timeout: Duration,
  ) -> Self {
    let outbox = Arc::new(outbox);
    let net = Arc::new(net);
    let coordinator = SyncCoordinator::new(
      Arc::clone(&outbox),
      Arc::clone(&net),
      targets.clone(),
      sync_timeout,
    );

    Self {
      router,
      cache,
      outbox,
      net,
      coordinator,
      gateway,
      targets,
    }
  }

  /// Precache the app shell into the static cache.
  pub fn install(&self, shell: &[(String, Response)]) -> color_eyre::Result<()> {
    self.cache.install(shell)
  }

  /// Sweep stale cache generations. If anything was swept, tell the user an
  /// update landed.
  pub fn activate(&self) -> color_eyre::Result<()> {
    let swept = self.cache.activate()?;
    if !swept.is_empty() {
      self.gateway.show(&Notification::update_available());
    }
    Ok(())
  }

  /// Resolve one intercepted request. Total: every request produces exactly
  /// one response, online or offline.
  pub async fn on_intercept(&self, request: Request) -> Response {
    if request.method.is_mutation() {
      return self.handle_mutation(request).await;
    }

    match self.router.classify(&request) {
      Some(ResourceClass::Api) => self.cache.handle_api(&request, self.net.as_ref()).await,
      Some(ResourceClass::Navigation) => {
        self.cache.handle_navigation(&request, self.net.as_ref()).await
      }
      Some(ResourceClass::Resource) => self.cache.handle_resource(&request, self.net.as_ref()).await,
      // Unclassifiable (malformed URL): plain pass-through, no cache read
      // or write.
      None => self.pass_through(&request).await,
    }
  }

  async fn pass_through(&self, request: &Request) -> Response {
    match self.net.send(request).await {
      Ok(response) => response,
      Err(e) => {
        info!(url = %request.url, "pass-through failed: {e}");
        Response::json(503, &json!({ "offline": true, "error": "network unavailable" }))
      }
    }
  }

  /// Run one drain cycle against the registered replay targets.
  pub async fn on_sync_trigger(&self, trigger: SyncTrigger) -> Vec<DrainReport> {
    self.coordinator.drain(trigger).await
  }

  /// Render an incoming push payload. Malformed payloads degrade to a
  /// generic notification inside `from_push`.
  pub fn on_push(&self, payload: &[u8]) -> ShowStatus {
    self.gateway.show(&Notification::from_push(payload))
  }

  /// Route a notification interaction back into navigation.
  pub fn on_notification_click(&self, notification: &Notification, action: Option<&str>) -> String {
    self.gateway.on_click(notification, action)
  }

  /// Non-GET requests pass straight to the network; when the network is
  /// unreachable the payload is captured in the outbox instead of failing.
  async fn handle_mutation(&self, request: Request) -> Response {
    match self.net.send(&request).await {
      // Resolved responses pass through untouched, 2xx or not: a server
      // that answered is not an outage.
      Ok(response) => response,
      Err(e) => {
        info!(url = %request.url, "mutation failed to send, queueing: {e}");
        self.queue_mutation(&request)
      }
    }
  }

  fn queue_mutation(&self, request: &Request) -> Response {
    let Some(payload) = request.body.clone() else {
      // Nothing to replay later; resolve with an offline error body.
      return Response::json(503, &json!({ "offline": true, "error": "network unavailable" }));
    };

    let kind = self.kind_for(request);
    match self.outbox.enqueue(kind, payload) {
      Ok(mutation) => Response::json(
        202,
        &json!({
          "queued": true,
          "id": mutation.id,
          "message": "saved, will sync when back online"
        }),
      ),
      Err(OutboxError::Unavailable(reason)) => {
        warn!(url = %request.url, "outbox unavailable: {reason}");
        Response::json(
          503,
          &json!({
            "queued": false,
            "storage_unavailable": true,
            "error": "offline storage unavailable, submit again when online"
          }),
        )
      }
    }
  }

  /// Match a mutation to its kind by replay target; unrecognized endpoints
  /// queue as generic.
  fn kind_for(&self, request: &Request) -> ResourceKind {
    let path = request.path();
    self
      .targets
      .iter()
      .find(|(_, endpoint)| target_path(endpoint) == path)
      .map(|(kind, _)| *kind)
      .unwrap_or(ResourceKind::Generic)
  }
}

fn target_path(endpoint: &str) -> String {
  match url::Url::parse(endpoint) {
    Ok(u) => u.path().to_string(),
    Err(_) => endpoint.to_string(),
  }
}
