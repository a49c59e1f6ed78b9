//! Cache manager implementing the per-class read/write strategies.

use color_eyre::Result;
use serde_json::json;
use tracing::{debug, warn};

use super::store::CacheStore;
use crate::net::NetworkClient;
use crate::request::{Request, Response};

/// Root route of the app shell.
const SHELL_ROOT: &str = "/";

/// Minimal valid HTML served when neither the route nor the root shell is
/// available offline.
const OFFLINE_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1>\
<p>This page is not available without a network connection.</p></body></html>";

/// Inline placeholder returned for image requests that cannot be served.
const PLACEHOLDER_SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" \
width=\"64\" height=\"64\"><rect width=\"64\" height=\"64\" fill=\"#ddd\"/></svg>";

/// Manages the static (app shell) and dynamic (runtime) caches.
///
/// Cache names carry a version suffix; [`CacheManager::activate`] sweeps every
/// name outside the current version set so at most one generation of stale
/// data survives an upgrade.
pub struct CacheManager<S> {
  store: S,
  version: u32,
}

impl<S: CacheStore> CacheManager<S> {
  pub fn new(store: S, version: u32) -> Self {
    Self { store, version }
  }

  pub fn static_cache(&self) -> String {
    format!("static-v{}", self.version)
  }

  pub fn dynamic_cache(&self) -> String {
    format!("dynamic-v{}", self.version)
  }

  /// Precache the app shell. Static entries are written here and only swept
  /// at version rollover.
  ///
  /// Shell entries are keyed by route path so every client-side route can be
  /// answered from the same generation of shell.
  pub fn install(&self, shell: &[(String, Response)]) -> Result<()> {
    let cache = self.static_cache();
    for (route, response) in shell {
      self.store.put(&cache, route, response)?;
    }
    debug!(cache = %cache, entries = shell.len(), "installed app shell");
    Ok(())
  }

  /// Sweep every cache whose name is not in the current version set.
  ///
  /// Safe to run repeatedly: activating the same version twice leaves the
  /// store unchanged. Returns the names that were removed.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = [self.static_cache(), self.dynamic_cache()];

    let mut swept = Vec::new();
    for name in self.store.cache_names()? {
      if !current.contains(&name) {
        self.store.delete_cache(&name)?;
        swept.push(name);
      }
    }

    if !swept.is_empty() {
      debug!(swept = ?swept, "removed stale cache generations");
    }
    Ok(swept)
  }

  /// Network-first with cache fallback, for API-class requests.
  ///
  /// Every outcome resolves to a response: fresh network data, a possibly
  /// stale cached copy, or a synthetic offline body. Non-2xx counts as
  /// failure for fallback purposes.
  pub async fn handle_api<N: NetworkClient>(&self, request: &Request, net: &N) -> Response {
    let key = request.cache_key();

    match net.send(request).await {
      Ok(response) if response.is_success() => {
        // Best-effort write-through; the caller is not delayed by, or
        // failed on, a cache write.
        if let Err(e) = self.store.put(&self.dynamic_cache(), &key, &response) {
          warn!(url = %request.url, "cache write failed: {e}");
        }
        response
      }
      other => {
        if let Ok(response) = &other {
          debug!(url = %request.url, status = response.status, "API fetch failed, trying cache");
        }
        match self.store.get(&self.dynamic_cache(), &key) {
          Ok(Some(cached)) => cached.response,
          _ => Response::json(200, &json!({ "offline": true, "data": [] })),
        }
      }
    }
  }

  /// Cache-first app-shell strategy for navigation requests.
  ///
  /// Falls back through: exact route in the static cache, network, root
  /// shell entry, minimal offline page.
  pub async fn handle_navigation<N: NetworkClient>(&self, request: &Request, net: &N) -> Response {
    let cache = self.static_cache();

    if let Ok(Some(cached)) = self.store.get(&cache, &request.path()) {
      return cached.response;
    }

    match net.send(request).await {
      Ok(response) if response.is_success() => response,
      _ => match self.store.get(&cache, SHELL_ROOT) {
        Ok(Some(shell)) => shell.response,
        _ => Response::html(200, OFFLINE_PAGE.as_bytes().to_vec()),
      },
    }
  }

  /// Cache-first, populate-on-miss strategy for static resources.
  ///
  /// On total failure returns a typed placeholder so rendering never breaks
  /// on a missing asset while offline.
  pub async fn handle_resource<N: NetworkClient>(&self, request: &Request, net: &N) -> Response {
    let key = request.cache_key();
    let cache = self.dynamic_cache();

    if let Ok(Some(cached)) = self.store.get(&cache, &key) {
      return cached.response;
    }

    match net.send(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.store.put(&cache, &key, &response) {
            warn!(url = %request.url, "cache write failed: {e}");
          }
        }
        response
      }
      Err(_) => placeholder_for(request),
    }
  }
}

fn placeholder_for(request: &Request) -> Response {
  let path = request.path();
  let is_image = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"]
    .iter()
    .any(|ext| path.ends_with(ext));

  if is_image {
    Response {
      status: 200,
      content_type: "image/svg+xml".to_string(),
      body: PLACEHOLDER_SVG.as_bytes().to_vec(),
    }
  } else {
    Response {
      status: 200,
      content_type: "text/plain".to_string(),
      body: Vec::new(),
    }
  }
}
