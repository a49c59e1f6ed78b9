//! Request and response descriptors plus resource-class routing.

use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }

  /// Whether this method carries a user-generated mutation.
  pub fn is_mutation(&self) -> bool {
    !matches!(self, Method::Get)
  }
}

/// How the request was initiated, mirroring the fetch request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Full-page or client-route load
  Navigate,
  /// Everything else (subresource, API call)
  #[default]
  NoCors,
}

/// An intercepted request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub mode: RequestMode,
  /// JSON body for mutating requests
  pub body: Option<Value>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      mode: RequestMode::NoCors,
      body: None,
    }
  }

  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      mode: RequestMode::Navigate,
      body: None,
    }
  }

  pub fn post(url: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Post,
      url: url.into(),
      mode: RequestMode::NoCors,
      body: Some(body),
    }
  }

  /// Stable fixed-length cache key for this request's identity (method + URL).
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Path component of the URL, if it is well formed.
  ///
  /// Absolute URLs parse normally; rooted-relative URLs ("/api/...") have no
  /// base but are still valid paths. Anything else is unclassifiable.
  pub fn parsed_path(&self) -> Option<String> {
    match Url::parse(&self.url) {
      Ok(u) => Some(u.path().to_string()),
      Err(_) if self.url.starts_with('/') => Some(self.url.clone()),
      Err(_) => None,
    }
  }

  /// Path component of the URL, or the raw string if it does not parse.
  pub fn path(&self) -> String {
    self.parsed_path().unwrap_or_else(|| self.url.clone())
  }
}

/// A resolved response. Every intercepted request produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: String,
  pub body: Vec<u8>,
}

impl Response {
  pub fn json(status: u16, value: &Value) -> Self {
    Self {
      status,
      content_type: "application/json".to_string(),
      body: serde_json::to_vec(value).unwrap_or_default(),
    }
  }

  pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      content_type: "text/html".to_string(),
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Which caching strategy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Backend API call - network-first with cache fallback
  Api,
  /// Client-route load - app-shell pattern
  Navigation,
  /// Static asset - cache-first, populate on miss
  Resource,
}

/// Classifies intercepted requests by resource class.
///
/// Pure classifier: first match wins, no side effects beyond dispatch.
#[derive(Debug, Clone)]
pub struct RequestRouter {
  api_prefixes: Vec<String>,
}

impl RequestRouter {
  pub fn new(api_prefixes: Vec<String>) -> Self {
    Self { api_prefixes }
  }

  /// Classify a request into exactly one resource class.
  ///
  /// Order matters: API prefix match, then navigation mode, then everything
  /// else. A URL that fails to parse is unclassifiable (`None`) and must go
  /// straight to the network, uncached.
  pub fn classify(&self, request: &Request) -> Option<ResourceClass> {
    let path = request.parsed_path()?;

    if self.api_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
      return Some(ResourceClass::Api);
    }

    if request.mode == RequestMode::Navigate {
      return Some(ResourceClass::Navigation);
    }

    Some(ResourceClass::Resource)
  }
}
