//! Network client abstraction over reqwest.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use crate::request::{Method, Request, Response};

/// Outbound network access for the cache manager and sync coordinator.
///
/// `Ok` carries any resolved HTTP response, 2xx or not; callers decide what
/// counts as failure. `Err` means the request never resolved (offline, DNS,
/// timeout).
pub trait NetworkClient: Send + Sync {
  fn send(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: NetworkClient> NetworkClient for std::sync::Arc<T> {
  async fn send(&self, request: &Request) -> Result<Response> {
    (**self).send(request).await
  }
}

/// reqwest-backed client with a per-request timeout.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  bearer_token: Option<String>,
}

impl HttpClient {
  pub fn new(timeout: Duration, bearer_token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      bearer_token,
    })
  }
}

impl NetworkClient for HttpClient {
  async fn send(&self, request: &Request) -> Result<Response> {
    let mut builder = match request.method {
      Method::Get => self.client.get(&request.url),
      Method::Post => self.client.post(&request.url),
      Method::Put => self.client.put(&request.url),
      Method::Patch => self.client.patch(&request.url),
      Method::Delete => self.client.delete(&request.url),
    };

    if let Some(token) = &self.bearer_token {
      builder = builder.bearer_auth(token);
    }

    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_string();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      content_type,
      body,
    })
  }
}
