use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::outbox::ResourceKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend the client talks to
  pub base_url: String,
  /// Path prefixes classified as API-class requests
  #[serde(default = "default_prefixes")]
  pub prefixes: Vec<String>,
  /// Outbound request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache generation; bumping it sweeps the previous generation at activate
  #[serde(default = "default_cache_version")]
  pub version: u32,
  /// Client routes precached into the static cache at install
  #[serde(default = "default_shell_routes")]
  pub shell_routes: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      shell_routes: default_shell_routes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between periodic drain cycles
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// Replay endpoint per mutation kind, relative to the API base URL
  #[serde(default = "default_targets")]
  pub targets: HashMap<ResourceKind, String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
      targets: default_targets(),
    }
  }
}

fn default_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_cache_version() -> u32 {
  1
}

fn default_shell_routes() -> Vec<String> {
  vec!["/".to_string()]
}

fn default_interval_secs() -> u64 {
  300
}

fn default_targets() -> HashMap<ResourceKind, String> {
  let mut targets = HashMap::new();
  targets.insert(ResourceKind::ViolationReport, "/api/traffic/reports".to_string());
  targets.insert(ResourceKind::EmergencyAlert, "/api/emergency/alerts".to_string());
  targets
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./syncguard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/syncguard/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/syncguard/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("syncguard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("syncguard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Invalid configuration: {}", e))?;
    Ok(config)
  }

  /// Bearer token for replay delivery, if set in the environment.
  ///
  /// Checks SYNCGUARD_API_TOKEN; the token never lives in the config file.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SYNCGUARD_API_TOKEN").ok()
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs)
  }

  /// Replay targets resolved against the API base URL.
  pub fn replay_targets(&self) -> HashMap<ResourceKind, String> {
    self
      .sync
      .targets
      .iter()
      .map(|(kind, endpoint)| (*kind, self.resolve(endpoint)))
      .collect()
  }

  /// Absolute URL for an endpoint that may be relative to the base URL.
  pub fn resolve(&self, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
      return endpoint.to_string();
    }

    format!(
      "{}/{}",
      self.api.base_url.trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    )
  }

  /// Default directory for the durable stores.
  pub fn default_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("syncguard"))
  }
}
