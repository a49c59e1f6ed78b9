mod agent;
mod cache;
mod config;
mod net;
mod notify;
mod outbox;
mod request;
mod sync;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent::ServiceAgent;
use cache::{CacheManager, SqliteCacheStore};
use net::{HttpClient, NetworkClient};
use notify::{Notification, NotificationGateway, NotificationSink, Permission, WindowRegistry};
use outbox::SqliteOutbox;
use request::{Request, RequestRouter, Response};
use sync::SyncTrigger;

#[derive(Parser, Debug)]
#[command(name = "syncguard")]
#[command(about = "Offline-first sync engine for the CivicGuard safety-reporting client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/syncguard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory for the durable stores (default: platform data dir)
  #[arg(long)]
  data_dir: Option<PathBuf>,

  /// Run a single drain cycle and exit
  #[arg(long)]
  once: bool,
}

/// Headless notification surface: renders into the log stream.
struct LogSink;

impl NotificationSink for LogSink {
  fn permission(&self) -> Permission {
    Permission::Granted
  }

  fn display(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      body = %notification.body,
      "notification"
    );
  }
}

/// Headless adapter has no client windows to focus.
struct NoWindows;

impl WindowRegistry for NoWindows {
  fn open_windows(&self) -> Vec<String> {
    Vec::new()
  }

  fn focus(&self, _url: &str) {}

  fn open(&self, url: &str) {
    info!(url = %url, "open window requested");
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let data_dir = match args.data_dir {
    Some(dir) => dir,
    None => config::Config::default_data_dir()?,
  };

  let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "syncguard.log");
  let (writer, _guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  let net = HttpClient::new(config.network_timeout(), config::Config::get_api_token())?;
  let cache_store = SqliteCacheStore::open(&data_dir.join("cache.db"))?;
  let outbox = SqliteOutbox::open(&data_dir.join("outbox.db"))?;

  let agent = ServiceAgent::new(
    RequestRouter::new(config.api.prefixes.clone()),
    CacheManager::new(cache_store, config.cache.version),
    outbox,
    net.clone(),
    NotificationGateway::new(LogSink, NoWindows),
    config.replay_targets(),
    config.network_timeout(),
  );

  install_shell(&agent, &net, &config).await;
  agent.activate()?;

  if args.once {
    let reports = agent.on_sync_trigger(SyncTrigger::Periodic).await;
    for report in reports {
      println!(
        "{}: delivered {}, deferred {}",
        report.kind.collection(),
        report.delivered,
        report.deferred
      );
    }
    return Ok(());
  }

  run_sync_loop(&agent, &net, &config).await
}

type Agent = ServiceAgent<SqliteCacheStore, SqliteOutbox, HttpClient, LogSink, NoWindows>;

/// Fetch the configured shell routes and precache whatever resolves.
///
/// A route that cannot be fetched right now is skipped; the next start
/// retries. Install never blocks startup on a dead network.
async fn install_shell(agent: &Agent, net: &HttpClient, config: &config::Config) {
  let mut shell: Vec<(String, Response)> = Vec::new();

  for route in &config.cache.shell_routes {
    let request = Request::navigate(config.resolve(route));
    match net.send(&request).await {
      Ok(response) if response.is_success() => shell.push((route.clone(), response)),
      Ok(response) => warn!(route = %route, status = response.status, "shell route not cached"),
      Err(e) => warn!(route = %route, "shell route unreachable: {e}"),
    }
  }

  if let Err(e) = agent.install(&shell) {
    warn!("shell install failed: {e}");
  }
}

/// Periodic drain loop with a connectivity probe.
///
/// The first successful probe after an offline stretch fires a
/// connectivity-restored trigger; steady-state ticks fire periodic ones.
async fn run_sync_loop(agent: &Agent, net: &HttpClient, config: &config::Config) -> Result<()> {
  let mut interval = tokio::time::interval(config.sync_interval());
  let probe_url = config.resolve("/");
  let mut was_offline = false;

  info!(interval_secs = config.sync.interval_secs, "sync loop started");

  loop {
    interval.tick().await;

    let online = net.send(&Request::get(probe_url.as_str())).await.is_ok();
    if !online {
      was_offline = true;
      continue;
    }

    let trigger = if was_offline {
      SyncTrigger::ConnectivityRestored
    } else {
      SyncTrigger::Periodic
    };
    was_offline = false;

    agent.on_sync_trigger(trigger).await;
  }
}
