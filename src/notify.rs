//! Notification gateway: decide what to show, display it, route clicks.
//!
//! Deciding (parsing a push payload, resolving a click target) is pure and
//! separated from the platform calls that display notifications or focus
//! windows, which sit behind traits.

use serde::Deserialize;
use tracing::warn;

const DEFAULT_TITLE: &str = "CivicGuard";
const DEFAULT_BODY: &str = "New notification";
const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
const EMERGENCY_ICON: &str = "/icons/icon-emergency.png";
const VIOLATION_ICON: &str = "/icons/icon-violation.png";

/// Presentation category carried by a push payload's `type` field.
///
/// Selects icon and urgency only; it never changes control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushKind {
  Emergency,
  Violation,
  #[default]
  Generic,
}

/// A named action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub id: String,
  pub title: String,
  pub url: Option<String>,
}

/// What to show. Built either from a push payload or locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub kind: PushKind,
  /// When true the notification must not be auto-dismissed
  pub require_interaction: bool,
  /// Default click target
  pub url: Option<String>,
  pub actions: Vec<NotificationAction>,
}

/// Wire shape of an incoming push payload.
#[derive(Debug, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  #[serde(rename = "type")]
  kind: Option<String>,
  #[serde(default)]
  data: PushData,
}

#[derive(Debug, Default, Deserialize)]
struct PushData {
  url: Option<String>,
}

impl Notification {
  /// Parse an incoming push payload.
  ///
  /// Malformed JSON or missing fields never propagate: the result is a
  /// generic notification with safe defaults.
  pub fn from_push(payload: &[u8]) -> Self {
    let parsed: PushPayload = match serde_json::from_slice(payload) {
      Ok(parsed) => parsed,
      Err(e) => {
        warn!("malformed push payload, using defaults: {e}");
        PushPayload {
          title: None,
          body: None,
          kind: None,
          data: PushData::default(),
        }
      }
    };

    let kind = match parsed.kind.as_deref() {
      Some("emergency") => PushKind::Emergency,
      Some("violation") => PushKind::Violation,
      _ => PushKind::Generic,
    };

    let icon = match kind {
      PushKind::Emergency => EMERGENCY_ICON,
      PushKind::Violation => VIOLATION_ICON,
      PushKind::Generic => DEFAULT_ICON,
    };

    Self {
      title: parsed.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: parsed.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: icon.to_string(),
      kind,
      // Emergencies stay on screen until acted on.
      require_interaction: kind == PushKind::Emergency,
      url: parsed.data.url,
      actions: Vec::new(),
    }
  }

  /// Local notification shown after stale cache generations were swept.
  pub fn update_available() -> Self {
    Self {
      title: "App update available".to_string(),
      body: "A new version is ready. Reload to update.".to_string(),
      icon: DEFAULT_ICON.to_string(),
      kind: PushKind::Generic,
      require_interaction: true,
      url: Some("/".to_string()),
      actions: vec![
        NotificationAction {
          id: "reload".to_string(),
          title: "Reload now".to_string(),
          url: Some("/".to_string()),
        },
        NotificationAction {
          id: "dismiss".to_string(),
          title: "Later".to_string(),
          url: None,
        },
      ],
    }
  }

  /// Resolve the navigation target for an interaction.
  ///
  /// Chosen action's URL, else the notification's default URL, else the
  /// application root.
  pub fn resolve_target(&self, action: Option<&str>) -> String {
    if let Some(id) = action {
      if let Some(action) = self.actions.iter().find(|a| a.id == id) {
        if let Some(url) = &action.url {
          return url.clone();
        }
      }
    }

    self.url.clone().unwrap_or_else(|| "/".to_string())
  }
}

/// Whether the platform lets us display notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
  Granted,
  Denied,
}

/// Result of a `show` call. Suppression is an observable status, never an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowStatus {
  Shown,
  Suppressed(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
  PermissionDenied,
}

/// Platform display surface.
pub trait NotificationSink: Send + Sync {
  fn permission(&self) -> Permission;
  fn display(&self, notification: &Notification);
}

/// Open client windows, for click routing.
pub trait WindowRegistry: Send + Sync {
  /// URLs of currently open windows
  fn open_windows(&self) -> Vec<String>;
  /// Bring an existing window to the front
  fn focus(&self, url: &str);
  /// Open a new window
  fn open(&self, url: &str);
}

/// Routes notifications out to the platform and clicks back into navigation.
pub struct NotificationGateway<S, W> {
  sink: S,
  windows: W,
}

impl<S: NotificationSink, W: WindowRegistry> NotificationGateway<S, W> {
  pub fn new(sink: S, windows: W) -> Self {
    Self { sink, windows }
  }

  /// Display a notification if permission allows.
  pub fn show(&self, notification: &Notification) -> ShowStatus {
    match self.sink.permission() {
      Permission::Granted => {
        self.sink.display(notification);
        ShowStatus::Shown
      }
      Permission::Denied => ShowStatus::Suppressed(SuppressReason::PermissionDenied),
    }
  }

  #[cfg(test)]
  pub(crate) fn windows(&self) -> &W {
    &self.windows
  }

  /// Handle a click: focus a matching open window, otherwise open exactly
  /// one new window at the resolved target. Returns the target URL.
  pub fn on_click(&self, notification: &Notification, action: Option<&str>) -> String {
    let target = notification.resolve_target(action);

    if self.windows.open_windows().iter().any(|w| w == &target) {
      self.windows.focus(&target);
    } else {
      self.windows.open(&target);
    }

    target
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  struct FakeSink {
    permission: Permission,
    displayed: Mutex<Vec<Notification>>,
  }

  impl FakeSink {
    fn new(permission: Permission) -> Self {
      Self {
        permission,
        displayed: Mutex::new(Vec::new()),
      }
    }
  }

  impl NotificationSink for FakeSink {
    fn permission(&self) -> Permission {
      self.permission
    }

    fn display(&self, notification: &Notification) {
      self.displayed.lock().unwrap().push(notification.clone());
    }
  }

  #[derive(Default)]
  struct FakeWindows {
    open_urls: Vec<String>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
  }

  impl WindowRegistry for FakeWindows {
    fn open_windows(&self) -> Vec<String> {
      self.open_urls.clone()
    }

    fn focus(&self, url: &str) {
      self.focused.lock().unwrap().push(url.to_string());
    }

    fn open(&self, url: &str) {
      self.opened.lock().unwrap().push(url.to_string());
    }
  }

  #[test]
  fn test_push_parse_recognizes_emergency() {
    let n = Notification::from_push(
      br#"{"title": "SOS", "body": "Alert nearby", "type": "emergency", "data": {"url": "/emergency"}}"#,
    );
    assert_eq!(n.kind, PushKind::Emergency);
    assert!(n.require_interaction);
    assert_eq!(n.icon, EMERGENCY_ICON);
    assert_eq!(n.url.as_deref(), Some("/emergency"));
  }

  #[test]
  fn test_malformed_push_yields_safe_default() {
    let n = Notification::from_push(b"not json at all");
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, DEFAULT_BODY);
    assert_eq!(n.kind, PushKind::Generic);
    assert!(!n.require_interaction);
  }

  #[test]
  fn test_resolve_target_prefers_action_then_default_then_root() {
    let mut n = Notification::update_available();
    assert_eq!(n.resolve_target(Some("reload")), "/");

    n.url = Some("/settings".to_string());
    // Unknown action falls back to the default URL.
    assert_eq!(n.resolve_target(Some("nope")), "/settings");
    // Action without a URL also falls back.
    assert_eq!(n.resolve_target(Some("dismiss")), "/settings");

    n.url = None;
    assert_eq!(n.resolve_target(None), "/");
  }

  #[test]
  fn test_show_suppressed_without_permission() {
    let gateway = NotificationGateway::new(FakeSink::new(Permission::Denied), FakeWindows::default());
    let status = gateway.show(&Notification::update_available());
    assert_eq!(status, ShowStatus::Suppressed(SuppressReason::PermissionDenied));
    assert!(gateway.sink.displayed.lock().unwrap().is_empty());
  }

  #[test]
  fn test_click_opens_exactly_one_window_when_none_match() {
    let gateway = NotificationGateway::new(FakeSink::new(Permission::Granted), FakeWindows::default());
    let n = Notification::from_push(br#"{"title": "t", "data": {"url": "/emergency"}}"#);

    let target = gateway.on_click(&n, None);
    assert_eq!(target, "/emergency");
    assert_eq!(*gateway.windows.opened.lock().unwrap(), vec!["/emergency"]);
    assert!(gateway.windows.focused.lock().unwrap().is_empty());
  }

  #[test]
  fn test_click_focuses_matching_open_window() {
    let windows = FakeWindows {
      open_urls: vec!["/emergency".to_string()],
      ..Default::default()
    };
    let gateway = NotificationGateway::new(FakeSink::new(Permission::Granted), windows);
    let n = Notification::from_push(br#"{"title": "t", "data": {"url": "/emergency"}}"#);

    gateway.on_click(&n, None);
    assert_eq!(*gateway.windows.focused.lock().unwrap(), vec!["/emergency"]);
    assert!(gateway.windows.opened.lock().unwrap().is_empty());
  }
}
