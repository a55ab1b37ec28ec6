use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    AppActivated,
    AppTerminated,
    UrlVisit,
    SystemSleep,
    SystemWake,
    UserActive,
    UserInactive,
    ScreenLocked,
    ScreenUnlocked,
}

impl SystemEventKind {
    pub const ALL: [SystemEventKind; 9] = [
        SystemEventKind::AppActivated,
        SystemEventKind::AppTerminated,
        SystemEventKind::UrlVisit,
        SystemEventKind::SystemSleep,
        SystemEventKind::SystemWake,
        SystemEventKind::UserActive,
        SystemEventKind::UserInactive,
        SystemEventKind::ScreenLocked,
        SystemEventKind::ScreenUnlocked,
    ];
}

impl fmt::Display for SystemEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemEventKind::AppActivated => "app_activated",
            SystemEventKind::AppTerminated => "app_terminated",
            SystemEventKind::UrlVisit => "url_visit",
            SystemEventKind::SystemSleep => "system_sleep",
            SystemEventKind::SystemWake => "system_wake",
            SystemEventKind::UserActive => "user_active",
            SystemEventKind::UserInactive => "user_inactive",
            SystemEventKind::ScreenLocked => "screen_locked",
            SystemEventKind::ScreenUnlocked => "screen_unlocked",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SystemEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for kind in SystemEventKind::ALL {
            if kind.to_string() == s {
                return Ok(kind);
            }
        }
        Err(format!("Unknown system event type '{}'", s))
    }
}

/// Ambient observation recorded alongside timer runs (app switches, URL visits,
/// sleep/wake and the like). Append-only: never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub uuid: String,
    #[serde(rename = "event_type")]
    pub kind: SystemEventKind,
    pub timestamp: i64,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub created_at: i64,
}

impl SystemEvent {
    pub fn new(kind: SystemEventKind, timestamp: i64) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            kind,
            timestamp,
            data: BTreeMap::new(),
            created_at: now_ms(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn app_name(&self) -> Option<&str> {
        self.data.get("app").map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.data.get("url").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_event_kind_roundtrip() {
        for kind in SystemEventKind::ALL {
            let parsed = SystemEventKind::from_str(&kind.to_string()).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_system_event_kind_from_str_invalid() {
        assert!(SystemEventKind::from_str("keyboard_smash").is_err());
    }

    #[test]
    fn test_system_event_kind_wire_name() {
        let json = serde_json::to_string(&SystemEventKind::UrlVisit).unwrap();
        assert_eq!(json, "\"url_visit\"");
    }

    #[test]
    fn test_system_event_new() {
        let event = SystemEvent::new(SystemEventKind::AppActivated, 1_700_000_000_000)
            .with_data("app", "Terminal");

        assert_eq!(event.kind, SystemEventKind::AppActivated);
        assert_eq!(event.app_name(), Some("Terminal"));
        assert_eq!(event.url(), None);
        assert!(Uuid::parse_str(&event.uuid).is_ok());
    }

    #[test]
    fn test_system_event_wire_shape() {
        let event = SystemEvent::new(SystemEventKind::UrlVisit, 42)
            .with_data("url", "https://example.com")
            .with_data("domain", "example.com");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "url_visit");
        assert_eq!(json["data"]["domain"], "example.com");

        let parsed: SystemEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
