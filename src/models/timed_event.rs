use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Pomodoro,
    Rest,
    CountUp,
    Custom,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Pomodoro => write!(f, "pomodoro"),
            EventKind::Rest => write!(f, "rest"),
            EventKind::CountUp => write!(f, "count_up"),
            EventKind::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pomodoro" => Ok(EventKind::Pomodoro),
            "rest" => Ok(EventKind::Rest),
            "count_up" | "countup" => Ok(EventKind::CountUp),
            "custom" => Ok(EventKind::Custom),
            _ => Err(format!(
                "Invalid event type '{}'. Valid options: pomodoro, rest, count_up, custom",
                s
            )),
        }
    }
}

/// One timer run. `deleted_at` doubles as the tombstone marker and the deletion
/// stamp propagated to other devices; `updated_at` drives last-writer-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub uuid: String,
    pub title: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    #[serde(rename = "is_completed")]
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl TimedEvent {
    pub fn new(title: impl Into<String>, kind: EventKind, start_time: i64, end_time: i64) -> Self {
        let now = now_ms();
        Self {
            uuid: Uuid::new_v4().to_string(),
            title: title.into(),
            start_time,
            end_time,
            kind,
            completed: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Calendar day of the start time, in UTC. Summary aggregation keys on this.
    pub fn day(&self) -> chrono::NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.start_time)
            .unwrap_or_else(Utc::now)
            .date_naive()
    }
}

impl fmt::Display for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.duration_ms() / 60_000;
        let seconds = (self.duration_ms() % 60_000) / 1000;
        write!(
            f,
            "{} [{}] {}m{:02}s{}",
            self.title,
            self.kind,
            minutes,
            seconds,
            if self.completed { " ✓" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_display() {
        assert_eq!(format!("{}", EventKind::Pomodoro), "pomodoro");
        assert_eq!(format!("{}", EventKind::Rest), "rest");
        assert_eq!(format!("{}", EventKind::CountUp), "count_up");
        assert_eq!(format!("{}", EventKind::Custom), "custom");
    }

    #[test]
    fn test_event_kind_from_str() {
        assert_eq!(EventKind::from_str("pomodoro").unwrap(), EventKind::Pomodoro);
        assert_eq!(EventKind::from_str("REST").unwrap(), EventKind::Rest);
        assert_eq!(EventKind::from_str("count_up").unwrap(), EventKind::CountUp);
        assert_eq!(EventKind::from_str("countup").unwrap(), EventKind::CountUp);
    }

    #[test]
    fn test_event_kind_from_str_invalid() {
        assert!(EventKind::from_str("break").is_err());
        assert!(EventKind::from_str("").is_err());
    }

    #[test]
    fn test_event_kind_wire_name() {
        let json = serde_json::to_string(&EventKind::CountUp).unwrap();
        assert_eq!(json, "\"count_up\"");
    }

    #[test]
    fn test_timed_event_new() {
        let event = TimedEvent::new("Deep work", EventKind::Pomodoro, 1000, 61_000);

        assert_eq!(event.title, "Deep work");
        assert_eq!(event.kind, EventKind::Pomodoro);
        assert_eq!(event.duration_ms(), 60_000);
        assert!(!event.completed);
        assert!(!event.is_deleted());
        assert_eq!(event.created_at, event.updated_at);
        assert!(Uuid::parse_str(&event.uuid).is_ok());
    }

    #[test]
    fn test_timed_event_with_completed() {
        let event = TimedEvent::new("Focus", EventKind::Pomodoro, 0, 1).with_completed(true);
        assert!(event.completed);
    }

    #[test]
    fn test_timed_event_wire_shape() {
        let mut event = TimedEvent::new("Focus", EventKind::Rest, 1_700_000_000_000, 1_700_000_300_000);
        event.uuid = "11111111-1111-1111-1111-111111111111".to_string();
        event.created_at = 1_700_000_300_000;
        event.updated_at = 1_700_000_300_000;

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "rest");
        assert_eq!(json["is_completed"], false);
        assert_eq!(json["start_time"], 1_700_000_000_000i64);
        // Tombstone field stays off the wire for live events.
        assert!(json.get("deleted_at").is_none());

        let parsed: TimedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_timed_event_day() {
        // 2023-11-14T22:13:20Z
        let event = TimedEvent::new("t", EventKind::Custom, 1_700_000_000_000, 1_700_000_060_000);
        assert_eq!(
            event.day(),
            chrono::NaiveDate::from_ymd_opt(2023, 11, 14).unwrap()
        );
    }
}
