//! Wire types for the sync API: the response envelope, auth payloads, and the
//! changeset shapes exchanged by incremental and full sync.
//!
//! Pushed events deliberately carry loose types (`event_type` as a string, uuid
//! as a string) so one malformed entity degrades to a per-entity rejection
//! instead of failing the whole batch; [`EventPayload::parse`] does the
//! per-entity validation on the server side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{now_ms, EventKind, SystemEvent, SystemEventKind, TimedEvent, TimerSettings};

/// Envelope every endpoint answers with:
/// `{"success": true, "data": …, "timestamp": ms}` on success,
/// `{"success": false, "message": …, "timestamp": ms}` on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: now_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            timestamp: now_ms(),
        }
    }

    /// Client-side unwrap: the payload on success, the server's message on
    /// failure.
    pub fn into_data(self) -> Result<T, String> {
        if self.success {
            self.data
                .ok_or_else(|| "server reported success without data".to_string())
        } else {
            Err(self
                .message
                .unwrap_or_else(|| "server reported an unspecified error".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInitRequest {
    pub device_uuid: String,
    pub device_name: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBindRequest {
    pub device_uuid: String,
    pub user_uuid: String,
    pub device_name: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInitData {
    pub user_uuid: String,
    pub device_uuid: String,
    pub session_token: String,
    pub expires_at: i64,
    pub is_new_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBindData {
    pub user_uuid: String,
    pub device_uuid: String,
    pub session_token: String,
    pub expires_at: i64,
    /// Checkpoint the server last saw from this device, so a re-bound client
    /// can resume instead of starting from zero.
    pub last_sync_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshData {
    pub session_token: String,
    pub expires_at: i64,
}

// ---------------------------------------------------------------------------
// Sync changesets
// ---------------------------------------------------------------------------

/// A pushed timed event, before validation. Field names follow the wire format
/// (`event_type`, `is_completed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub uuid: String,
    pub title: String,
    pub start_time: i64,
    pub end_time: i64,
    pub event_type: String,
    pub is_completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl EventPayload {
    /// Validates the payload into a domain event: well-formed uuid, known
    /// event type, and a non-negative duration. The uuid is normalized to
    /// lowercase hyphenated form.
    pub fn parse(&self) -> Result<TimedEvent, String> {
        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|_| format!("malformed uuid '{}'", self.uuid))?;
        if self.end_time < self.start_time {
            return Err(format!(
                "end_time {} precedes start_time {}",
                self.end_time, self.start_time
            ));
        }
        let kind = EventKind::from_str(&self.event_type)?;
        Ok(TimedEvent {
            uuid: uuid.to_string(),
            title: self.title.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            kind,
            completed: self.is_completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

impl From<&TimedEvent> for EventPayload {
    fn from(event: &TimedEvent) -> Self {
        Self {
            uuid: event.uuid.clone(),
            title: event.title.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            event_type: event.kind.to_string(),
            is_completed: event.completed,
            created_at: event.created_at,
            updated_at: event.updated_at,
            deleted_at: event.deleted_at,
        }
    }
}

/// A pushed system event, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEventPayload {
    pub uuid: String,
    pub event_type: String,
    pub timestamp: i64,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl SystemEventPayload {
    pub fn parse(&self) -> Result<SystemEvent, String> {
        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|_| format!("malformed uuid '{}'", self.uuid))?;
        let kind = SystemEventKind::from_str(&self.event_type)?;
        Ok(SystemEvent {
            uuid: uuid.to_string(),
            kind,
            timestamp: self.timestamp,
            data: self.data.clone(),
            created_at: self.created_at.unwrap_or_else(now_ms),
        })
    }
}

impl From<&SystemEvent> for SystemEventPayload {
    fn from(event: &SystemEvent) -> Self {
        Self {
            uuid: event.uuid.clone(),
            event_type: event.kind.to_string(),
            timestamp: event.timestamp,
            data: event.data.clone(),
            created_at: Some(event.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventChangeSet {
    #[serde(default)]
    pub created: Vec<EventPayload>,
    #[serde(default)]
    pub updated: Vec<EventPayload>,
    /// Uuids to soft-delete.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl EventChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemEventChangeSet {
    #[serde(default)]
    pub created: Vec<SystemEventPayload>,
}

/// Client → server half of an incremental sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncChanges {
    #[serde(default)]
    pub pomodoro_events: EventChangeSet,
    #[serde(default)]
    pub system_events: SystemEventChangeSet,
    /// Complete settings set, present only when it changed locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_settings: Option<TimerSettings>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.pomodoro_events.is_empty()
            && self.system_events.created.is_empty()
            && self.timer_settings.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncRequest {
    /// High-water-mark from the previous sync; 0 means "never synced".
    pub last_sync_timestamp: i64,
    /// Destructive replace of server state. Only honored together with a
    /// checkpoint of 0; never inferred from the checkpoint alone.
    #[serde(default)]
    pub force_overwrite: bool,
    pub changes: SyncChanges,
}

/// Server → client half: pulled state, flat per collection. Deletion notices
/// ride in `pomodoro_events` with `deleted_at` set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerChanges {
    #[serde(default)]
    pub pomodoro_events: Vec<TimedEvent>,
    #[serde(default)]
    pub system_events: Vec<SystemEvent>,
    #[serde(default)]
    pub timer_settings: Option<TimerSettings>,
}

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        self.pomodoro_events.is_empty()
            && self.system_events.is_empty()
            && self.timer_settings.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncData {
    pub server_changes: ServerChanges,
    pub conflicts: Vec<SyncConflict>,
    /// New checkpoint: at least as large as every timestamp this transaction
    /// applied or returned.
    pub server_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSyncData {
    pub pomodoro_events: Vec<TimedEvent>,
    pub system_events: Vec<SystemEvent>,
    pub timer_settings: Option<TimerSettings>,
    pub server_timestamp: i64,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictEntity {
    PomodoroEvent,
    SystemEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Create for a uuid that already exists; first writer won.
    DuplicateUuid,
    /// Update against a row changed since the caller's checkpoint; the greater
    /// `updated_at` won.
    StaleUpdate,
    /// Entity failed validation and was skipped.
    InvalidPayload,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::DuplicateUuid => write!(f, "duplicate_uuid"),
            ConflictReason::StaleUpdate => write!(f, "stale_update"),
            ConflictReason::InvalidPayload => write!(f, "invalid_payload"),
        }
    }
}

/// Per-entity sync outcome the server reports instead of failing the batch.
/// Conflicts are data, not errors: the request still succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    #[serde(rename = "type")]
    pub entity: ConflictEntity,
    pub uuid: String,
    pub reason: ConflictReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SyncConflict {
    pub fn duplicate(entity: ConflictEntity, uuid: impl Into<String>) -> Self {
        Self {
            entity,
            uuid: uuid.into(),
            reason: ConflictReason::DuplicateUuid,
            server_updated_at: None,
            client_updated_at: None,
            detail: None,
        }
    }

    pub fn stale(
        uuid: impl Into<String>,
        server_updated_at: i64,
        client_updated_at: i64,
    ) -> Self {
        Self {
            entity: ConflictEntity::PomodoroEvent,
            uuid: uuid.into(),
            reason: ConflictReason::StaleUpdate,
            server_updated_at: Some(server_updated_at),
            client_updated_at: Some(client_updated_at),
            detail: None,
        }
    }

    pub fn invalid(
        entity: ConflictEntity,
        uuid: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            uuid: uuid.into(),
            reason: ConflictReason::InvalidPayload,
            server_updated_at: None,
            client_updated_at: None,
            detail: Some(detail.into()),
        }
    }
}
