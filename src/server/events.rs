//! Entity store for the sync server: row-level operations on timed events,
//! system events and timer settings.
//!
//! Every function takes a `&mut SqliteConnection` instead of a pool so the
//! merge coordinator can run a whole sync request on one transaction. Nothing
//! here commits.

use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::{SystemEvent, SystemEventKind, TimedEvent, TimerSettings};

#[derive(Debug, sqlx::FromRow)]
struct TimedEventRow {
    uuid: String,
    title: String,
    start_time: i64,
    end_time: i64,
    event_type: String,
    is_completed: bool,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl TimedEventRow {
    fn hydrate(self) -> Result<TimedEvent, sqlx::Error> {
        let kind = crate::models::EventKind::from_str(&self.event_type)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(TimedEvent {
            uuid: self.uuid,
            title: self.title,
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

#[derive(Debug, sqlx::FromRow)]
struct SystemEventRow {
    uuid: String,
    event_type: String,
    timestamp: i64,
    data: String,
    created_at: i64,
}

impl SystemEventRow {
    fn hydrate(self) -> Result<SystemEvent, sqlx::Error> {
        let kind = SystemEventKind::from_str(&self.event_type)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(SystemEvent {
            uuid: self.uuid,
            kind,
            timestamp: self.timestamp,
            data: serde_json::from_str(&self.data).unwrap_or_default(),
            created_at: self.created_at,
        })
    }
}

const SELECT_EVENT: &str = "SELECT uuid, title, start_time, end_time, event_type, is_completed, \
     created_at, updated_at, deleted_at FROM timed_events";

pub async fn get_event(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    uuid: &str,
) -> Result<Option<TimedEvent>, sqlx::Error> {
    let row: Option<TimedEventRow> =
        sqlx::query_as(&format!("{} WHERE user_uuid = ? AND uuid = ?", SELECT_EVENT))
            .bind(user_uuid)
            .bind(uuid)
            .fetch_optional(conn)
            .await?;
    row.map(TimedEventRow::hydrate).transpose()
}

pub async fn insert_event(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    device_uuid: &str,
    event: &TimedEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO timed_events
         (uuid, user_uuid, device_uuid, title, start_time, end_time, event_type,
          is_completed, created_at, updated_at, deleted_at, last_modified_device)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.uuid)
    .bind(user_uuid)
    .bind(device_uuid)
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.kind.to_string())
    .bind(event.completed)
    .bind(event.created_at)
    .bind(event.updated_at)
    .bind(event.deleted_at)
    .bind(device_uuid)
    .execute(conn)
    .await?;
    Ok(())
}

/// Overwrite a row's mutable fields. Never touches `created_at` or
/// `deleted_at`: tombstones stay tombstones.
pub async fn update_event(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    device_uuid: &str,
    event: &TimedEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE timed_events
         SET title = ?, start_time = ?, end_time = ?, event_type = ?,
             is_completed = ?, updated_at = ?, last_modified_device = ?
         WHERE user_uuid = ? AND uuid = ?",
    )
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.kind.to_string())
    .bind(event.completed)
    .bind(event.updated_at)
    .bind(device_uuid)
    .bind(user_uuid)
    .bind(&event.uuid)
    .execute(conn)
    .await?;
    Ok(())
}

/// Tombstone a live row with the given server stamp. Returns false when there
/// was nothing live to delete, which callers treat as a no-op.
pub async fn soft_delete_event(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    device_uuid: &str,
    uuid: &str,
    stamp: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE timed_events
         SET deleted_at = ?, updated_at = ?, last_modified_device = ?
         WHERE user_uuid = ? AND uuid = ? AND deleted_at IS NULL",
    )
    .bind(stamp)
    .bind(stamp)
    .bind(device_uuid)
    .bind(user_uuid)
    .bind(uuid)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn live_events_after(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    since: i64,
) -> Result<Vec<TimedEvent>, sqlx::Error> {
    let rows: Vec<TimedEventRow> = sqlx::query_as(&format!(
        "{} WHERE user_uuid = ? AND updated_at > ? AND deleted_at IS NULL ORDER BY updated_at",
        SELECT_EVENT
    ))
    .bind(user_uuid)
    .bind(since)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(TimedEventRow::hydrate).collect()
}

/// Tombstoned rows deleted after `since`, for deletion notices.
pub async fn tombstones_after(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    since: i64,
) -> Result<Vec<TimedEvent>, sqlx::Error> {
    let rows: Vec<TimedEventRow> = sqlx::query_as(&format!(
        "{} WHERE user_uuid = ? AND deleted_at > ? ORDER BY deleted_at",
        SELECT_EVENT
    ))
    .bind(user_uuid)
    .bind(since)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(TimedEventRow::hydrate).collect()
}

pub async fn all_live_events(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<Vec<TimedEvent>, sqlx::Error> {
    let rows: Vec<TimedEventRow> = sqlx::query_as(&format!(
        "{} WHERE user_uuid = ? AND deleted_at IS NULL ORDER BY start_time",
        SELECT_EVENT
    ))
    .bind(user_uuid)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(TimedEventRow::hydrate).collect()
}

/// Largest deletion stamp for the user, so full-sync checkpoints also cover
/// tombstones the response does not carry.
pub async fn max_tombstone_stamp(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(deleted_at) FROM timed_events WHERE user_uuid = ?")
            .bind(user_uuid)
            .fetch_one(conn)
            .await?;
    Ok(row.0)
}

/// Append-only insert; duplicate uuids are silently ignored. Returns whether a
/// row was actually written.
pub async fn insert_system_event(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    device_uuid: &str,
    event: &SystemEvent,
) -> Result<bool, sqlx::Error> {
    let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
    let result = sqlx::query(
        "INSERT OR IGNORE INTO system_events
         (uuid, user_uuid, device_uuid, event_type, timestamp, data, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.uuid)
    .bind(user_uuid)
    .bind(device_uuid)
    .bind(event.kind.to_string())
    .bind(event.timestamp)
    .bind(&data)
    .bind(event.created_at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn system_events_after(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    since: i64,
) -> Result<Vec<SystemEvent>, sqlx::Error> {
    let rows: Vec<SystemEventRow> = sqlx::query_as(
        "SELECT uuid, event_type, timestamp, data, created_at FROM system_events
         WHERE user_uuid = ? AND created_at > ? ORDER BY created_at",
    )
    .bind(user_uuid)
    .bind(since)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(SystemEventRow::hydrate).collect()
}

pub async fn all_system_events(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<Vec<SystemEvent>, sqlx::Error> {
    let rows: Vec<SystemEventRow> = sqlx::query_as(
        "SELECT uuid, event_type, timestamp, data, created_at FROM system_events
         WHERE user_uuid = ? ORDER BY timestamp",
    )
    .bind(user_uuid)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(SystemEventRow::hydrate).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct SettingRow {
    key: String,
    value: String,
    updated_at: i64,
}

/// The user's settings set, or None when nothing was ever stored.
pub async fn load_settings(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<Option<TimerSettings>, sqlx::Error> {
    let rows: Vec<SettingRow> =
        sqlx::query_as("SELECT key, value, updated_at FROM timer_settings WHERE user_uuid = ?")
            .bind(user_uuid)
            .fetch_all(conn)
            .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut settings = TimerSettings {
        updated_at: 0,
        values: BTreeMap::new(),
    };
    for row in rows {
        // Values are stored as JSON text; bare strings written by older
        // clients fall back to string values.
        let value = serde_json::from_str(&row.value)
            .unwrap_or(serde_json::Value::String(row.value.clone()));
        settings.values.insert(row.key, value);
        settings.updated_at = settings.updated_at.max(row.updated_at);
    }
    Ok(Some(settings))
}

pub async fn settings_stamp(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(updated_at) FROM timer_settings WHERE user_uuid = ?")
            .bind(user_uuid)
            .fetch_one(conn)
            .await?;
    Ok(row.0)
}

/// Swap the complete settings set; every pair gets the set's stamp.
pub async fn replace_settings(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    settings: &TimerSettings,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM timer_settings WHERE user_uuid = ?")
        .bind(user_uuid)
        .execute(&mut *conn)
        .await?;
    for (key, value) in &settings.values {
        sqlx::query(
            "INSERT INTO timer_settings (user_uuid, key, value, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_uuid)
        .bind(key)
        .bind(value.to_string())
        .bind(settings.updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Force-overwrite support: drop everything the user has, tombstones included.
pub async fn purge_user_data(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM timed_events WHERE user_uuid = ?")
        .bind(user_uuid)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM system_events WHERE user_uuid = ?")
        .bind(user_uuid)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM timer_settings WHERE user_uuid = ?")
        .bind(user_uuid)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Largest checkpoint ever handed to one of the user's devices, 0 when the
/// user never synced. Server-authored stamps must land strictly above this or
/// a same-millisecond mutation falls into the gap below an issued checkpoint.
pub async fn max_issued_checkpoint(
    conn: &mut SqliteConnection,
    user_uuid: &str,
) -> Result<i64, sqlx::Error> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(last_sync_timestamp) FROM devices WHERE user_uuid = ?")
            .bind(user_uuid)
            .fetch_one(conn)
            .await?;
    Ok(row.0.unwrap_or(0))
}

/// Advance the device's server-side checkpoint and liveness stamps.
pub async fn touch_device_sync(
    conn: &mut SqliteConnection,
    device_uuid: &str,
    checkpoint: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE devices SET last_sync_timestamp = ?, last_seen_at = ? WHERE uuid = ?",
    )
    .bind(checkpoint)
    .bind(now)
    .bind(device_uuid)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn touch_user_activity(
    conn: &mut SqliteConnection,
    user_uuid: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_active_at = ? WHERE uuid = ?")
        .bind(now)
        .bind(user_uuid)
        .execute(conn)
        .await?;
    Ok(())
}
