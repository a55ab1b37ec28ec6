//! Local change store: the device's durable replica of the user's data plus
//! the pending-mutation queue and sync bookkeeping.
//!
//! Every local mutation marks its row pending (`create`/`update`/`delete`);
//! [`LocalStore::collect_pending`] turns the queue into the next push and the
//! flags are cleared only after the server acknowledged the batch. Applying a
//! pull and persisting the new checkpoint happen in one transaction, so a
//! crash mid-sync re-sends instead of losing data.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use sqlx::{SqliteConnection, SqlitePool};

use super::hub::{ChangeEvent, ChangeHub};
use crate::models::{now_ms, SystemEvent, SystemEventKind, TimedEvent, TimerSettings};
use crate::protocol::{EventPayload, FullSyncData, ServerChanges, SyncChanges, SystemEventPayload};

const PENDING_CREATE: &str = "create";
const PENDING_UPDATE: &str = "update";
const PENDING_DELETE: &str = "delete";

const META_CHECKPOINT: &str = "last_sync_timestamp";
const META_DEVICE_UUID: &str = "device_uuid";
const META_USER_UUID: &str = "user_uuid";
const META_SESSION_TOKEN: &str = "session_token";
const META_TOKEN_EXPIRES_AT: &str = "token_expires_at";
const META_SETTINGS_STAMP: &str = "settings_updated_at";
const META_SETTINGS_DIRTY: &str = "settings_dirty";

/// Device identity and session credentials persisted across restarts.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub device_uuid: String,
    pub user_uuid: String,
    pub session_token: String,
    pub expires_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct LocalEventRow {
    uuid: String,
    title: String,
    start_time: i64,
    end_time: i64,
    event_type: String,
    is_completed: bool,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
    pending: Option<String>,
}

impl LocalEventRow {
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
struct LocalSystemEventRow {
    uuid: String,
    event_type: String,
    timestamp: i64,
    data: String,
    created_at: i64,
}

impl LocalSystemEventRow {
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
     created_at, updated_at, deleted_at, pending FROM events";

/// The client's durable cache. Cheap to clone; clones share the pool and hub.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    hub: ChangeHub,
}

impl LocalStore {
    pub fn new(pool: SqlitePool, hub: ChangeHub) -> Self {
        Self { pool, hub }
    }

    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    // -----------------------------------------------------------------------
    // Local mutations
    // -----------------------------------------------------------------------

    /// Stores a freshly recorded event and queues it for the next push.
    pub async fn record_event(&self, event: &TimedEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO events
             (uuid, title, start_time, end_time, event_type, is_completed,
              created_at, updated_at, deleted_at, pending)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.uuid)
        .bind(&event.title)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.kind.to_string())
        .bind(event.completed)
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.deleted_at)
        .bind(PENDING_CREATE)
        .execute(&self.pool)
        .await?;

        self.hub.publish(ChangeEvent::EventsChanged {
            days: vec![event.day()],
        });
        Ok(())
    }

    /// Applies a local edit: restamps `updated_at` and queues the row. A row
    /// the server never saw stays queued as a create.
    pub async fn update_event(&self, event: &TimedEvent) -> Result<TimedEvent, sqlx::Error> {
        let mut stamped = event.clone();
        stamped.updated_at = now_ms();

        let result = sqlx::query(
            "UPDATE events
             SET title = ?, start_time = ?, end_time = ?, event_type = ?,
                 is_completed = ?, updated_at = ?,
                 pending = CASE WHEN pending = 'create' THEN 'create' ELSE 'update' END
             WHERE uuid = ? AND deleted_at IS NULL",
        )
        .bind(&stamped.title)
        .bind(stamped.start_time)
        .bind(stamped.end_time)
        .bind(stamped.kind.to_string())
        .bind(stamped.completed)
        .bind(stamped.updated_at)
        .bind(&stamped.uuid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        self.hub.publish(ChangeEvent::EventsChanged {
            days: vec![stamped.day()],
        });
        Ok(stamped)
    }

    /// Deletes an event locally. A never-synced row is erased outright; a
    /// synced one becomes a tombstone queued for the next push. Returns false
    /// when there was nothing live to delete.
    pub async fn delete_event(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<LocalEventRow> =
            sqlx::query_as(&format!("{} WHERE uuid = ? AND deleted_at IS NULL", SELECT_EVENT))
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let never_synced = row.pending.as_deref() == Some(PENDING_CREATE);
        let day = row.hydrate()?.day();
        if never_synced {
            sqlx::query("DELETE FROM events WHERE uuid = ?")
                .bind(uuid)
                .execute(&mut *tx)
                .await?;
        } else {
            let now = now_ms();
            sqlx::query(
                "UPDATE events SET deleted_at = ?, updated_at = ?, pending = ? WHERE uuid = ?",
            )
            .bind(now)
            .bind(now)
            .bind(PENDING_DELETE)
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.hub
            .publish(ChangeEvent::EventsChanged { days: vec![day] });
        Ok(true)
    }

    /// Records an ambient observation; replays of the same uuid are ignored.
    pub async fn record_system_event(&self, event: &SystemEvent) -> Result<(), sqlx::Error> {
        let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO system_events
             (uuid, event_type, timestamp, data, created_at, pending)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(&event.uuid)
        .bind(event.kind.to_string())
        .bind(event.timestamp)
        .bind(&data)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.hub.publish(ChangeEvent::SystemEventRecorded);
        }
        Ok(())
    }

    /// Replaces the settings set and marks it dirty for the next push.
    pub async fn save_settings(&self, settings: &TimerSettings) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        write_settings(&mut tx, settings).await?;
        meta_set(&mut tx, META_SETTINGS_DIRTY, "1").await?;
        tx.commit().await?;

        self.hub.publish(ChangeEvent::SettingsChanged);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// A live event by uuid.
    pub async fn get_event(&self, uuid: &str) -> Result<Option<TimedEvent>, sqlx::Error> {
        let row: Option<LocalEventRow> =
            sqlx::query_as(&format!("{} WHERE uuid = ? AND deleted_at IS NULL", SELECT_EVENT))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        row.map(LocalEventRow::hydrate).transpose()
    }

    /// Live events whose start falls on the given UTC day.
    pub async fn events_for_day(&self, day: NaiveDate) -> Result<Vec<TimedEvent>, sqlx::Error> {
        let start = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        let end = start + 86_400_000;
        let rows: Vec<LocalEventRow> = sqlx::query_as(&format!(
            "{} WHERE start_time >= ? AND start_time < ? AND deleted_at IS NULL \
             ORDER BY start_time",
            SELECT_EVENT
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LocalEventRow::hydrate).collect()
    }

    /// Most recent live events, newest first.
    pub async fn recent_events(&self, limit: i64) -> Result<Vec<TimedEvent>, sqlx::Error> {
        let rows: Vec<LocalEventRow> = sqlx::query_as(&format!(
            "{} WHERE deleted_at IS NULL ORDER BY start_time DESC LIMIT ?",
            SELECT_EVENT
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LocalEventRow::hydrate).collect()
    }

    pub async fn load_settings(&self) -> Result<Option<TimerSettings>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        read_settings(&mut conn).await
    }

    /// Checkpoint of the last acknowledged sync; 0 means never synced.
    pub async fn checkpoint(&self) -> Result<i64, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let value = meta_get(&mut conn, META_CHECKPOINT).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Queued-but-unpushed mutation count, for status displays.
    pub async fn pending_count(&self) -> Result<usize, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let (events, system): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM events WHERE pending IS NOT NULL),
                    (SELECT COUNT(*) FROM system_events WHERE pending = 1)",
        )
        .fetch_one(&mut *conn)
        .await?;
        let dirty = meta_get(&mut conn, META_SETTINGS_DIRTY).await?.as_deref() == Some("1");
        Ok(events as usize + system as usize + usize::from(dirty))
    }

    // -----------------------------------------------------------------------
    // Sync support
    // -----------------------------------------------------------------------

    /// The changeset for the next incremental push.
    pub async fn collect_pending(&self) -> Result<SyncChanges, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let mut changes = SyncChanges::default();

        let created: Vec<LocalEventRow> = sqlx::query_as(&format!(
            "{} WHERE pending = ? ORDER BY updated_at",
            SELECT_EVENT
        ))
        .bind(PENDING_CREATE)
        .fetch_all(&mut *conn)
        .await?;
        for row in created {
            changes
                .pomodoro_events
                .created
                .push(EventPayload::from(&row.hydrate()?));
        }

        let updated: Vec<LocalEventRow> = sqlx::query_as(&format!(
            "{} WHERE pending = ? ORDER BY updated_at",
            SELECT_EVENT
        ))
        .bind(PENDING_UPDATE)
        .fetch_all(&mut *conn)
        .await?;
        for row in updated {
            changes
                .pomodoro_events
                .updated
                .push(EventPayload::from(&row.hydrate()?));
        }

        changes.pomodoro_events.deleted =
            sqlx::query_scalar("SELECT uuid FROM events WHERE pending = ? ORDER BY updated_at")
                .bind(PENDING_DELETE)
                .fetch_all(&mut *conn)
                .await?;

        let system: Vec<LocalSystemEventRow> = sqlx::query_as(
            "SELECT uuid, event_type, timestamp, data, created_at FROM system_events
             WHERE pending = 1 ORDER BY created_at",
        )
        .fetch_all(&mut *conn)
        .await?;
        for row in system {
            changes
                .system_events
                .created
                .push(SystemEventPayload::from(&row.hydrate()?));
        }

        if meta_get(&mut conn, META_SETTINGS_DIRTY).await?.as_deref() == Some("1") {
            changes.timer_settings = read_settings(&mut conn).await?;
        }

        Ok(changes)
    }

    /// Everything the device holds, shaped as a push. Force overwrite sends
    /// the complete local state, pending or not.
    pub async fn collect_full_state(&self) -> Result<SyncChanges, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let mut changes = SyncChanges::default();

        let rows: Vec<LocalEventRow> = sqlx::query_as(&format!(
            "{} WHERE deleted_at IS NULL ORDER BY start_time",
            SELECT_EVENT
        ))
        .fetch_all(&mut *conn)
        .await?;
        for row in rows {
            changes
                .pomodoro_events
                .created
                .push(EventPayload::from(&row.hydrate()?));
        }

        let system: Vec<LocalSystemEventRow> = sqlx::query_as(
            "SELECT uuid, event_type, timestamp, data, created_at FROM system_events
             ORDER BY created_at",
        )
        .fetch_all(&mut *conn)
        .await?;
        for row in system {
            changes
                .system_events
                .created
                .push(SystemEventPayload::from(&row.hydrate()?));
        }

        changes.timer_settings = read_settings(&mut conn).await?;
        Ok(changes)
    }

    /// Clears the pending flags of an acknowledged push. Rows edited again
    /// while the push was in flight carry a newer `updated_at` and stay
    /// queued.
    pub async fn clear_pending(&self, pushed: &SyncChanges) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for payload in pushed
            .pomodoro_events
            .created
            .iter()
            .chain(&pushed.pomodoro_events.updated)
        {
            sqlx::query(
                "UPDATE events SET pending = NULL
                 WHERE uuid = ? AND pending IS NOT NULL AND updated_at = ?",
            )
            .bind(&payload.uuid)
            .bind(payload.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for uuid in &pushed.pomodoro_events.deleted {
            sqlx::query("UPDATE events SET pending = NULL WHERE uuid = ? AND pending = ?")
                .bind(uuid)
                .bind(PENDING_DELETE)
                .execute(&mut *tx)
                .await?;
        }

        for payload in &pushed.system_events.created {
            sqlx::query("UPDATE system_events SET pending = 0 WHERE uuid = ?")
                .bind(&payload.uuid)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(settings) = &pushed.timer_settings {
            let stamp = meta_get(&mut tx, META_SETTINGS_STAMP)
                .await?
                .and_then(|v| v.parse::<i64>().ok());
            if stamp == Some(settings.updated_at) {
                meta_set(&mut tx, META_SETTINGS_DIRTY, "0").await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Applies a pull and persists the new checkpoint, atomically. Returns the
    /// number of applied rows.
    ///
    /// A pending local row survives an older incoming one (it wins the next
    /// push instead), but deletion notices always land.
    pub async fn apply_server_changes(
        &self,
        changes: &ServerChanges,
        checkpoint: i64,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0usize;
        let mut days = BTreeSet::new();
        let mut settings_changed = false;

        for event in &changes.pomodoro_events {
            if event.is_deleted() {
                upsert_event(&mut tx, event).await?;
                applied += 1;
                days.insert(event.day());
                continue;
            }

            let existing: Option<LocalEventRow> =
                sqlx::query_as(&format!("{} WHERE uuid = ?", SELECT_EVENT))
                    .bind(&event.uuid)
                    .fetch_optional(&mut *tx)
                    .await?;
            let keep_local = existing
                .as_ref()
                .is_some_and(|row| row.pending.is_some() && row.updated_at > event.updated_at);
            if keep_local {
                continue;
            }

            upsert_event(&mut tx, event).await?;
            applied += 1;
            days.insert(event.day());
        }

        for event in &changes.system_events {
            let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
            let result = sqlx::query(
                "INSERT OR IGNORE INTO system_events
                 (uuid, event_type, timestamp, data, created_at, pending)
                 VALUES (?, ?, ?, ?, ?, 0)",
            )
            .bind(&event.uuid)
            .bind(event.kind.to_string())
            .bind(event.timestamp)
            .bind(&data)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
            applied += result.rows_affected() as usize;
        }

        if let Some(incoming) = &changes.timer_settings {
            let dirty = meta_get(&mut tx, META_SETTINGS_DIRTY).await?.as_deref() == Some("1");
            let stamp = meta_get(&mut tx, META_SETTINGS_STAMP)
                .await?
                .and_then(|v| v.parse::<i64>().ok());
            let keep_local = dirty && stamp.is_some_and(|stamp| stamp > incoming.updated_at);
            if !keep_local {
                write_settings(&mut tx, incoming).await?;
                meta_set(&mut tx, META_SETTINGS_DIRTY, "0").await?;
                applied += 1;
                settings_changed = true;
            }
        }

        meta_set(&mut tx, META_CHECKPOINT, &checkpoint.to_string()).await?;
        tx.commit().await?;

        if !days.is_empty() {
            self.hub.publish(ChangeEvent::EventsChanged {
                days: days.into_iter().collect(),
            });
        }
        if settings_changed {
            self.hub.publish(ChangeEvent::SettingsChanged);
        }
        Ok(applied)
    }

    /// Full-sync install: wipes the replica, pending queue included, and
    /// installs the server's state under its checkpoint.
    pub async fn replace_all(&self, data: &FullSyncData) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM events").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM system_events")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM settings").execute(&mut *tx).await?;
        meta_delete(&mut tx, META_SETTINGS_STAMP).await?;
        meta_set(&mut tx, META_SETTINGS_DIRTY, "0").await?;

        for event in &data.pomodoro_events {
            upsert_event(&mut tx, event).await?;
        }
        for event in &data.system_events {
            let payload_data =
                serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
            sqlx::query(
                "INSERT OR IGNORE INTO system_events
                 (uuid, event_type, timestamp, data, created_at, pending)
                 VALUES (?, ?, ?, ?, ?, 0)",
            )
            .bind(&event.uuid)
            .bind(event.kind.to_string())
            .bind(event.timestamp)
            .bind(&payload_data)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        }
        if let Some(settings) = &data.timer_settings {
            write_settings(&mut tx, settings).await?;
        }

        meta_set(&mut tx, META_CHECKPOINT, &data.server_timestamp.to_string()).await?;
        tx.commit().await?;

        let installed = data.pomodoro_events.len() + data.system_events.len();
        self.hub
            .publish(ChangeEvent::EventsChanged { days: vec![] });
        if data.timer_settings.is_some() {
            self.hub.publish(ChangeEvent::SettingsChanged);
        }
        Ok(installed)
    }

    /// Marks the whole replica as in sync with the server at `checkpoint`.
    /// Used after a force overwrite: the server now holds exactly the local
    /// live state, so local tombstones are moot and are dropped.
    pub async fn mark_all_synced(&self, checkpoint: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM events WHERE deleted_at IS NOT NULL")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE events SET pending = NULL")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE system_events SET pending = 0")
            .execute(&mut *tx)
            .await?;
        meta_set(&mut tx, META_SETTINGS_DIRTY, "0").await?;
        meta_set(&mut tx, META_CHECKPOINT, &checkpoint.to_string()).await?;
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    pub async fn credentials(&self) -> Result<Option<StoredCredentials>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let device_uuid = meta_get(&mut conn, META_DEVICE_UUID).await?;
        let user_uuid = meta_get(&mut conn, META_USER_UUID).await?;
        let session_token = meta_get(&mut conn, META_SESSION_TOKEN).await?;
        let expires_at = meta_get(&mut conn, META_TOKEN_EXPIRES_AT)
            .await?
            .and_then(|v| v.parse::<i64>().ok());

        match (device_uuid, user_uuid, session_token, expires_at) {
            (Some(device_uuid), Some(user_uuid), Some(session_token), Some(expires_at)) => {
                Ok(Some(StoredCredentials {
                    device_uuid,
                    user_uuid,
                    session_token,
                    expires_at,
                }))
            }
            _ => Ok(None),
        }
    }

    pub async fn save_credentials(&self, creds: &StoredCredentials) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        meta_set(&mut tx, META_DEVICE_UUID, &creds.device_uuid).await?;
        meta_set(&mut tx, META_USER_UUID, &creds.user_uuid).await?;
        meta_set(&mut tx, META_SESSION_TOKEN, &creds.session_token).await?;
        meta_set(&mut tx, META_TOKEN_EXPIRES_AT, &creds.expires_at.to_string()).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_session(&self, token: &str, expires_at: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        meta_set(&mut tx, META_SESSION_TOKEN, token).await?;
        meta_set(&mut tx, META_TOKEN_EXPIRES_AT, &expires_at.to_string()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops the session but keeps the device identity, so a later login binds
    /// the same device again.
    pub async fn clear_session(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        meta_delete(&mut tx, META_SESSION_TOKEN).await?;
        meta_delete(&mut tx, META_TOKEN_EXPIRES_AT).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn stored_device_uuid(&self) -> Result<Option<String>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        meta_get(&mut conn, META_DEVICE_UUID).await
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Installs a server-authored row verbatim, clearing any pending flag.
async fn upsert_event(conn: &mut SqliteConnection, event: &TimedEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR REPLACE INTO events
         (uuid, title, start_time, end_time, event_type, is_completed,
          created_at, updated_at, deleted_at, pending)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
    )
    .bind(&event.uuid)
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.kind.to_string())
    .bind(event.completed)
    .bind(event.created_at)
    .bind(event.updated_at)
    .bind(event.deleted_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn read_settings(conn: &mut SqliteConnection) -> Result<Option<TimerSettings>, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
        .fetch_all(&mut *conn)
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let updated_at = meta_get(conn, META_SETTINGS_STAMP)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut settings = TimerSettings {
        updated_at,
        values: Default::default(),
    };
    for (key, value) in rows {
        let value =
            serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value.clone()));
        settings.values.insert(key, value);
    }
    Ok(Some(settings))
}

async fn write_settings(
    conn: &mut SqliteConnection,
    settings: &TimerSettings,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM settings").execute(&mut *conn).await?;
    for (key, value) in &settings.values {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value.to_string())
            .execute(&mut *conn)
            .await?;
    }
    meta_set(conn, META_SETTINGS_STAMP, &settings.updated_at.to_string()).await
}

async fn meta_get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await
}

async fn meta_set(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(conn)
        .await?;
    Ok(())
}

async fn meta_delete(conn: &mut SqliteConnection, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sync_meta WHERE key = ?")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}
