//! Merge coordinator: applies a device's pushed changes, records conflicts,
//! computes the pull delta and the new checkpoint.
//!
//! One sync request is one database transaction. Mutations are applied in a
//! fixed order (creates, updates, deletes, system events, settings), per-entity
//! problems become [`SyncConflict`] entries instead of failing the batch, and
//! any storage error rolls the whole request back.
//!
//! The returned `server_timestamp` is the maximum of the server clock and
//! every timestamp the transaction applied or returned, so a client may store
//! it as an exact lower bound: a later query with it never re-delivers rows
//! this response already covered.

use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use super::error::MergeError;
use super::events;
use super::identity::SessionContext;
use crate::models::{now_ms, TimedEvent};
use crate::protocol::{
    ConflictEntity, FullSyncData, IncrementalSyncData, IncrementalSyncRequest, ServerChanges,
    SyncConflict,
};

#[derive(Clone)]
pub struct MergeCoordinator {
    pool: SqlitePool,
}

impl MergeCoordinator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply one incremental sync request and assemble its response.
    pub async fn incremental(
        &self,
        ctx: &SessionContext,
        req: &IncrementalSyncRequest,
    ) -> Result<IncrementalSyncData, MergeError> {
        if req.force_overwrite {
            if req.last_sync_timestamp != 0 {
                return Err(MergeError::Validation(
                    "force_overwrite requires last_sync_timestamp 0".to_string(),
                ));
            }
            return self.force_overwrite(ctx, req).await;
        }

        let checkpoint = req.last_sync_timestamp;
        let mut conflicts: Vec<SyncConflict> = Vec::new();
        // Uuids this request successfully applied. They are excluded from the
        // pull delta; conflicted uuids are not, so a losing device receives
        // the winning row in the same response.
        let mut applied_events: HashSet<String> = HashSet::new();
        let mut applied_system: HashSet<String> = HashSet::new();

        let mut tx = self.pool.begin().await?;
        let now = transaction_clock(&mut tx, &ctx.user_uuid).await?;
        let mut max_seen = now;

        for payload in &req.changes.pomodoro_events.created {
            let event = match payload.parse() {
                Ok(event) => event,
                Err(detail) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::PomodoroEvent,
                        &payload.uuid,
                        detail,
                    ));
                    continue;
                }
            };
            match events::get_event(&mut tx, &ctx.user_uuid, &event.uuid).await? {
                Some(_) => {
                    // First writer wins, tombstones included: a deleted uuid is
                    // not resurrected by a late create.
                    conflicts.push(SyncConflict::duplicate(
                        ConflictEntity::PomodoroEvent,
                        &event.uuid,
                    ));
                }
                None => {
                    events::insert_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event)
                        .await?;
                    max_seen = max_seen.max(event_stamp(&event));
                    applied_events.insert(event.uuid);
                }
            }
        }

        for payload in &req.changes.pomodoro_events.updated {
            let event = match payload.parse() {
                Ok(event) => event,
                Err(detail) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::PomodoroEvent,
                        &payload.uuid,
                        detail,
                    ));
                    continue;
                }
            };
            let stored = match events::get_event(&mut tx, &ctx.user_uuid, &event.uuid).await? {
                Some(stored) => stored,
                // Unknown uuid: a delete may have raced ahead of this update,
                // or the create never arrived. Nothing to do either way.
                None => continue,
            };
            if stored.is_deleted() {
                continue;
            }

            if stored.updated_at > checkpoint {
                conflicts.push(SyncConflict::stale(
                    &event.uuid,
                    stored.updated_at,
                    event.updated_at,
                ));
                if event.updated_at > stored.updated_at {
                    events::update_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event)
                        .await?;
                    max_seen = max_seen.max(event.updated_at);
                    applied_events.insert(event.uuid);
                }
                // Otherwise the stored row stays; it is newer and will reach
                // the caller through the delta below.
            } else {
                events::update_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event).await?;
                max_seen = max_seen.max(event.updated_at);
                applied_events.insert(event.uuid);
            }
        }

        for raw in &req.changes.pomodoro_events.deleted {
            let uuid = match Uuid::parse_str(raw) {
                Ok(uuid) => uuid.to_string(),
                Err(_) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::PomodoroEvent,
                        raw,
                        format!("malformed uuid '{}'", raw),
                    ));
                    continue;
                }
            };
            if events::soft_delete_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &uuid, now)
                .await?
            {
                applied_events.insert(uuid);
            }
        }

        for payload in &req.changes.system_events.created {
            let event = match payload.parse() {
                Ok(event) => event,
                Err(detail) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::SystemEvent,
                        &payload.uuid,
                        detail,
                    ));
                    continue;
                }
            };
            if events::insert_system_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event)
                .await?
            {
                max_seen = max_seen.max(event.created_at);
                applied_system.insert(event.uuid);
            }
            // Duplicate replays of append-only events are ignored silently.
        }

        let mut settings_replaced = false;
        if let Some(incoming) = &req.changes.timer_settings {
            let stored_stamp = events::settings_stamp(&mut tx, &ctx.user_uuid).await?;
            let newer = stored_stamp.is_none_or(|stamp| incoming.updated_at > stamp);
            if checkpoint == 0 || newer {
                events::replace_settings(&mut tx, &ctx.user_uuid, incoming).await?;
                max_seen = max_seen.max(incoming.updated_at);
                settings_replaced = true;
            }
        }

        // Pull delta, computed after the mutations so this request's writes
        // for OTHER rows are reflected but its own applied writes are not.
        let mut pulled: Vec<TimedEvent> =
            events::live_events_after(&mut tx, &ctx.user_uuid, checkpoint)
                .await?
                .into_iter()
                .filter(|event| !applied_events.contains(&event.uuid))
                .collect();
        let notices = events::tombstones_after(&mut tx, &ctx.user_uuid, checkpoint)
            .await?
            .into_iter()
            .filter(|event| !applied_events.contains(&event.uuid));
        pulled.extend(notices);

        let system_pulled: Vec<_> =
            events::system_events_after(&mut tx, &ctx.user_uuid, checkpoint)
                .await?
                .into_iter()
                .filter(|event| !applied_system.contains(&event.uuid))
                .collect();

        let settings_out = if settings_replaced {
            None
        } else {
            match events::load_settings(&mut tx, &ctx.user_uuid).await? {
                Some(settings) if settings.updated_at > checkpoint => Some(settings),
                _ => None,
            }
        };

        for event in &pulled {
            max_seen = max_seen.max(event_stamp(event));
        }
        for event in &system_pulled {
            max_seen = max_seen.max(event.created_at);
        }
        if let Some(settings) = &settings_out {
            max_seen = max_seen.max(settings.updated_at);
        }
        let server_timestamp = max_seen;

        events::touch_device_sync(&mut tx, &ctx.device_uuid, server_timestamp, now).await?;
        events::touch_user_activity(&mut tx, &ctx.user_uuid, now).await?;
        tx.commit().await?;

        tracing::debug!(
            user_uuid = %ctx.user_uuid,
            device_uuid = %ctx.device_uuid,
            applied = applied_events.len(),
            conflicts = conflicts.len(),
            pulled = pulled.len(),
            server_timestamp,
            "incremental sync merged"
        );

        Ok(IncrementalSyncData {
            server_changes: ServerChanges {
                pomodoro_events: pulled,
                system_events: system_pulled,
                timer_settings: settings_out,
            },
            conflicts,
            server_timestamp,
        })
    }

    /// Destructive replace: drop the user's server state and install the
    /// pushed state instead. Reached only with the explicit flag and a zero
    /// checkpoint. The pushed `created` lists are taken as the complete state;
    /// update and delete lists are meaningless here and ignored.
    async fn force_overwrite(
        &self,
        ctx: &SessionContext,
        req: &IncrementalSyncRequest,
    ) -> Result<IncrementalSyncData, MergeError> {
        let mut conflicts: Vec<SyncConflict> = Vec::new();

        let mut tx = self.pool.begin().await?;
        let now = transaction_clock(&mut tx, &ctx.user_uuid).await?;
        let mut max_seen = now;
        events::purge_user_data(&mut tx, &ctx.user_uuid).await?;

        for payload in &req.changes.pomodoro_events.created {
            let event = match payload.parse() {
                Ok(event) => event,
                Err(detail) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::PomodoroEvent,
                        &payload.uuid,
                        detail,
                    ));
                    continue;
                }
            };
            if events::get_event(&mut tx, &ctx.user_uuid, &event.uuid).await?.is_some() {
                conflicts.push(SyncConflict::duplicate(
                    ConflictEntity::PomodoroEvent,
                    &event.uuid,
                ));
                continue;
            }
            events::insert_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event).await?;
            max_seen = max_seen.max(event_stamp(&event));
        }

        for payload in &req.changes.system_events.created {
            let event = match payload.parse() {
                Ok(event) => event,
                Err(detail) => {
                    conflicts.push(SyncConflict::invalid(
                        ConflictEntity::SystemEvent,
                        &payload.uuid,
                        detail,
                    ));
                    continue;
                }
            };
            if events::insert_system_event(&mut tx, &ctx.user_uuid, &ctx.device_uuid, &event)
                .await?
            {
                max_seen = max_seen.max(event.created_at);
            }
        }

        if let Some(settings) = &req.changes.timer_settings {
            events::replace_settings(&mut tx, &ctx.user_uuid, settings).await?;
            max_seen = max_seen.max(settings.updated_at);
        }

        let server_timestamp = max_seen;
        events::touch_device_sync(&mut tx, &ctx.device_uuid, server_timestamp, now).await?;
        events::touch_user_activity(&mut tx, &ctx.user_uuid, now).await?;
        tx.commit().await?;

        tracing::info!(
            user_uuid = %ctx.user_uuid,
            device_uuid = %ctx.device_uuid,
            events = req.changes.pomodoro_events.created.len(),
            "force overwrite replaced server state"
        );

        Ok(IncrementalSyncData {
            server_changes: ServerChanges::default(),
            conflicts,
            server_timestamp,
        })
    }

    /// Complete live state for a full sync. Tombstones are excluded from the
    /// payload but still covered by the checkpoint, so the next incremental
    /// does not replay deletion notices for rows the client never saw.
    pub async fn full_state(&self, ctx: &SessionContext) -> Result<FullSyncData, MergeError> {
        let mut tx = self.pool.begin().await?;
        let now = transaction_clock(&mut tx, &ctx.user_uuid).await?;

        let pomodoro_events = events::all_live_events(&mut tx, &ctx.user_uuid).await?;
        let system_events = events::all_system_events(&mut tx, &ctx.user_uuid).await?;
        let timer_settings = events::load_settings(&mut tx, &ctx.user_uuid).await?;

        let mut max_seen = now;
        for event in &pomodoro_events {
            max_seen = max_seen.max(event_stamp(event));
        }
        for event in &system_events {
            max_seen = max_seen.max(event.created_at);
        }
        if let Some(settings) = &timer_settings {
            max_seen = max_seen.max(settings.updated_at);
        }
        if let Some(stamp) = events::max_tombstone_stamp(&mut tx, &ctx.user_uuid).await? {
            max_seen = max_seen.max(stamp);
        }
        let server_timestamp = max_seen;

        events::touch_device_sync(&mut tx, &ctx.device_uuid, server_timestamp, now).await?;
        events::touch_user_activity(&mut tx, &ctx.user_uuid, now).await?;
        tx.commit().await?;

        Ok(FullSyncData {
            pomodoro_events,
            system_events,
            timer_settings,
            server_timestamp,
        })
    }
}

/// Largest stamp a row carries; deletion stamps count too.
fn event_stamp(event: &TimedEvent) -> i64 {
    event.updated_at.max(event.deleted_at.unwrap_or(event.updated_at))
}

/// Wall clock with a per-user floor. Stamps authored in this transaction must
/// sit strictly above every checkpoint already handed out for the user, even
/// when two requests land within one millisecond; otherwise a delete could
/// stamp itself exactly at a sibling device's checkpoint and the strict `>`
/// delta query would never deliver the notice.
async fn transaction_clock(
    conn: &mut sqlx::SqliteConnection,
    user_uuid: &str,
) -> Result<i64, sqlx::Error> {
    let issued = events::max_issued_checkpoint(conn, user_uuid).await?;
    Ok(now_ms().max(issued + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ConflictReason, DeviceBindRequest, DeviceInitRequest, EventChangeSet, EventPayload,
        SyncChanges, SystemEventPayload,
    };
    use crate::server::identity::IdentityManager;
    use tempfile::{tempdir, TempDir};

    struct TestContext {
        merge: MergeCoordinator,
        identity: IdentityManager,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = tempdir().unwrap();
        let pool = crate::server::db::init_server_db(Some(temp_dir.path().join("server.db")))
            .await
            .unwrap();
        TestContext {
            merge: MergeCoordinator::new(pool.clone()),
            identity: IdentityManager::new(pool),
            _temp_dir: temp_dir,
        }
    }

    impl TestContext {
        /// New device with its own fresh user.
        async fn device(&self) -> SessionContext {
            let grant = self
                .identity
                .initialize_device(&DeviceInitRequest {
                    device_uuid: Uuid::new_v4().to_string(),
                    device_name: "Test".to_string(),
                    platform: "macOS".to_string(),
                })
                .await
                .unwrap();
            SessionContext {
                user_uuid: grant.user_uuid,
                device_uuid: grant.device_uuid,
            }
        }

        /// Second device bound to the same user.
        async fn sibling(&self, ctx: &SessionContext) -> SessionContext {
            let grant = self
                .identity
                .bind_device(&DeviceBindRequest {
                    device_uuid: Uuid::new_v4().to_string(),
                    user_uuid: ctx.user_uuid.clone(),
                    device_name: "Sibling".to_string(),
                    platform: "iOS".to_string(),
                })
                .await
                .unwrap();
            SessionContext {
                user_uuid: grant.user_uuid,
                device_uuid: grant.device_uuid,
            }
        }
    }

    fn payload(uuid: &str, title: &str, updated_at: i64) -> EventPayload {
        EventPayload {
            uuid: uuid.to_string(),
            title: title.to_string(),
            start_time: updated_at - 1500,
            end_time: updated_at,
            event_type: "pomodoro".to_string(),
            is_completed: true,
            created_at: updated_at,
            updated_at,
            deleted_at: None,
        }
    }

    fn push_created(checkpoint: i64, created: Vec<EventPayload>) -> IncrementalSyncRequest {
        IncrementalSyncRequest {
            last_sync_timestamp: checkpoint,
            force_overwrite: false,
            changes: SyncChanges {
                pomodoro_events: EventChangeSet {
                    created,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn push_updated(checkpoint: i64, updated: Vec<EventPayload>) -> IncrementalSyncRequest {
        IncrementalSyncRequest {
            last_sync_timestamp: checkpoint,
            force_overwrite: false,
            changes: SyncChanges {
                pomodoro_events: EventChangeSet {
                    updated,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn push_deleted(checkpoint: i64, deleted: Vec<String>) -> IncrementalSyncRequest {
        IncrementalSyncRequest {
            last_sync_timestamp: checkpoint,
            force_overwrite: false,
            changes: SyncChanges {
                pomodoro_events: EventChangeSet {
                    deleted,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn empty_push(checkpoint: i64) -> IncrementalSyncRequest {
        IncrementalSyncRequest {
            last_sync_timestamp: checkpoint,
            force_overwrite: false,
            changes: SyncChanges::default(),
        }
    }

    #[tokio::test]
    async fn test_create_round_trips_to_second_device() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let uuid = Uuid::new_v4().to_string();
        let pushed = payload(&uuid, "Morning focus", 1_700_001_000_000);
        let result = ctx
            .merge
            .incremental(&a, &push_created(0, vec![pushed.clone()]))
            .await
            .unwrap();

        // Own write is not echoed back.
        assert!(result.server_changes.is_empty());
        assert!(result.conflicts.is_empty());
        assert!(result.server_timestamp >= 1_700_001_000_000);

        let result = ctx.merge.incremental(&b, &empty_push(0)).await.unwrap();
        assert_eq!(result.server_changes.pomodoro_events.len(), 1);
        let event = &result.server_changes.pomodoro_events[0];
        assert_eq!(event.uuid, uuid);
        assert_eq!(event.title, "Morning focus");
        assert_eq!(event.updated_at, 1_700_001_000_000);
        assert!(event.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_first_row() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let uuid = Uuid::new_v4().to_string();
        let first = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "Original", 1000)]))
            .await
            .unwrap();
        assert!(first.conflicts.is_empty());

        // Retransmit (same uuid, different title to make the winner visible).
        let second = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "Replay", 2000)]))
            .await
            .unwrap();
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].reason, ConflictReason::DuplicateUuid);
        assert_eq!(second.conflicts[0].uuid, uuid);
        // The stored row rides back so the sender can reconcile.
        assert_eq!(second.server_changes.pomodoro_events.len(), 1);
        assert_eq!(second.server_changes.pomodoro_events[0].title, "Original");

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events.len(), 1);
        assert_eq!(full.pomodoro_events[0].title, "Original");
    }

    #[tokio::test]
    async fn test_checkpoint_is_exact_lower_bound() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let result = ctx
            .merge
            .incremental(
                &a,
                &push_created(0, vec![payload(&Uuid::new_v4().to_string(), "e", 1000)]),
            )
            .await
            .unwrap();
        let checkpoint = result.server_timestamp;

        // No-op sync at the fresh checkpoint: nothing comes back.
        let result = ctx.merge.incremental(&a, &empty_push(checkpoint)).await.unwrap();
        assert!(result.server_changes.is_empty());
        assert!(result.conflicts.is_empty());
        assert!(result.server_timestamp >= checkpoint);
    }

    #[tokio::test]
    async fn test_stale_update_older_incoming_loses() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let uuid = Uuid::new_v4().to_string();
        ctx.merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "Newer", 1000)]))
            .await
            .unwrap();

        // B never synced (checkpoint 0) and pushes an older edit.
        let mut stale = payload(&uuid, "Older edit", 500);
        stale.created_at = 500;
        let result = ctx
            .merge
            .incremental(&b, &push_updated(0, vec![stale]))
            .await
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.reason, ConflictReason::StaleUpdate);
        assert_eq!(conflict.server_updated_at, Some(1000));
        assert_eq!(conflict.client_updated_at, Some(500));

        // The losing device receives the winning row in the same response.
        assert_eq!(result.server_changes.pomodoro_events.len(), 1);
        assert_eq!(result.server_changes.pomodoro_events[0].title, "Newer");

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events[0].title, "Newer");
        assert_eq!(full.pomodoro_events[0].updated_at, 1000);
    }

    #[tokio::test]
    async fn test_stale_update_newer_incoming_wins() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let uuid = Uuid::new_v4().to_string();
        ctx.merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "First", 1000)]))
            .await
            .unwrap();

        let result = ctx
            .merge
            .incremental(&b, &push_updated(0, vec![payload(&uuid, "Second", 2000)]))
            .await
            .unwrap();

        // Still reported, but the greater updated_at was applied.
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].reason, ConflictReason::StaleUpdate);
        // Applied writes are not echoed.
        assert!(result.server_changes.pomodoro_events.is_empty());

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events[0].title, "Second");
        assert_eq!(full.pomodoro_events[0].updated_at, 2000);
    }

    #[tokio::test]
    async fn test_update_below_checkpoint_applies_without_conflict() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let uuid = Uuid::new_v4().to_string();
        let first = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "v1", 1000)]))
            .await
            .unwrap();

        let edit = payload(&uuid, "v2", first.server_timestamp + 1);
        let result = ctx
            .merge
            .incremental(&a, &push_updated(first.server_timestamp, vec![edit]))
            .await
            .unwrap();

        assert!(result.conflicts.is_empty());
        assert!(result.server_changes.pomodoro_events.is_empty());

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events[0].title, "v2");
    }

    #[tokio::test]
    async fn test_update_unknown_uuid_is_noop() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let result = ctx
            .merge
            .incremental(
                &a,
                &push_updated(0, vec![payload(&Uuid::new_v4().to_string(), "ghost", 100)]),
            )
            .await
            .unwrap();

        assert!(result.conflicts.is_empty());
        assert!(result.server_changes.is_empty());
    }

    #[tokio::test]
    async fn test_delete_produces_tombstone_notice_for_others() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let uuid = Uuid::new_v4().to_string();
        let created = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "Doomed", 1000)]))
            .await
            .unwrap();

        // B catches up first.
        let b_state = ctx.merge.incremental(&b, &empty_push(0)).await.unwrap();
        assert_eq!(b_state.server_changes.pomodoro_events.len(), 1);
        let b_checkpoint = b_state.server_timestamp;

        // A deletes; its own response carries no echo of the tombstone.
        let deleted = ctx
            .merge
            .incremental(&a, &push_deleted(created.server_timestamp, vec![uuid.clone()]))
            .await
            .unwrap();
        assert!(deleted.server_changes.is_empty());
        assert!(deleted.conflicts.is_empty());

        // B's next incremental sees exactly one deletion notice.
        let b_next = ctx.merge.incremental(&b, &empty_push(b_checkpoint)).await.unwrap();
        assert_eq!(b_next.server_changes.pomodoro_events.len(), 1);
        let notice = &b_next.server_changes.pomodoro_events[0];
        assert_eq!(notice.uuid, uuid);
        assert!(notice.deleted_at.is_some());

        // And once applied, never again.
        let b_after = ctx
            .merge
            .incremental(&b, &empty_push(b_next.server_timestamp))
            .await
            .unwrap();
        assert!(b_after.server_changes.is_empty());

        // Tombstoned rows are absent from full sync.
        let full = ctx.merge.full_state(&a).await.unwrap();
        assert!(full.pomodoro_events.is_empty());
    }

    #[tokio::test]
    async fn test_delete_retransmit_and_unknown_are_noops() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let uuid = Uuid::new_v4().to_string();
        let created = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "x", 1000)]))
            .await
            .unwrap();

        let first = ctx
            .merge
            .incremental(&a, &push_deleted(created.server_timestamp, vec![uuid.clone()]))
            .await
            .unwrap();

        // Crash-before-checkpoint-store replay of the same delete.
        let replay = ctx
            .merge
            .incremental(
                &a,
                &push_deleted(
                    created.server_timestamp,
                    vec![uuid.clone(), Uuid::new_v4().to_string()],
                ),
            )
            .await
            .unwrap();
        assert!(replay.conflicts.is_empty());
        // The existing tombstone is older than the replay's checkpoint base,
        // so it comes back only as long as the checkpoint predates it.
        assert!(replay.server_timestamp >= first.server_timestamp);
    }

    #[tokio::test]
    async fn test_invalid_entities_degrade_to_entries() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let good = payload(&Uuid::new_v4().to_string(), "good", 1000);
        let bad_uuid = payload("not-a-uuid", "bad", 1000);
        let mut inverted = payload(&Uuid::new_v4().to_string(), "inverted", 1000);
        inverted.start_time = 2000;
        inverted.end_time = 1000;
        let mut unknown_kind = payload(&Uuid::new_v4().to_string(), "weird", 1000);
        unknown_kind.event_type = "standup".to_string();

        let result = ctx
            .merge
            .incremental(
                &a,
                &push_created(0, vec![bad_uuid, inverted, unknown_kind, good.clone()]),
            )
            .await
            .unwrap();

        assert_eq!(result.conflicts.len(), 3);
        assert!(result
            .conflicts
            .iter()
            .all(|c| c.reason == ConflictReason::InvalidPayload));

        // The valid entity still landed.
        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events.len(), 1);
        assert_eq!(full.pomodoro_events[0].title, "good");
    }

    #[tokio::test]
    async fn test_force_overwrite_replaces_state() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let seed: Vec<EventPayload> = (0..5)
            .map(|i| payload(&Uuid::new_v4().to_string(), &format!("old-{}", i), 1000 + i))
            .collect();
        ctx.merge.incremental(&a, &push_created(0, seed)).await.unwrap();

        let replacement: Vec<EventPayload> = (0..2)
            .map(|i| payload(&Uuid::new_v4().to_string(), &format!("new-{}", i), 5000 + i))
            .collect();
        let mut req = push_created(0, replacement);
        req.force_overwrite = true;
        let result = ctx.merge.incremental(&a, &req).await.unwrap();

        assert!(result.server_changes.is_empty());
        assert!(result.conflicts.is_empty());

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events.len(), 2);
        assert!(full.pomodoro_events.iter().all(|e| e.title.starts_with("new-")));
    }

    #[tokio::test]
    async fn test_force_overwrite_requires_zero_checkpoint() {
        let ctx = setup().await;
        let a = ctx.device().await;

        let mut req = push_created(100, vec![]);
        req.force_overwrite = true;
        let err = ctx.merge.incremental(&a, &req).await.unwrap_err();
        assert!(matches!(err, MergeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_checkpoint_zero_without_flag_merges() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        ctx.merge
            .incremental(&a, &push_created(0, vec![payload(&Uuid::new_v4().to_string(), "a", 1000)]))
            .await
            .unwrap();

        // First sync of a second device pushes with checkpoint 0; nothing may
        // be wiped.
        let result = ctx
            .merge
            .incremental(
                &b,
                &push_created(0, vec![payload(&Uuid::new_v4().to_string(), "b", 2000)]),
            )
            .await
            .unwrap();
        assert_eq!(result.server_changes.pomodoro_events.len(), 1);
        assert_eq!(result.server_changes.pomodoro_events[0].title, "a");

        let full = ctx.merge.full_state(&a).await.unwrap();
        assert_eq!(full.pomodoro_events.len(), 2);
    }

    #[tokio::test]
    async fn test_settings_replace_if_newer_only() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let mut settings = crate::models::TimerSettings::new();
        settings.set("pomodoro_time", serde_json::json!(1500));
        settings.updated_at = 1000;

        let mut req = empty_push(0);
        req.changes.timer_settings = Some(settings.clone());
        let first = ctx.merge.incremental(&a, &req).await.unwrap();
        // Just-pushed settings are not echoed back.
        assert!(first.server_changes.timer_settings.is_none());
        assert!(first.server_timestamp >= 1000);

        // An older push after the first sync does not replace.
        let mut older = crate::models::TimerSettings::new();
        older.set("pomodoro_time", serde_json::json!(300));
        older.updated_at = 500;
        let mut req = empty_push(first.server_timestamp);
        req.changes.timer_settings = Some(older);
        ctx.merge.incremental(&a, &req).await.unwrap();

        // B pulls from scratch and sees the surviving newer set.
        let pulled = ctx.merge.incremental(&b, &empty_push(0)).await.unwrap();
        let got = pulled.server_changes.timer_settings.unwrap();
        assert_eq!(got.get("pomodoro_time"), Some(&serde_json::json!(1500)));
        assert_eq!(got.updated_at, 1000);
    }

    #[tokio::test]
    async fn test_system_events_flow_and_dedup() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let sys = SystemEventPayload {
            uuid: Uuid::new_v4().to_string(),
            event_type: "app_activated".to_string(),
            timestamp: 700,
            data: [("app".to_string(), "Mail".to_string())].into_iter().collect(),
            created_at: Some(800),
        };
        let mut req = empty_push(0);
        req.changes.system_events.created = vec![sys.clone()];
        let first = ctx.merge.incremental(&a, &req).await.unwrap();
        assert!(first.server_changes.system_events.is_empty());
        assert!(first.conflicts.is_empty());

        // Replay is ignored without a conflict entry.
        let mut req = empty_push(0);
        req.changes.system_events.created = vec![sys.clone()];
        let replay = ctx.merge.incremental(&a, &req).await.unwrap();
        assert!(replay.conflicts.is_empty());

        let pulled = ctx.merge.incremental(&b, &empty_push(0)).await.unwrap();
        assert_eq!(pulled.server_changes.system_events.len(), 1);
        assert_eq!(
            pulled.server_changes.system_events[0].data.get("app").map(String::as_str),
            Some("Mail")
        );

        // Unknown system event type degrades per-entity.
        let mut bad = sys.clone();
        bad.uuid = Uuid::new_v4().to_string();
        bad.event_type = "cosmic_ray".to_string();
        let mut req = empty_push(0);
        req.changes.system_events.created = vec![bad];
        let result = ctx.merge.incremental(&a, &req).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].entity, ConflictEntity::SystemEvent);
    }

    #[tokio::test]
    async fn test_checkpoint_covers_future_client_stamps() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        // A device with a fast clock pushes a stamp well ahead of server time.
        let future = now_ms() + 600_000;
        let result = ctx
            .merge
            .incremental(
                &a,
                &push_created(0, vec![payload(&Uuid::new_v4().to_string(), "fast clock", future)]),
            )
            .await
            .unwrap();
        assert!(result.server_timestamp >= future);

        // The puller's checkpoint covers the returned row too.
        let pulled = ctx.merge.incremental(&b, &empty_push(0)).await.unwrap();
        assert!(pulled.server_timestamp >= future);
        let again = ctx
            .merge
            .incremental(&b, &empty_push(pulled.server_timestamp))
            .await
            .unwrap();
        assert!(again.server_changes.is_empty());
    }

    #[tokio::test]
    async fn test_full_state_checkpoint_covers_tombstones() {
        let ctx = setup().await;
        let a = ctx.device().await;
        let b = ctx.sibling(&a).await;

        let uuid = Uuid::new_v4().to_string();
        let created = ctx
            .merge
            .incremental(&a, &push_created(0, vec![payload(&uuid, "gone", 1000)]))
            .await
            .unwrap();
        ctx.merge
            .incremental(&a, &push_deleted(created.server_timestamp, vec![uuid]))
            .await
            .unwrap();

        let full = ctx.merge.full_state(&b).await.unwrap();
        assert!(full.pomodoro_events.is_empty());

        // The tombstone is already covered: no stray deletion notice later.
        let next = ctx
            .merge
            .incremental(&b, &empty_push(full.server_timestamp))
            .await
            .unwrap();
        assert!(next.server_changes.is_empty());
    }
}
