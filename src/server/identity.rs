//! Identity and session management: device-first account bootstrap, bearer
//! session tokens, and device bookkeeping.
//!
//! A device uuid is the entry point. Initializing an unknown device creates a
//! fresh user implicitly; initializing a known one re-issues a session for its
//! existing user. Tokens are 32 random bytes (base64url) handed to the client
//! once and stored only as SHA-256 hashes. Sessions expire after a TTL and are
//! marked inactive lazily, on the first use after expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::error::AuthError;
use crate::models::{now_ms, Device, User};
use crate::protocol::{
    DeviceBindData, DeviceBindRequest, DeviceInitData, DeviceInitRequest, RefreshData,
};

const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Who a validated token belongs to. Inserted into request extensions by the
/// auth middleware and consumed by every protected handler.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_uuid: String,
    pub device_uuid: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: i64,
    user_uuid: String,
    device_uuid: String,
    expires_at: i64,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    uuid: String,
    user_uuid: String,
    name: String,
    platform: String,
    last_sync_timestamp: i64,
    created_at: i64,
    last_seen_at: i64,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            uuid: row.uuid,
            user_uuid: row.user_uuid,
            name: row.name,
            platform: row.platform,
            last_sync_timestamp: row.last_sync_timestamp,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    uuid: String,
    name: String,
    created_at: i64,
    last_active_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            uuid: row.uuid,
            name: row.name,
            created_at: row.created_at,
            last_active_at: row.last_active_at,
        }
    }
}

#[derive(Clone)]
pub struct IdentityManager {
    pool: SqlitePool,
    session_ttl_ms: i64,
}

impl IdentityManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            session_ttl_ms: DEFAULT_SESSION_TTL_HOURS * 3_600_000,
        }
    }

    pub fn with_session_ttl_hours(mut self, hours: i64) -> Self {
        self.session_ttl_ms = hours * 3_600_000;
        self
    }

    /// Millisecond-granularity TTL, used by expiry tests.
    pub fn with_session_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.session_ttl_ms = ttl_ms;
        self
    }

    /// Device-first bootstrap. Unknown device uuid: create a user and bind the
    /// device to it (`is_new_user = true`). Known device: re-issue a session
    /// for its existing user. Either way the caller walks away authenticated.
    pub async fn initialize_device(
        &self,
        req: &DeviceInitRequest,
    ) -> Result<DeviceInitData, AuthError> {
        let device_uuid = normalize_uuid(&req.device_uuid)
            .ok_or_else(|| AuthError::InvalidDeviceUuid(req.device_uuid.clone()))?;
        let (name, platform) = validated_device_fields(&req.device_name, &req.platform)?;

        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let existing: Option<DeviceRow> =
            sqlx::query_as("SELECT * FROM devices WHERE uuid = ?")
                .bind(&device_uuid)
                .fetch_optional(&mut *tx)
                .await?;

        let (user_uuid, is_new_user) = match existing {
            Some(device) => {
                sqlx::query(
                    "UPDATE devices SET name = ?, platform = ?, last_seen_at = ? WHERE uuid = ?",
                )
                .bind(&name)
                .bind(&platform)
                .bind(now)
                .bind(&device_uuid)
                .execute(&mut *tx)
                .await?;
                (device.user_uuid, false)
            }
            None => {
                let user_uuid = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO users (uuid, name, created_at, last_active_at) VALUES (?, '', ?, ?)",
                )
                .bind(&user_uuid)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                insert_device(&mut tx, &device_uuid, &user_uuid, &name, &platform, now).await?;
                tracing::info!(user_uuid = %user_uuid, device_uuid = %device_uuid, "created user for new device");
                (user_uuid, true)
            }
        };

        let (token, expires_at) = self.insert_session(&mut tx, &user_uuid, &device_uuid).await?;
        touch_user(&mut tx, &user_uuid, now).await?;
        tx.commit().await?;

        Ok(DeviceInitData {
            user_uuid,
            device_uuid,
            session_token: token,
            expires_at,
            is_new_user,
        })
    }

    /// Attach a device to an existing user. The user must exist, and a device
    /// already bound to a different user is refused rather than silently
    /// re-bound. Re-binding to the same user is idempotent and preserves the
    /// device's sync checkpoint.
    pub async fn bind_device(&self, req: &DeviceBindRequest) -> Result<DeviceBindData, AuthError> {
        let device_uuid = normalize_uuid(&req.device_uuid)
            .ok_or_else(|| AuthError::InvalidDeviceUuid(req.device_uuid.clone()))?;
        let user_uuid = normalize_uuid(&req.user_uuid)
            .ok_or_else(|| AuthError::InvalidUserUuid(req.user_uuid.clone()))?;
        let (name, platform) = validated_device_fields(&req.device_name, &req.platform)?;

        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let user: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE uuid = ?")
            .bind(&user_uuid)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(AuthError::InvalidUserUuid(user_uuid));
        }

        let existing: Option<DeviceRow> = sqlx::query_as("SELECT * FROM devices WHERE uuid = ?")
            .bind(&device_uuid)
            .fetch_optional(&mut *tx)
            .await?;

        let last_sync_timestamp = match existing {
            Some(device) if device.user_uuid != user_uuid => {
                return Err(AuthError::DeviceOwnershipConflict {
                    device_uuid,
                    owner_uuid: device.user_uuid,
                });
            }
            Some(device) => {
                sqlx::query(
                    "UPDATE devices SET name = ?, platform = ?, last_seen_at = ? WHERE uuid = ?",
                )
                .bind(&name)
                .bind(&platform)
                .bind(now)
                .bind(&device_uuid)
                .execute(&mut *tx)
                .await?;
                device.last_sync_timestamp
            }
            None => {
                insert_device(&mut tx, &device_uuid, &user_uuid, &name, &platform, now).await?;
                tracing::info!(user_uuid = %user_uuid, device_uuid = %device_uuid, "bound device to user");
                0
            }
        };

        let (token, expires_at) = self.insert_session(&mut tx, &user_uuid, &device_uuid).await?;
        touch_user(&mut tx, &user_uuid, now).await?;
        tx.commit().await?;

        Ok(DeviceBindData {
            user_uuid,
            device_uuid,
            session_token: token,
            expires_at,
            last_sync_timestamp,
        })
    }

    /// Resolve a bearer token to its session context. Expired sessions are
    /// flipped inactive on first sight and keep answering `TokenExpired`;
    /// revoked ones answer `Unauthenticated`.
    pub async fn validate_token(&self, token: &str) -> Result<SessionContext, AuthError> {
        let session = self.active_session(token).await?;
        let now = now_ms();
        sqlx::query("UPDATE sessions SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(session.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE users SET last_active_at = ? WHERE uuid = ?")
            .bind(now)
            .bind(&session.user_uuid)
            .execute(&self.pool)
            .await?;

        Ok(SessionContext {
            user_uuid: session.user_uuid,
            device_uuid: session.device_uuid,
        })
    }

    /// Rotate a session: the presented token is revoked and a fresh one is
    /// issued for the same user/device pair.
    pub async fn refresh_token(&self, token: &str) -> Result<RefreshData, AuthError> {
        let session = self.active_session(token).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ?")
            .bind(session.id)
            .execute(&mut *tx)
            .await?;
        let (token, expires_at) = self
            .insert_session(&mut tx, &session.user_uuid, &session.device_uuid)
            .await?;
        tx.commit().await?;

        tracing::debug!(user_uuid = %session.user_uuid, "refreshed session token");
        Ok(RefreshData {
            session_token: token,
            expires_at,
        })
    }

    /// Revoke the session behind `token`. Idempotent: unknown or already
    /// revoked tokens are a success.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Revoke every session of a user. Returns how many were still active.
    pub async fn revoke_all_sessions(&self, user_uuid: &str) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0 WHERE user_uuid = ? AND is_active = 1",
        )
        .bind(user_uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_devices(&self, user_uuid: &str) -> Result<Vec<Device>, AuthError> {
        let rows: Vec<DeviceRow> =
            sqlx::query_as("SELECT * FROM devices WHERE user_uuid = ? ORDER BY created_at")
                .bind(user_uuid)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    /// Unbind a device from its user and revoke its sessions. The device must
    /// belong to the calling user.
    pub async fn remove_device(&self, user_uuid: &str, device_uuid: &str) -> Result<(), AuthError> {
        let device_uuid = normalize_uuid(device_uuid)
            .ok_or_else(|| AuthError::InvalidDeviceUuid(device_uuid.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let device: Option<DeviceRow> = sqlx::query_as("SELECT * FROM devices WHERE uuid = ?")
            .bind(&device_uuid)
            .fetch_optional(&mut *tx)
            .await?;

        match device {
            Some(device) if device.user_uuid == user_uuid => {
                sqlx::query("UPDATE sessions SET is_active = 0 WHERE device_uuid = ?")
                    .bind(&device_uuid)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM devices WHERE uuid = ?")
                    .bind(&device_uuid)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                tracing::info!(device_uuid = %device_uuid, "removed device");
                Ok(())
            }
            _ => Err(AuthError::Validation(format!(
                "Unknown device '{}'",
                device_uuid
            ))),
        }
    }

    /// Maintenance sweep: delete sessions that are expired or revoked.
    pub async fn prune_sessions(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ? OR is_active = 0")
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Fetch the session for a token and reject expired or revoked ones.
    /// Marks a newly-expired session inactive as a side effect.
    async fn active_session(&self, token: &str) -> Result<SessionRow, AuthError> {
        let session: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_uuid, device_uuid, expires_at, is_active FROM sessions WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        let session = session.ok_or(AuthError::Unauthenticated)?;

        if session.expires_at <= now_ms() {
            if session.is_active {
                sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ?")
                    .bind(session.id)
                    .execute(&self.pool)
                    .await?;
                tracing::debug!(user_uuid = %session.user_uuid, "marked expired session inactive");
            }
            return Err(AuthError::TokenExpired);
        }
        if !session.is_active {
            return Err(AuthError::Unauthenticated);
        }
        Ok(session)
    }

    async fn insert_session(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_uuid: &str,
        device_uuid: &str,
    ) -> Result<(String, i64), AuthError> {
        let token = generate_token();
        let now = now_ms();
        let expires_at = now + self.session_ttl_ms;

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_uuid, device_uuid, created_at, expires_at, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(hash_token(&token))
        .bind(user_uuid)
        .bind(device_uuid)
        .bind(now)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;

        Ok((token, expires_at))
    }
}

async fn insert_device(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    device_uuid: &str,
    user_uuid: &str,
    name: &str,
    platform: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO devices (uuid, user_uuid, name, platform, last_sync_timestamp, created_at, last_seen_at)
         VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(device_uuid)
    .bind(user_uuid)
    .bind(name)
    .bind(platform)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn touch_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_uuid: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_active_at = ? WHERE uuid = ?")
        .bind(now)
        .bind(user_uuid)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Parse and normalize a uuid to lowercase hyphenated form.
fn normalize_uuid(raw: &str) -> Option<String> {
    Uuid::parse_str(raw).ok().map(|u| u.to_string())
}

fn validated_device_fields(name: &str, platform: &str) -> Result<(String, String), AuthError> {
    let name = name.trim();
    let platform = platform.trim();
    if name.is_empty() {
        return Err(AuthError::Validation("device_name must not be empty".into()));
    }
    if platform.is_empty() {
        return Err(AuthError::Validation("platform must not be empty".into()));
    }
    Ok((name.to_string(), platform.to_string()))
}

/// 32 random bytes encoded as base64url (no padding).
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Tokens are stored hashed so a leaked database does not leak live sessions.
fn hash_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    struct TestContext {
        manager: IdentityManager,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = tempdir().unwrap();
        let pool = crate::server::db::init_server_db(Some(temp_dir.path().join("server.db")))
            .await
            .unwrap();
        TestContext {
            manager: IdentityManager::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn init_request(device_uuid: &str) -> DeviceInitRequest {
        DeviceInitRequest {
            device_uuid: device_uuid.to_string(),
            device_name: "Test Laptop".to_string(),
            platform: "macOS".to_string(),
        }
    }

    #[tokio::test]
    async fn test_initialize_unknown_device_creates_user() {
        let ctx = setup().await;
        let device_uuid = Uuid::new_v4().to_string();

        let grant = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();

        assert!(grant.is_new_user);
        assert_eq!(grant.device_uuid, device_uuid);
        assert_eq!(grant.session_token.len(), 43);
        assert!(grant.expires_at > now_ms());
    }

    #[tokio::test]
    async fn test_initialize_known_device_reuses_user() {
        let ctx = setup().await;
        let device_uuid = Uuid::new_v4().to_string();

        let first = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();
        let second = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();

        assert!(!second.is_new_user);
        assert_eq!(second.user_uuid, first.user_uuid);
        assert_ne!(second.session_token, first.session_token);
    }

    #[tokio::test]
    async fn test_initialize_rejects_malformed_uuid() {
        let ctx = setup().await;
        let err = ctx
            .manager
            .initialize_device(&init_request("not-a-uuid"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidDeviceUuid(_)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_name() {
        let ctx = setup().await;
        let mut req = init_request(&Uuid::new_v4().to_string());
        req.device_name = "  ".to_string();
        let err = ctx.manager.initialize_device(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_initialize_normalizes_uuid_case() {
        let ctx = setup().await;
        let device_uuid = Uuid::new_v4().to_string();

        let first = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();
        let second = ctx
            .manager
            .initialize_device(&init_request(&device_uuid.to_uppercase()))
            .await
            .unwrap();

        // Same device either way, so no second user appears.
        assert_eq!(second.user_uuid, first.user_uuid);
        assert_eq!(second.device_uuid, device_uuid);
    }

    #[tokio::test]
    async fn test_bind_unknown_user_rejected() {
        let ctx = setup().await;
        let req = DeviceBindRequest {
            device_uuid: Uuid::new_v4().to_string(),
            user_uuid: Uuid::new_v4().to_string(),
            device_name: "Phone".to_string(),
            platform: "iOS".to_string(),
        };
        let err = ctx.manager.bind_device(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidUserUuid(_)));
    }

    #[tokio::test]
    async fn test_bind_second_device_to_existing_user() {
        let ctx = setup().await;
        let first = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        let req = DeviceBindRequest {
            device_uuid: Uuid::new_v4().to_string(),
            user_uuid: first.user_uuid.clone(),
            device_name: "Phone".to_string(),
            platform: "iOS".to_string(),
        };
        let bound = ctx.manager.bind_device(&req).await.unwrap();

        assert_eq!(bound.user_uuid, first.user_uuid);
        assert_eq!(bound.last_sync_timestamp, 0);

        let devices = ctx.manager.list_devices(&first.user_uuid).await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_bind_foreign_device_is_ownership_conflict() {
        let ctx = setup().await;
        let owner = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();
        let other = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        // Try to steal the owner's device into the other user's account.
        let req = DeviceBindRequest {
            device_uuid: owner.device_uuid.clone(),
            user_uuid: other.user_uuid.clone(),
            device_name: "Stolen".to_string(),
            platform: "macOS".to_string(),
        };
        let err = ctx.manager.bind_device(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::DeviceOwnershipConflict { .. }));
    }

    #[tokio::test]
    async fn test_rebind_same_user_is_idempotent() {
        let ctx = setup().await;
        let grant = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        let req = DeviceBindRequest {
            device_uuid: grant.device_uuid.clone(),
            user_uuid: grant.user_uuid.clone(),
            device_name: "Renamed Laptop".to_string(),
            platform: "macOS".to_string(),
        };
        let bound = ctx.manager.bind_device(&req).await.unwrap();
        assert_eq!(bound.user_uuid, grant.user_uuid);

        let devices = ctx.manager.list_devices(&grant.user_uuid).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Renamed Laptop");
    }

    #[tokio::test]
    async fn test_validate_token_resolves_session() {
        let ctx = setup().await;
        let grant = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        let session = ctx.manager.validate_token(&grant.session_token).await.unwrap();
        assert_eq!(session.user_uuid, grant.user_uuid);
        assert_eq!(session.device_uuid, grant.device_uuid);
    }

    #[tokio::test]
    async fn test_validate_unknown_token() {
        let ctx = setup().await;
        let err = ctx.manager.validate_token("bogus").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_expired_token_marked_inactive() {
        let ctx = setup().await;
        let manager = ctx.manager.clone().with_session_ttl_ms(0);
        let grant = manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let err = manager.validate_token(&grant.session_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));

        // Still reported as expired on later attempts, not as unknown.
        let err = manager.validate_token(&grant.session_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let ctx = setup().await;
        let grant = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        let refreshed = ctx.manager.refresh_token(&grant.session_token).await.unwrap();
        assert_ne!(refreshed.session_token, grant.session_token);

        // Old token is dead, new one works.
        let err = ctx
            .manager
            .validate_token(&grant.session_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
        ctx.manager
            .validate_token(&refreshed.session_token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let ctx = setup().await;
        let grant = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        ctx.manager.logout(&grant.session_token).await.unwrap();
        ctx.manager.logout(&grant.session_token).await.unwrap();
        ctx.manager.logout("never-issued").await.unwrap();

        let err = ctx
            .manager
            .validate_token(&grant.session_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_revoke_all_sessions() {
        let ctx = setup().await;
        let device_uuid = Uuid::new_v4().to_string();
        let first = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();
        let second = ctx
            .manager
            .initialize_device(&init_request(&device_uuid))
            .await
            .unwrap();

        let revoked = ctx
            .manager
            .revoke_all_sessions(&first.user_uuid)
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        for token in [&first.session_token, &second.session_token] {
            let err = ctx.manager.validate_token(token).await.unwrap_err();
            assert!(matches!(err, AuthError::Unauthenticated));
        }

        // Nothing left to revoke the second time.
        let revoked = ctx
            .manager
            .revoke_all_sessions(&first.user_uuid)
            .await
            .unwrap();
        assert_eq!(revoked, 0);
    }

    #[tokio::test]
    async fn test_remove_device_revokes_and_unlists() {
        let ctx = setup().await;
        let grant = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        ctx.manager
            .remove_device(&grant.user_uuid, &grant.device_uuid)
            .await
            .unwrap();

        assert!(ctx
            .manager
            .list_devices(&grant.user_uuid)
            .await
            .unwrap()
            .is_empty());
        let err = ctx
            .manager
            .validate_token(&grant.session_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));

        // Removing it again is unknown.
        let err = ctx
            .manager
            .remove_device(&grant.user_uuid, &grant.device_uuid)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_prune_sessions_drops_expired_and_revoked() {
        let ctx = setup().await;
        let short = ctx.manager.clone().with_session_ttl_ms(0);
        short
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();
        let live = ctx
            .manager
            .initialize_device(&init_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let pruned = ctx.manager.prune_sessions().await.unwrap();
        assert_eq!(pruned, 1);

        // The live session survives the sweep.
        ctx.manager.validate_token(&live.session_token).await.unwrap();
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_token_is_stable_and_distinct() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
