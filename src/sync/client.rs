//! Sync client: orchestrates full and incremental sync cycles against the
//! server and commits the results to the local store.
//!
//! One run at a time: a sync started while another is in flight fails fast
//! with [`SyncError::AlreadyRunning`]. Transport failures retry with doubling
//! backoff; an expired session is recovered once by re-registering the
//! persisted device uuid, which the server resolves to the same account.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::api::ApiClient;
use super::error::SyncError;
use super::hub::ChangeEvent;
use super::store::{LocalStore, StoredCredentials};
use crate::config::Config;
use crate::models::Device;
use crate::protocol::{
    DeviceBindData, DeviceBindRequest, DeviceInitData, DeviceInitRequest, IncrementalSyncRequest,
    RefreshData, SyncChanges, SyncConflict,
};

/// Transport attempts before a sync gives up.
const MAX_TRANSPORT_ATTEMPTS: usize = 3;
/// First backoff delay; doubles per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Result of one sync run.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Mutations sent to the server
    pub pushed: usize,
    /// Rows applied from the server
    pub pulled: usize,
    /// Per-entity conflicts the server reported
    pub conflicts: Vec<SyncConflict>,
    /// New checkpoint, already persisted locally
    pub server_timestamp: i64,
}

/// Client-side sync engine for one device.
#[derive(Debug, Clone)]
pub struct SyncClient {
    api: ApiClient,
    store: LocalStore,
    device_name: String,
    platform: String,
    running: Arc<AtomicBool>,
}

/// Resets the overlap flag when a run ends, error paths included.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncClient {
    pub fn new(
        api: ApiClient,
        store: LocalStore,
        device_name: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            device_name: device_name.into(),
            platform: platform.into(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a client from config; fails when no server is configured.
    pub fn from_config(config: &Config, store: LocalStore) -> Result<Self, SyncError> {
        let server_url = config.server_url.as_ref().ok_or(SyncError::NotConfigured)?;
        Ok(Self::new(
            ApiClient::new(server_url.clone()),
            store,
            config.device_name.clone(),
            config.platform.clone(),
        ))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// Registers this device, creating a new account when the server has
    /// never seen its uuid. Persists the issued session.
    pub async fn login(&self) -> Result<DeviceInitData, SyncError> {
        let device_uuid = match self.store.stored_device_uuid().await? {
            Some(uuid) => uuid,
            None => Uuid::new_v4().to_string(),
        };
        let data = self
            .api
            .device_init(&DeviceInitRequest {
                device_uuid,
                device_name: self.device_name.clone(),
                platform: self.platform.clone(),
            })
            .await?;
        self.save_session(&data.user_uuid, &data.device_uuid, &data.session_token, data.expires_at)
            .await?;
        Ok(data)
    }

    /// Binds this device to an existing account instead of creating one.
    pub async fn join(&self, user_uuid: &str) -> Result<DeviceBindData, SyncError> {
        let device_uuid = match self.store.stored_device_uuid().await? {
            Some(uuid) => uuid,
            None => Uuid::new_v4().to_string(),
        };
        let data = self
            .api
            .device_bind(&DeviceBindRequest {
                device_uuid,
                user_uuid: user_uuid.to_string(),
                device_name: self.device_name.clone(),
                platform: self.platform.clone(),
            })
            .await?;
        self.save_session(&data.user_uuid, &data.device_uuid, &data.session_token, data.expires_at)
            .await?;
        Ok(data)
    }

    /// Rotates the session token through the refresh endpoint.
    pub async fn refresh_session(&self) -> Result<RefreshData, SyncError> {
        let creds = self.require_credentials().await?;
        let data = self.api.refresh(&creds.session_token).await?;
        self.store
            .update_session(&data.session_token, data.expires_at)
            .await?;
        Ok(data)
    }

    /// Revokes the session server-side (best effort) and drops it locally.
    pub async fn logout(&self) -> Result<(), SyncError> {
        if let Some(creds) = self.store.credentials().await? {
            if let Err(e) = self.api.logout(&creds.session_token).await {
                tracing::warn!(error = %e, "server-side logout failed, dropping session locally");
            }
        }
        self.store.clear_session().await?;
        Ok(())
    }

    /// Revokes every session of the account, then drops the local one.
    pub async fn logout_everywhere(&self) -> Result<(), SyncError> {
        let creds = self.require_credentials().await?;
        self.api.revoke_sessions(&creds.session_token).await?;
        self.store.clear_session().await?;
        Ok(())
    }

    pub async fn devices(&self) -> Result<Vec<Device>, SyncError> {
        let creds = self.require_credentials().await?;
        self.api.list_devices(&creds.session_token).await
    }

    /// Unbinds a device from the account and revokes its sessions.
    pub async fn remove_device(&self, device_uuid: &str) -> Result<(), SyncError> {
        let creds = self.require_credentials().await?;
        self.api
            .remove_device(&creds.session_token, device_uuid)
            .await
    }

    // -----------------------------------------------------------------------
    // Sync runs
    // -----------------------------------------------------------------------

    /// Pushes pending local mutations and pulls everything other devices
    /// changed since the last checkpoint.
    pub async fn incremental_sync(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self.begin_run()?;
        let result = self.run_incremental().await;
        self.report(&result);
        result
    }

    /// Replaces the local replica with the server's complete state.
    pub async fn full_sync(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self.begin_run()?;
        let result = self.run_full().await;
        self.report(&result);
        result
    }

    /// Destructive: replaces the server's state with this device's. The server
    /// honors this only with the dedicated flag plus checkpoint 0, which this
    /// request sends regardless of the local checkpoint.
    pub async fn force_overwrite_remote(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self.begin_run()?;
        let result = self.run_force_overwrite().await;
        self.report(&result);
        result
    }

    async fn run_incremental(&self) -> Result<SyncOutcome, SyncError> {
        let changes = self.store.collect_pending().await?;
        let checkpoint = self.store.checkpoint().await?;
        let request = IncrementalSyncRequest {
            last_sync_timestamp: checkpoint,
            force_overwrite: false,
            changes,
        };

        let data = self
            .with_retry(|token| {
                let api = self.api.clone();
                let request = request.clone();
                async move { api.incremental_sync(&token, &request).await }
            })
            .await?;

        for conflict in &data.conflicts {
            tracing::warn!(uuid = %conflict.uuid, reason = %conflict.reason, "sync conflict");
        }

        let pulled = self
            .store
            .apply_server_changes(&data.server_changes, data.server_timestamp)
            .await?;
        self.store.clear_pending(&request.changes).await?;

        let pushed = count_mutations(&request.changes);
        tracing::debug!(
            pushed,
            pulled,
            conflicts = data.conflicts.len(),
            checkpoint = data.server_timestamp,
            "incremental sync finished"
        );
        Ok(SyncOutcome {
            pushed,
            pulled,
            conflicts: data.conflicts,
            server_timestamp: data.server_timestamp,
        })
    }

    async fn run_full(&self) -> Result<SyncOutcome, SyncError> {
        let data = self
            .with_retry(|token| {
                let api = self.api.clone();
                async move { api.full_sync(&token).await }
            })
            .await?;

        let pulled = self.store.replace_all(&data).await?;
        tracing::debug!(pulled, checkpoint = data.server_timestamp, "full sync finished");
        Ok(SyncOutcome {
            pushed: 0,
            pulled,
            conflicts: Vec::new(),
            server_timestamp: data.server_timestamp,
        })
    }

    async fn run_force_overwrite(&self) -> Result<SyncOutcome, SyncError> {
        let changes = self.store.collect_full_state().await?;
        let request = IncrementalSyncRequest {
            last_sync_timestamp: 0,
            force_overwrite: true,
            changes,
        };

        let data = self
            .with_retry(|token| {
                let api = self.api.clone();
                let request = request.clone();
                async move { api.incremental_sync(&token, &request).await }
            })
            .await?;

        // The server now holds exactly what was pushed.
        self.store.mark_all_synced(data.server_timestamp).await?;
        let pushed = count_mutations(&request.changes);
        tracing::info!(pushed, checkpoint = data.server_timestamp, "force overwrite finished");
        Ok(SyncOutcome {
            pushed,
            pulled: 0,
            conflicts: data.conflicts,
            server_timestamp: data.server_timestamp,
        })
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn begin_run(&self) -> Result<RunGuard, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        Ok(RunGuard(Arc::clone(&self.running)))
    }

    fn report(&self, result: &Result<SyncOutcome, SyncError>) {
        match result {
            Ok(outcome) => self.store.hub().publish(ChangeEvent::SyncCompleted {
                pushed: outcome.pushed,
                pulled: outcome.pulled,
            }),
            Err(e) => self.store.hub().publish(ChangeEvent::SyncFailed {
                message: e.to_string(),
            }),
        }
    }

    /// Runs one server call with bounded transport retries and a single
    /// expired-session recovery.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut token = self.require_credentials().await?.session_token;
        let mut recovered = false;
        let mut transport_attempts = 0;
        let mut delay = RETRY_DELAY;

        loop {
            match call(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(SyncError::TokenExpired) if !recovered => {
                    recovered = true;
                    tracing::info!("session token expired, re-registering device");
                    token = self.recover_session().await?;
                }
                Err(SyncError::Transport(message)) => {
                    transport_attempts += 1;
                    if transport_attempts >= MAX_TRANSPORT_ATTEMPTS {
                        return Err(SyncError::Transport(message));
                    }
                    tracing::warn!(
                        attempt = transport_attempts,
                        error = %message,
                        "transport failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Obtains a fresh session for the persisted device uuid. The server keeps
    /// the uuid bound to its user, so re-initializing recovers the account.
    async fn recover_session(&self) -> Result<String, SyncError> {
        let device_uuid = self
            .store
            .stored_device_uuid()
            .await?
            .ok_or(SyncError::Unauthenticated)?;
        let data = self
            .api
            .device_init(&DeviceInitRequest {
                device_uuid,
                device_name: self.device_name.clone(),
                platform: self.platform.clone(),
            })
            .await?;
        self.save_session(&data.user_uuid, &data.device_uuid, &data.session_token, data.expires_at)
            .await?;
        Ok(data.session_token)
    }

    async fn save_session(
        &self,
        user_uuid: &str,
        device_uuid: &str,
        session_token: &str,
        expires_at: i64,
    ) -> Result<(), SyncError> {
        self.store
            .save_credentials(&StoredCredentials {
                device_uuid: device_uuid.to_string(),
                user_uuid: user_uuid.to_string(),
                session_token: session_token.to_string(),
                expires_at,
            })
            .await?;
        Ok(())
    }

    async fn require_credentials(&self) -> Result<StoredCredentials, SyncError> {
        self.store
            .credentials()
            .await?
            .ok_or(SyncError::Unauthenticated)
    }
}

fn count_mutations(changes: &SyncChanges) -> usize {
    changes.pomodoro_events.created.len()
        + changes.pomodoro_events.updated.len()
        + changes.pomodoro_events.deleted.len()
        + changes.system_events.created.len()
        + usize::from(changes.timer_settings.is_some())
}
