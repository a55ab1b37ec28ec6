//! Periodic background sync with cooperative shutdown.
//!
//! Each tick runs one incremental sync. Failures stay local: the error is
//! logged and the next tick retries with whatever is still pending. Shutdown
//! is signalled over a watch channel and honored at the next await point; a
//! sync already in flight finishes before the loop exits.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::api::ApiClient;
use super::client::SyncClient;
use super::error::SyncError;
use super::store::LocalStore;
use crate::config::Config;

/// Best-effort sync around one-shot CLI commands.
///
/// Skips silently when no server is configured or this device has never
/// logged in, and fast-fails on an unreachable server so offline invocations
/// stay quick. A real sync failure is reported but never fatal; the data is
/// already safe locally.
pub async fn try_auto_sync(config: &Config, store: &LocalStore) {
    let Some(server_url) = config.server_url.as_ref() else {
        return;
    };
    match store.credentials().await {
        Ok(Some(_)) => {}
        // Not logged in yet, nothing to push or pull.
        _ => return,
    }

    let api = ApiClient::new(server_url.clone());
    if api.health().await.is_err() {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    let client = SyncClient::new(
        api,
        store.clone(),
        config.device_name.clone(),
        config.platform.clone(),
    );
    if let Err(e) = client.incremental_sync().await {
        eprintln!("Auto-sync: {}", e);
    }
}

/// Handle to a running auto-sync loop.
#[derive(Debug)]
pub struct AutoSync {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AutoSync {
    /// Spawns the loop. The first sync runs one full interval after spawn,
    /// matching a plain repeating timer.
    pub fn spawn(client: SyncClient, interval: Duration) -> Self {
        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; swallow it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_once(&client).await,
                    _ = signal.changed() => break,
                }
            }
            tracing::debug!("auto sync stopped");
        });
        Self { shutdown, handle }
    }

    /// Signals the loop to stop and waits for it to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_once(client: &SyncClient) {
    match client.incremental_sync().await {
        Ok(outcome) => {
            tracing::debug!(
                pushed = outcome.pushed,
                pulled = outcome.pulled,
                "auto sync tick finished"
            );
        }
        // A manual sync holds the overlap flag; this tick just yields to it.
        Err(SyncError::AlreadyRunning) => {
            tracing::debug!("auto sync tick skipped, another run is in flight");
        }
        Err(e) => {
            tracing::warn!(error = %e, "auto sync failed, retrying next tick");
        }
    }
}
