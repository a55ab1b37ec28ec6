//! Pomotrack Sync Server
//!
//! Account-based sync server for Pomotrack clients. Stores each account's
//! timer events and settings and merges uploads from multiple devices.
//!
//! # Configuration
//!
//! Environment variables:
//! - `POMOTRACK_PORT`: Port to listen on (default: 8080)
//! - `POMOTRACK_SERVER_DB`: Database file (default: ~/.local/share/pomotrack/server.db)
//! - `POMOTRACK_SESSION_TTL_HOURS`: Session lifetime (default: 24)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check (no auth required)
//! - `POST /api/auth/device-init`, `/device-bind`, `/refresh`, `/logout`
//! - `POST /api/sync/incremental`, `GET /api/sync/full` (auth required)
//! - `GET /api/user/devices`, `DELETE /api/user/devices/{uuid}`,
//!   `DELETE /api/user/sessions` (auth required)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pomotrack::server::{db::init_server_db, router, AppState, IdentityManager, MergeCoordinator};

// ============================================================================
// Configuration
// ============================================================================

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Database file, `None` for the platform default
    db_path: Option<PathBuf>,
    /// Session lifetime in hours
    session_ttl_hours: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("POMOTRACK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("POMOTRACK_SERVER_DB").ok().map(PathBuf::from);

        let session_ttl_hours = std::env::var("POMOTRACK_SESSION_TTL_HOURS")
            .ok()
            .and_then(|h| h.parse().ok());

        Self {
            port,
            db_path,
            session_ttl_hours,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pomotrack=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    let pool = match init_server_db(config.db_path.clone()).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let mut identity = IdentityManager::new(pool.clone());
    if let Some(hours) = config.session_ttl_hours {
        identity = identity.with_session_ttl_hours(hours);
    }
    let merge = MergeCoordinator::new(pool);

    // Expired sessions accumulate otherwise; sweep them in the background.
    let pruner_identity = identity.clone();
    let (prune_stop, mut prune_signal) = tokio::sync::watch::channel(false);
    let pruner = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match pruner_identity.prune_sessions().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("Pruned {} expired session(s)", n),
                        Err(e) => tracing::warn!("Session prune failed: {}", e),
                    }
                }
                _ = prune_signal.changed() => break,
            }
        }
    });

    // Build router
    let state = AppState::new(identity, merge);
    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    let _ = prune_stop.send(true);
    let _ = pruner.await;
}
