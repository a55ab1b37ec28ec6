//! Sync client error types.

/// Errors that can occur during sync client operations.
///
/// Transport problems are retried before they surface; auth problems carry
/// enough shape for the caller to pick a recovery path (re-register the device
/// on [`SyncError::TokenExpired`], ask the user to log in again on
/// [`SyncError::Unauthenticated`]).
#[derive(Debug)]
pub enum SyncError {
    /// Sync is not configured
    NotConfigured,
    /// Another sync run is already in flight
    AlreadyRunning,
    /// Session token expired
    TokenExpired,
    /// Token unknown or revoked; a new login is required
    Unauthenticated,
    /// Failed to reach the server
    Transport(String),
    /// Server answered with an error
    Api(String),
    /// Local storage error
    Storage(sqlx::Error),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotConfigured => {
                write!(f, "Sync not configured. Set server_url in config.")
            }
            SyncError::AlreadyRunning => write!(f, "A sync is already running"),
            SyncError::TokenExpired => write!(f, "Session token expired"),
            SyncError::Unauthenticated => {
                write!(f, "Not authenticated with the sync server. Log in again.")
            }
            SyncError::Transport(e) => write!(f, "Connection error: {}", e),
            SyncError::Api(e) => write!(f, "Server error: {}", e),
            SyncError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Storage(e)
    }
}
