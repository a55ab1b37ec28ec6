//! Error taxonomy for the sync server.
//!
//! Auth and merge failures are separate enums because they surface differently:
//! auth errors map to 401/400 responses, merge validation to 400, and any
//! storage error rolls the whole transaction back as a 500. Per-entity problems
//! inside a sync batch are not errors at all; they become
//! [`crate::protocol::SyncConflict`] entries.

use std::fmt;

/// Identity and session failures.
#[derive(Debug)]
pub enum AuthError {
    /// The referenced user does not exist or the uuid is malformed.
    InvalidUserUuid(String),
    /// Malformed device identifier.
    InvalidDeviceUuid(String),
    /// The device is already bound to a different user; re-binding is never
    /// silent.
    DeviceOwnershipConflict {
        device_uuid: String,
        owner_uuid: String,
    },
    /// The session exists but its expiry has passed.
    TokenExpired,
    /// Unknown or revoked token, or no token at all.
    Unauthenticated,
    /// Request-level validation failure (empty device name, empty platform).
    Validation(String),
    Storage(sqlx::Error),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidUserUuid(uuid) => write!(f, "Invalid user uuid '{}'", uuid),
            AuthError::InvalidDeviceUuid(uuid) => write!(f, "Invalid device uuid '{}'", uuid),
            AuthError::DeviceOwnershipConflict { device_uuid, .. } => {
                write!(f, "Device {} is already bound to another user", device_uuid)
            }
            AuthError::TokenExpired => write!(f, "Session token expired"),
            AuthError::Unauthenticated => write!(f, "Not authenticated"),
            AuthError::Validation(msg) => write!(f, "{}", msg),
            AuthError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Storage(err)
    }
}

/// Merge coordinator failures. Anything that fails here aborts the request
/// with no partial application.
#[derive(Debug)]
pub enum MergeError {
    /// The request itself is unacceptable (e.g. force overwrite without the
    /// zero checkpoint).
    Validation(String),
    Storage(sqlx::Error),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::Validation(msg) => write!(f, "{}", msg),
            MergeError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MergeError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MergeError {
    fn from(err: sqlx::Error) -> Self {
        MergeError::Storage(err)
    }
}
