//! Pomotrack Core Library
//!
//! Local-first pomodoro time tracking with multi-device sync: the client-side
//! store and sync engine, the shared wire protocol, and the server that merges
//! changes from every device of an account.

pub mod config;
pub mod db;
pub mod models;
pub mod protocol;
pub mod server;
pub mod sync;

pub use config::{Config, ConfigError};
pub use models::{Device, EventKind, SystemEvent, SystemEventKind, TimedEvent, TimerSettings};
pub use sync::{
    ApiClient, AutoSync, ChangeEvent, ChangeHub, DaySummary, LocalStore, SummaryCache, SyncClient,
    SyncError, SyncOutcome,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
