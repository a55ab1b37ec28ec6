mod account;
mod config_cmd;
mod event;
mod settings;
mod sync_cmd;

pub use account::{AccountCommand, AccountSubcommand};
pub use config_cmd::ConfigCommand;
pub use event::{EventCommand, EventSubcommand};
pub use settings::{SettingsCommand, SettingsSubcommand};
pub use sync_cmd::{SyncCommand, SyncSubcommand};

use chrono::{DateTime, Utc};
use clap::ValueEnum;

/// Output format shared by the read commands
#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Millisecond timestamp rendered as UTC wall-clock time.
pub(crate) fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Millisecond length rendered as a compact duration.
pub(crate) fn format_duration(ms: i64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
