//! Pomotrack Admin CLI
//!
//! Administration tool for inspecting accounts on the sync server.
//!
//! # Usage
//!
//! ```bash
//! pomotrack-admin user list
//! pomotrack-admin user devices <user-uuid>
//! pomotrack-admin session prune
//! pomotrack-admin session revoke <user-uuid>
//! ```
//!
//! # Environment Variables
//!
//! - `POMOTRACK_SERVER_DB`: Server database file (default: ~/.local/share/pomotrack/server.db)

use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use pomotrack::server::{db::init_server_db, IdentityManager};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "pomotrack-admin")]
#[command(version)]
#[command(about = "Pomotrack server administration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect user accounts
    User(UserCommand),

    /// Manage sessions
    Session(SessionCommand),
}

#[derive(Args)]
struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Subcommand)]
enum UserSubcommand {
    /// List all accounts
    List,
    /// List the devices bound to an account
    Devices {
        /// Account uuid
        user_uuid: String,
    },
}

#[derive(Args)]
struct SessionCommand {
    #[command(subcommand)]
    command: SessionSubcommand,
}

#[derive(Subcommand)]
enum SessionSubcommand {
    /// Delete expired sessions
    Prune,
    /// Revoke every session of an account
    Revoke {
        /// Account uuid
        user_uuid: String,
    },
}

// ============================================================================
// Commands
// ============================================================================

fn format_time(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}

async fn list_users(identity: &IdentityManager) -> Result<(), Box<dyn std::error::Error>> {
    let users = identity.list_users().await?;

    if users.is_empty() {
        println!("No accounts registered.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<18} {}",
        "UUID", "NAME", "CREATED", "LAST ACTIVE"
    );
    println!("{}", "-".repeat(92));

    for user in &users {
        let name = if user.name.is_empty() {
            "-"
        } else {
            user.name.as_str()
        };
        println!(
            "{:<38} {:<20} {:<18} {}",
            user.uuid,
            name,
            format_time(user.created_at),
            format_time(user.last_active_at)
        );
    }

    println!();
    println!("Total: {} account(s)", users.len());
    Ok(())
}

async fn list_devices(
    identity: &IdentityManager,
    user_uuid: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = identity.list_devices(user_uuid).await?;

    if devices.is_empty() {
        println!("No devices bound to account {}", user_uuid);
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<10} {:<18} {}",
        "UUID", "NAME", "PLATFORM", "LAST SYNC", "LAST SEEN"
    );
    println!("{}", "-".repeat(104));

    for device in &devices {
        let name = if device.name.len() > 20 {
            format!("{}...", &device.name[..17])
        } else {
            device.name.clone()
        };
        let last_sync = if device.last_sync_timestamp > 0 {
            format_time(device.last_sync_timestamp)
        } else {
            "never".to_string()
        };
        println!(
            "{:<38} {:<20} {:<10} {:<18} {}",
            device.uuid,
            name,
            device.platform,
            last_sync,
            format_time(device.last_seen_at)
        );
    }

    println!();
    println!("Total: {} device(s)", devices.len());
    Ok(())
}

async fn prune_sessions(identity: &IdentityManager) -> Result<(), Box<dyn std::error::Error>> {
    let pruned = identity.prune_sessions().await?;
    println!("Pruned {} expired session(s)", pruned);
    Ok(())
}

async fn revoke_sessions(
    identity: &IdentityManager,
    user_uuid: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let revoked = identity.revoke_all_sessions(user_uuid).await?;
    println!("Revoked {} session(s) for account {}", revoked, user_uuid);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = std::env::var("POMOTRACK_SERVER_DB").ok().map(PathBuf::from);
    let pool = init_server_db(db_path).await?;
    let identity = IdentityManager::new(pool);

    match cli.command {
        Commands::User(cmd) => match cmd.command {
            UserSubcommand::List => list_users(&identity).await,
            UserSubcommand::Devices { user_uuid } => list_devices(&identity, &user_uuid).await,
        },
        Commands::Session(cmd) => match cmd.command {
            SessionSubcommand::Prune => prune_sessions(&identity).await,
            SessionSubcommand::Revoke { user_uuid } => revoke_sessions(&identity, &user_uuid).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
