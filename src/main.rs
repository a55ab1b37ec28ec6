use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    AccountCommand, ConfigCommand, EventCommand, EventSubcommand, SettingsCommand,
    SettingsSubcommand, SyncCommand,
};
use pomotrack::config::Config;
use pomotrack::db::init_client_db;
use pomotrack::sync::{try_auto_sync, ChangeHub, LocalStore};

#[derive(Parser)]
#[command(name = "pomotrack")]
#[command(version)]
#[command(about = "A pomodoro and focus time tracking application", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record and inspect timer events
    Event(EventCommand),

    /// Manage timer settings
    Settings(SettingsCommand),

    /// Sync with the remote server
    Sync(SyncCommand),

    /// Manage the account and its devices
    Account(AccountCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

/// Commands that display synced data and benefit from a fresh pull first.
fn is_read_command(command: &Commands) -> bool {
    match command {
        Commands::Event(cmd) => matches!(
            cmd.command,
            EventSubcommand::List { .. }
                | EventSubcommand::Show { .. }
                | EventSubcommand::Summary { .. }
        ),
        Commands::Settings(cmd) => matches!(cmd.command, SettingsSubcommand::Show { .. }),
        _ => false,
    }
}

/// Commands that mutate synced data and should push afterwards.
fn is_write_command(command: &Commands) -> bool {
    match command {
        Commands::Event(cmd) => matches!(
            cmd.command,
            EventSubcommand::Add { .. }
                | EventSubcommand::Edit { .. }
                | EventSubcommand::Complete { .. }
                | EventSubcommand::Delete { .. }
        ),
        Commands::Settings(cmd) => matches!(
            cmd.command,
            SettingsSubcommand::Set { .. } | SettingsSubcommand::Unset { .. }
        ),
        _ => false,
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => {
            // Config inspection never touches the database.
            return cmd.run(&config);
        }
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let pool = init_client_db(Some(config.database_path.clone())).await?;
    let store = LocalStore::new(pool, ChangeHub::new());

    // Pull fresh data before showing it when a server is configured.
    if is_read_command(&command) {
        try_auto_sync(&config, &store).await;
    }

    let result = match &command {
        Commands::Event(cmd) => cmd.run(&store).await,
        Commands::Settings(cmd) => cmd.run(&store).await,
        Commands::Sync(cmd) => cmd.run(&store, &config).await,
        Commands::Account(cmd) => cmd.run(&store, &config).await,
        Commands::Config(_) => Ok(()),
    };

    // Push local changes right after a successful write.
    if result.is_ok() && is_write_command(&command) {
        try_auto_sync(&config, &store).await;
    }

    result
}
