use chrono::Utc;
use clap::{Args, Subcommand};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use pomotrack::config::Config;
use pomotrack::sync::{ApiClient, AutoSync, ChangeEvent, LocalStore, SyncClient, SyncError};

use super::format_time;

/// Sync with the remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
pub enum SyncSubcommand {
    /// Replace the local replica with the server's complete state
    Full {
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Replace the server's account data with this device's (destructive)
    Push {
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Show sync configuration and server status
    Status,

    /// Keep syncing on an interval until interrupted
    Watch {
        /// Seconds between runs (defaults to auto_sync_secs from config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.incremental(store, config).await,
            Some(SyncSubcommand::Full { force }) => self.full(store, config, *force).await,
            Some(SyncSubcommand::Push { force }) => self.push(store, config, *force).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
            Some(SyncSubcommand::Watch { interval }) => self.watch(store, config, *interval).await,
        }
    }

    async fn incremental(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let client = SyncClient::from_config(config, store.clone())?;

        println!("Syncing with server...");
        let outcome = client.incremental_sync().await?;

        println!("  ✓ pushed {} change(s)", outcome.pushed);
        println!("  ✓ pulled {} change(s)", outcome.pulled);
        for conflict in &outcome.conflicts {
            println!("  ! conflict on {}: {}", conflict.uuid, conflict.reason);
        }

        println!();
        if outcome.pushed == 0 && outcome.pulled == 0 {
            println!("Already up to date.");
        } else {
            println!("Sync complete.");
        }
        Ok(())
    }

    async fn full(
        &self,
        store: &LocalStore,
        config: &Config,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let client = SyncClient::from_config(config, store.clone())?;

        let pending = store.pending_count().await?;
        if !force && pending > 0 {
            print!(
                "Replace local data with the server's copy? {} unsynced change(s) will be lost. [y/N] ",
                pending
            );
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;

            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Full sync cancelled.");
                return Ok(());
            }
        }

        println!("Pulling complete state...");
        let outcome = client.full_sync().await?;
        println!("Local replica now holds {} item(s).", outcome.pulled);
        Ok(())
    }

    async fn push(
        &self,
        store: &LocalStore,
        config: &Config,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let client = SyncClient::from_config(config, store.clone())?;

        if !force {
            print!("Replace ALL server data for this account with this device's data? [y/N] ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;

            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Push cancelled.");
                return Ok(());
            }
        }

        println!("Overwriting server state...");
        let outcome = client.force_overwrite_remote().await?;
        println!("Server now holds {} item(s) from this device.", outcome.pushed);
        Ok(())
    }

    async fn status(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let Some(server_url) = config.server_url.as_ref() else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  server_url: \"http://localhost:8080\"");
            println!();
            println!("Or set the POMOTRACK_SERVER_URL environment variable.");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        match store.credentials().await? {
            Some(creds) => println!("Account:   {}", creds.user_uuid),
            None => println!("Account:   not signed in"),
        }

        let checkpoint = store.checkpoint().await?;
        if checkpoint > 0 {
            println!("Last sync: {}", format_time(checkpoint));
        } else {
            println!("Last sync: never");
        }
        println!("Pending:   {} change(s)", store.pending_count().await?);
        println!();

        print!("Server status: ");
        let api = ApiClient::new(server_url.clone());
        match api.health().await {
            Ok(()) => println!("✓ connected"),
            Err(SyncError::Transport(_)) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }
        Ok(())
    }

    async fn watch(
        &self,
        store: &LocalStore,
        config: &Config,
        interval: Option<u64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let client = SyncClient::from_config(config, store.clone())?;
        let secs = interval.unwrap_or(config.auto_sync_secs);
        if secs == 0 {
            return Err("Interval must be at least 1 second".into());
        }

        println!("Syncing every {}s. Press Ctrl-C to stop.", secs);

        // Echo run results while the loop runs in the background.
        let mut events = store.hub().subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChangeEvent::SyncCompleted { pushed, pulled }) if pushed + pulled > 0 => {
                        println!(
                            "[{}] synced: {} pushed, {} pulled",
                            Utc::now().format("%H:%M:%S"),
                            pushed,
                            pulled
                        );
                    }
                    Ok(ChangeEvent::SyncFailed { message }) => {
                        eprintln!(
                            "[{}] sync failed: {}",
                            Utc::now().format("%H:%M:%S"),
                            message
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        // First run right away; the interval loop takes over from there.
        if let Err(e) = client.incremental_sync().await {
            eprintln!("Sync failed: {}", e);
        }

        let auto = AutoSync::spawn(client, Duration::from_secs(secs));
        tokio::signal::ctrl_c().await?;
        println!();
        println!("Stopping...");
        auto.shutdown().await;
        printer.abort();
        Ok(())
    }
}
