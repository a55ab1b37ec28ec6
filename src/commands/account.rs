use clap::{Args, Subcommand};
use std::io::{self, Write};

use pomotrack::config::Config;
use pomotrack::sync::{LocalStore, SyncClient};

use super::format_time;

#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub command: AccountSubcommand,
}

#[derive(Subcommand)]
pub enum AccountSubcommand {
    /// Sign in, creating a new account on first use
    Login,

    /// Attach this device to an existing account
    Join {
        /// Account uuid shown by `account status` on another device
        user_uuid: String,
    },

    /// Show who this device is signed in as
    Status,

    /// Sign out on this device
    Logout {
        /// Also revoke every session of the account
        #[arg(long)]
        everywhere: bool,
    },

    /// List devices attached to the account
    Devices,

    /// Detach a device from the account and revoke its sessions
    RemoveDevice {
        /// Device uuid from `account devices`
        device_uuid: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl AccountCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AccountSubcommand::Login => {
                let client = SyncClient::from_config(config, store.clone())?;
                let data = client.login().await?;

                if data.is_new_user {
                    println!("Created a new account.");
                } else {
                    println!("Signed in.");
                }
                println!("  account uuid:    {}", data.user_uuid);
                println!("  device uuid:     {}", data.device_uuid);
                println!("  session expires: {}", format_time(data.expires_at));

                if data.is_new_user {
                    println!();
                    println!("To sync another device to this account, run on it:");
                    println!("  pomotrack account join {}", data.user_uuid);
                }
                Ok(())
            }

            AccountSubcommand::Join { user_uuid } => {
                let client = SyncClient::from_config(config, store.clone())?;
                let data = client.join(user_uuid).await?;
                println!("Device bound to account {}", data.user_uuid);

                // A freshly bound device starts empty; pull everything.
                println!("Pulling account data...");
                let outcome = client.full_sync().await?;
                println!("Pulled {} item(s).", outcome.pulled);
                Ok(())
            }

            AccountSubcommand::Status => {
                match store.credentials().await? {
                    Some(creds) => {
                        println!("Signed in");
                        println!("  account uuid:    {}", creds.user_uuid);
                        println!("  device uuid:     {}", creds.device_uuid);
                        println!("  session expires: {}", format_time(creds.expires_at));
                        match &config.server_url {
                            Some(url) => println!("  server:          {}", url),
                            None => println!("  server:          not configured"),
                        }

                        let checkpoint = store.checkpoint().await?;
                        if checkpoint > 0 {
                            println!("  last sync:       {}", format_time(checkpoint));
                        } else {
                            println!("  last sync:       never");
                        }
                        let pending = store.pending_count().await?;
                        if pending > 0 {
                            println!("  pending changes: {}", pending);
                        }
                    }
                    None => {
                        println!("Not signed in. Run 'pomotrack account login' first.");
                    }
                }
                Ok(())
            }

            AccountSubcommand::Logout { everywhere } => {
                let client = SyncClient::from_config(config, store.clone())?;
                if *everywhere {
                    client.logout_everywhere().await?;
                    println!("Signed out everywhere. All sessions revoked.");
                } else {
                    client.logout().await?;
                    println!("Signed out. Local data stays on this device.");
                }
                Ok(())
            }

            AccountSubcommand::Devices => {
                let client = SyncClient::from_config(config, store.clone())?;
                let devices = client.devices().await?;

                if devices.is_empty() {
                    println!("No devices found");
                    return Ok(());
                }

                let this_device = store.stored_device_uuid().await?;
                println!("{:<36}  {:<20}  {:<10}  LAST SEEN", "UUID", "NAME", "PLATFORM");
                println!("{}", "-".repeat(88));
                for device in &devices {
                    let name = if device.name.len() > 20 {
                        format!("{}...", &device.name[..17])
                    } else {
                        device.name.clone()
                    };
                    let marker = if this_device.as_deref() == Some(device.uuid.as_str()) {
                        " (this device)"
                    } else {
                        ""
                    };
                    println!(
                        "{:<36}  {:<20}  {:<10}  {}{}",
                        device.uuid,
                        name,
                        device.platform,
                        format_time(device.last_seen_at),
                        marker
                    );
                }
                println!("\nTotal: {} device(s)", devices.len());
                Ok(())
            }

            AccountSubcommand::RemoveDevice { device_uuid, force } => {
                let client = SyncClient::from_config(config, store.clone())?;
                let this_device = store.stored_device_uuid().await?;
                let removing_self = this_device.as_deref() == Some(device_uuid.as_str());

                if !force {
                    if removing_self {
                        print!("Remove THIS device from the account and sign out? [y/N] ");
                    } else {
                        print!("Remove device '{}' and revoke its sessions? [y/N] ", device_uuid);
                    }
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Removal cancelled.");
                        return Ok(());
                    }
                }

                client.remove_device(device_uuid).await?;
                if removing_self {
                    store.clear_session().await?;
                    println!("This device was removed from the account and signed out.");
                } else {
                    println!("Removed device: {}", device_uuid);
                }
                Ok(())
            }
        }
    }
}
