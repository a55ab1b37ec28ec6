use clap::{Args, Subcommand};
use serde_json::Value;

use pomotrack::models::TimerSettings;
use pomotrack::sync::LocalStore;

use super::{format_time, OutputFormat};

#[derive(Args)]
pub struct SettingsCommand {
    #[command(subcommand)]
    pub command: SettingsSubcommand,
}

#[derive(Subcommand)]
pub enum SettingsSubcommand {
    /// Show timer settings
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Set one setting
    Set {
        /// Setting key, e.g. pomodoro_time
        key: String,

        /// Value; parsed as JSON when possible, kept as a string otherwise
        value: String,
    },

    /// Remove one setting
    Unset {
        /// Setting key
        key: String,
    },
}

impl SettingsCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SettingsSubcommand::Show { format } => {
                let settings = store.load_settings().await?;

                let settings = match settings {
                    Some(settings) if !settings.is_empty() => settings,
                    _ => {
                        println!("No settings stored");
                        println!("Set one with: pomotrack settings set pomodoro_time 1500");
                        return Ok(());
                    }
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&settings)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<24}  VALUE", "KEY");
                        println!("{}", "-".repeat(40));
                        for (key, value) in &settings.values {
                            println!("{:<24}  {}", key, display_value(value));
                        }
                        println!("\nUpdated: {}", format_time(settings.updated_at));
                    }
                }
                Ok(())
            }

            SettingsSubcommand::Set { key, value } => {
                if key.trim().is_empty() {
                    return Err("Setting key cannot be empty".into());
                }
                if key == "updated_at" {
                    return Err("'updated_at' is reserved for the sync stamp".into());
                }

                let parsed: Value =
                    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));

                let mut settings = store.load_settings().await?.unwrap_or_else(TimerSettings::new);
                settings.set(key.clone(), parsed.clone());
                store.save_settings(&settings).await?;

                println!("Set {} = {}", key, display_value(&parsed));
                Ok(())
            }

            SettingsSubcommand::Unset { key } => {
                let mut settings = match store.load_settings().await? {
                    Some(settings) => settings,
                    None => {
                        println!("Setting '{}' is not set.", key);
                        return Ok(());
                    }
                };

                if settings.remove(key).is_none() {
                    println!("Setting '{}' is not set.", key);
                    return Ok(());
                }

                store.save_settings(&settings).await?;
                println!("Removed setting '{}'", key);
                Ok(())
            }
        }
    }
}

/// Strings print bare; everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
