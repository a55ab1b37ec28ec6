use clap::{Args, Subcommand};

use pomotrack::config::Config;

use super::OutputFormat;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        let path = Config::default_config_path();
                        if path.exists() {
                            println!("Config file: {}", path.display());
                        } else {
                            println!("Config file: {} (not found)", path.display());
                        }
                        println!();

                        println!("database_path:  {}", config.database_path.display());
                        match &config.server_url {
                            Some(url) => println!("server_url:     {}", url),
                            None => println!("server_url:     not set"),
                        }
                        println!("device_name:    {}", config.device_name);
                        println!("platform:       {}", config.platform);
                        println!("auto_sync_secs: {}", config.auto_sync_secs);
                    }
                }
                Ok(())
            }
        }
    }
}
