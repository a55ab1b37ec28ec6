use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the local SQLite database
    pub database_path: PathBuf,
    /// Sync server base URL; sync stays off while unset
    pub server_url: Option<String>,
    /// Name this device registers under
    pub device_name: String,
    /// Platform label sent on device registration
    pub platform: String,
    /// Seconds between background sync runs
    pub auto_sync_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: Self::default_data_dir().join("pomotrack.db"),
            server_url: None,
            device_name: default_device_name(),
            platform: std::env::consts::OS.to_string(),
            auto_sync_secs: 300,
        }
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("pomotrack-{}", std::env::consts::OS))
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("POMOTRACK_DATABASE_PATH") {
            config.database_path = PathBuf::from(db_path);
        }
        if let Ok(url) = std::env::var("POMOTRACK_SERVER_URL") {
            config.server_url = Some(url);
        }
        if let Ok(name) = std::env::var("POMOTRACK_DEVICE_NAME") {
            config.device_name = name;
        }
        if let Ok(value) = std::env::var("POMOTRACK_AUTO_SYNC_SECS") {
            if let Ok(secs) = value.parse() {
                config.auto_sync_secs = secs;
            }
        }

        Ok(config)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/pomotrack/
    /// - macOS: ~/Library/Application Support/pomotrack/
    /// - Windows: %APPDATA%/pomotrack/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pomotrack")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/pomotrack/
    /// - macOS: ~/Library/Application Support/pomotrack/
    /// - Windows: %APPDATA%/pomotrack/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pomotrack")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config
            .database_path
            .to_string_lossy()
            .contains("pomotrack.db"));
        assert!(config.server_url.is_none());
        assert_eq!(config.auto_sync_secs, 300);
        assert!(!config.device_name.is_empty());
        assert!(!config.platform.is_empty());
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.server_url.is_none());
        assert_eq!(config.auto_sync_secs, 300);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/db.sqlite").unwrap();
        writeln!(file, "server_url: http://sync.example.com:8080").unwrap();
        writeln!(file, "device_name: Work Laptop").unwrap();
        writeln!(file, "auto_sync_secs: 60").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/custom/path/db.sqlite")
        );
        assert_eq!(
            config.server_url.as_deref(),
            Some("http://sync.example.com:8080")
        );
        assert_eq!(config.device_name, "Work Laptop");
        assert_eq!(config.auto_sync_secs, 60);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: http://localhost:8080").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.auto_sync_secs, 300);
        assert!(config
            .database_path
            .to_string_lossy()
            .contains("pomotrack.db"));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: http://fromfile:8080").unwrap();

        std::env::set_var("POMOTRACK_SERVER_URL", "http://fromenv:9090");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("http://fromenv:9090"));

        std::env::remove_var("POMOTRACK_SERVER_URL");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
