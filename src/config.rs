use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CONFIG_PATH: &str = "config/msgboard.json";
pub const DATABASE_ENV: &str = "MSGBOARD_DB";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file holding the durable key-value table.
    pub database_path: String,
    /// Byte cap for the durable table; `None` means unlimited.
    pub quota_bytes: Option<usize>,
    pub keys: StorageKeys,
    pub backup_interval_secs: u64,
    pub seed: SeedConfig,
    pub roster: RosterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "data/msgboard.db".to_string(),
            quota_bytes: None,
            keys: StorageKeys::default(),
            backup_interval_secs: 600,
            seed: SeedConfig::default(),
            roster: RosterConfig::default(),
        }
    }
}

/// Key names shared by every instance pointed at the same store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub primary: String,
    pub backup: String,
    pub transaction: String,
    pub seed_guard: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            primary: "messages".to_string(),
            backup: "messages_backup".to_string(),
            transaction: "messages_transaction".to_string(),
            seed_guard: "__prevent_default_messages".to_string(),
        }
    }
}

/// Example records shown when nothing has ever been stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Roster file relative to the site root, or an absolute `http(s)` URL.
    pub file: String,
    /// Site root the relative path is joined onto; a directory or an `http(s)` URL.
    pub site_root: Option<String>,
    /// Page the lookup is made from; its depth decides how many `../` to prepend.
    pub page_path: String,
    pub timeout_ms: u64,
    pub ttl_secs: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            file: "assets/data/students.json".to_string(),
            site_root: None,
            page_path: "/index.html".to_string(),
            timeout_ms: 5000,
            ttl_secs: 300,
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };

    if let Ok(db_path) = std::env::var(DATABASE_ENV) {
        if !db_path.trim().is_empty() {
            log::info!("Using database path from {DATABASE_ENV}: {db_path}");
            config.database_path = db_path;
        }
    }
    config
}

/// Writes `config` as pretty JSON. An existing file is left alone unless `overwrite`;
/// returns whether anything was written.
pub fn write_config(path: &str, config: &AppConfig, overwrite: bool) -> std::io::Result<bool> {
    if !overwrite && Path::new(path).exists() {
        log::info!("Config file {path} already exists; leaving it untouched");
        return Ok(false);
    }
    crate::storage::ensure_data_dir(path)?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    log::info!("Wrote config file {path}");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.keys, StorageKeys::default());
        assert_eq!(config.backup_interval_secs, 600);
        assert_eq!(config.roster.timeout_ms, 5000);
        assert!(!config.seed.enabled);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(
            &path,
            r#"{"backup_interval_secs": 60, "keys": {"primary": "board"}, "seed": {"enabled": true}}"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.backup_interval_secs, 60);
        assert_eq!(config.keys.primary, "board");
        assert_eq!(config.keys.backup, "messages_backup");
        assert!(config.seed.enabled);
    }

    #[test]
    fn written_config_loads_back_and_is_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/board.json");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.quota_bytes = Some(5 * 1024 * 1024);
        assert!(write_config(path, &config, false).unwrap());
        assert_eq!(load_config(path).quota_bytes, Some(5 * 1024 * 1024));

        assert!(!write_config(path, &AppConfig::default(), false).unwrap());
        assert_eq!(load_config(path).quota_bytes, Some(5 * 1024 * 1024));

        assert!(write_config(path, &AppConfig::default(), true).unwrap());
        assert_eq!(load_config(path).quota_bytes, None);
    }

    #[test]
    fn garbage_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config(path.to_str().unwrap()).keys.primary, "messages");
    }
}
