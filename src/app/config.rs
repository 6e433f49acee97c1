use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdbSettings {
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSettings {
    pub command_timeout_ms: u64,
    pub battery_timeout_ms: u64,
    pub battery_freshness_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 10_000,
            battery_timeout_ms: 5_000,
            battery_freshness_ms: 5 * 60 * 1_000,
        }
    }
}

impl TimeoutSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn battery_timeout(&self) -> Duration {
        Duration::from_millis(self.battery_timeout_ms)
    }

    pub fn battery_freshness(&self) -> Duration {
        Duration::from_millis(self.battery_freshness_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallSettings {
    pub remote_tmp_dir: String,
    pub file_mode: u32,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            remote_tmp_dir: "/data/local/tmp".to_string(),
            file_mode: 0o644,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub install: InstallSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LAZY_BLACKTEA_SESSION_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lazy_blacktea_session.json")
}

fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<SessionConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &SessionConfig, trace_id: &str) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<SessionConfig, AppError> {
    if !path.exists() {
        return Ok(SessionConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: SessionConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &SessionConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: SessionConfig) -> SessionConfig {
    let defaults = TimeoutSettings::default();
    if config.timeouts.command_timeout_ms == 0 {
        config.timeouts.command_timeout_ms = defaults.command_timeout_ms;
    }
    if config.timeouts.battery_timeout_ms == 0 {
        config.timeouts.battery_timeout_ms = defaults.battery_timeout_ms;
    }
    let tmp_dir = config.install.remote_tmp_dir.trim().trim_end_matches('/');
    if !tmp_dir.starts_with('/') {
        config.install.remote_tmp_dir = InstallSettings::default().remote_tmp_dir;
    } else {
        config.install.remote_tmp_dir = tmp_dir.to_string();
    }
    if config.install.file_mode == 0 || config.install.file_mode > 0o7777 {
        config.install.file_mode = InstallSettings::default().file_mode;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    config
}
