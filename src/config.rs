//! Application paths and persisted settings
//!
//! Paths priority: CLI `--config-dir` → `ANIMCACHE_CONFIG_DIR` → local folder
//! (if it already holds animcache files) → platform dirs from `dirs-next`.
//!
//! Settings live in `animcache.json`. Every field has a default, so a partial
//! file (or none at all) is fine.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::cache_man::BudgetPolicy;

/// Settings file name
pub const SETTINGS_FILE: &str = "animcache.json";
/// Default log file name (for `--log` without a path)
pub const LOG_FILE: &str = "animcache.log";

const APP_DIR: &str = "animcache";
const ENV_CONFIG_DIR: &str = "ANIMCACHE_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (ANIMCACHE_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(ENV_CONFIG_DIR).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Path to a configuration file
///
/// Platform paths:
/// - Linux: ~/.config/animcache/{name}
/// - macOS: ~/Library/Application Support/animcache/{name}
/// - Windows: %APPDATA%\animcache\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir).join(name)
}

/// Path to a data file (logs)
///
/// Platform paths:
/// - Linux: ~/.local/share/animcache/{name}
/// - macOS: ~/Library/Application Support/animcache/{name}
/// - Windows: %APPDATA%\animcache\{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir).join(name)
}

/// Create the config and data directories if missing
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = resolve_dir(config, dirs_next::config_dir);
    let data_dir = resolve_dir(config, dirs_next::data_dir);

    for dir in [&config_dir, &data_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, platform: fn() -> Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Ok(current) = std::env::current_dir() {
        if has_local_files(&current) {
            return current;
        }
    }
    platform()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Persisted tunables (`animcache.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cache budget in MB; `None` = auto from system memory
    pub budget_mb: Option<u64>,
    /// Auto budget: share of total memory
    pub total_fraction: f64,
    /// Auto budget: share of free memory
    pub free_fraction: f64,
    /// Worker threads; `None` = 3/4 of the CPUs
    pub worker_threads: Option<usize>,
    /// Delay before the budget refresh that follows a memory warning
    pub refresh_delay_ms: u64,
    /// Display rate for CLI playback
    pub default_fps: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let policy = BudgetPolicy::default();
        Self {
            budget_mb: None,
            total_fraction: policy.total_fraction,
            free_fraction: policy.free_fraction,
            worker_threads: None,
            refresh_delay_ms: 2000,
            default_fps: 60.0,
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file: {}", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }

    /// Clamp out-of-range values back to something usable
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..=1.0).contains(&self.total_fraction) {
            self.total_fraction = defaults.total_fraction;
        }
        if !(0.0..=1.0).contains(&self.free_fraction) {
            self.free_fraction = defaults.free_fraction;
        }
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            self.default_fps = defaults.default_fps;
        }
        self
    }

    pub fn policy(&self) -> BudgetPolicy {
        BudgetPolicy {
            total_fraction: self.total_fraction,
            free_fraction: self.free_fraction,
        }
    }

    /// Budget for `AnimatedImage::set_budget` (negative = auto)
    pub fn budget_bytes(&self) -> i64 {
        match self.budget_mb {
            Some(mb) => mb.saturating_mul(1024 * 1024).min(i64::MAX as u64) as i64,
            None => -1,
        }
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file("x.log", &config), PathBuf::from("/custom/x.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from/cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_ensure_dirs_creates_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("cfg");
        let config = PathConfig {
            config_dir: Some(dir.clone()),
        };
        ensure_dirs(&config).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_missing_settings_are_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load(&tmp.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.budget_bytes(), -1);
        assert_eq!(settings.refresh_delay(), Duration::from_secs(2));
        assert_eq!(settings.policy(), BudgetPolicy::default());
    }

    #[test]
    fn test_partial_settings_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "budget_mb": 64, "total_fraction": 7.0 }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.budget_bytes(), 64 * 1024 * 1024);
        assert_eq!(settings.total_fraction, 0.2, "out of range falls back");
        assert_eq!(settings.default_fps, 60.0);
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        let settings = Settings {
            worker_threads: Some(3),
            default_fps: 24.0,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ nope").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(SETTINGS_FILE));
    }
}
