//! Worker configuration, loaded once at startup.
//!
//! Read from `~/.aidly/config.json` (path overridable via the
//! `AIDLY_CONFIG` env var); a missing file yields defaults. Individual
//! business-hours values can be overridden from the environment
//! (`AIDLY_BUSINESS_DAYS`, `AIDLY_BUSINESS_START`, `AIDLY_BUSINESS_END`,
//! `AIDLY_TIMEZONE`). Business-hours validation happens here, at load;
//! an unparsable time, unknown timezone, or empty day set must fail the
//! process at boot, never inside a calculation.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid time of day '{0}': expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid business day {0}: expected 1 (Monday) through 7 (Sunday)")]
    InvalidDay(u8),

    #[error("Business day set is empty")]
    EmptyBusinessDays,

    #[error("Business hours start must precede end")]
    EmptyBusinessWindow,
}

/// Raw business-hours settings as they appear in the config file.
/// Days use ISO numbering: 1 = Monday through 7 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursSettings {
    #[serde(default = "default_business_days")]
    pub days: Vec<u8>,
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_end")]
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for BusinessHoursSettings {
    fn default() -> Self {
        Self {
            days: default_business_days(),
            start: default_start(),
            end: default_end(),
            timezone: default_timezone(),
        }
    }
}

fn default_business_days() -> Vec<u8> {
    vec![1, 2, 3, 4, 5]
}

fn default_start() -> String {
    "09:00".to_string()
}

fn default_end() -> String {
    "18:00".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Report engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsSettings {
    /// Statement timeout applied to each report query.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
    /// Root directory for exported files. Default: `~/.aidly/exports`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<String>,
    /// Executions older than this lose their export files.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for ReportsSettings {
    fn default() -> Self {
        Self {
            statement_timeout_secs: default_statement_timeout(),
            export_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

fn default_statement_timeout() -> u64 {
    30
}

fn default_retention_days() -> i64 {
    90
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub business_hours: BusinessHoursSettings,
    #[serde(default)]
    pub reports: ReportsSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Database path override. Default: `~/.aidly/aidly.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Config {
    /// Load configuration from the canonical path, applying env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The canonical config file path: `$AIDLY_CONFIG` or `~/.aidly/config.json`.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("AIDLY_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(home.join(".aidly").join("config.json"))
    }

    /// Apply environment overrides for business-hours values. The lookup is
    /// injected so tests can exercise overrides without mutating process env.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(days) = get("AIDLY_BUSINESS_DAYS") {
            let parsed: Vec<u8> = days
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.business_hours.days = parsed;
            }
        }
        if let Some(start) = get("AIDLY_BUSINESS_START") {
            self.business_hours.start = start;
        }
        if let Some(end) = get("AIDLY_BUSINESS_END") {
            self.business_hours.end = end;
        }
        if let Some(tz) = get("AIDLY_TIMEZONE") {
            self.business_hours.timezone = tz;
        }
    }

    /// Resolve the export directory, defaulting to `~/.aidly/exports`.
    pub fn export_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.reports.export_dir {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(home.join(".aidly").join("exports"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.business_hours.days, vec![1, 2, 3, 4, 5]);
        assert_eq!(config.business_hours.start, "09:00");
        assert_eq!(config.business_hours.end, "18:00");
        assert_eq!(config.business_hours.timezone, "UTC");
        assert_eq!(config.reports.statement_timeout_secs, 30);
        assert_eq!(config.reports.retention_days, 90);
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.poll_interval_secs, 60);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.business_hours.start, "09:00");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"business_hours": {"start": "08:30"}, "reports": {"retention_days": 14}}"#,
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.business_hours.start, "08:30");
        assert_eq!(config.business_hours.end, "18:00");
        assert_eq!(config.reports.retention_days, 14);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "AIDLY_BUSINESS_DAYS" => Some("1,2,3".to_string()),
            "AIDLY_BUSINESS_START" => Some("07:00".to_string()),
            "AIDLY_TIMEZONE" => Some("America/New_York".to_string()),
            _ => None,
        });
        assert_eq!(config.business_hours.days, vec![1, 2, 3]);
        assert_eq!(config.business_hours.start, "07:00");
        assert_eq!(config.business_hours.end, "18:00");
        assert_eq!(config.business_hours.timezone, "America/New_York");
    }

    #[test]
    fn test_garbage_days_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "AIDLY_BUSINESS_DAYS" => Some("weekdays".to_string()),
            _ => None,
        });
        assert_eq!(config.business_hours.days, vec![1, 2, 3, 4, 5]);
    }
}
