//! Monitor configuration
//!
//! Loaded from a TOML file with environment overrides. Priority (highest
//! to lowest):
//! 1. Environment variables
//! 2. Config file
//! 3. Defaults

use crate::scheduler::DailySchedule;
use rma_core::TransitionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RMA_MONITOR_CONFIG";

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// JSON file holding all cases
    pub data_file: PathBuf,
    /// Directory the outbox notifier writes to
    pub outbox_dir: PathBuf,
    /// Recipient of new-case notices and overdue digests
    pub staff_email: String,
    /// Daily scan time, `HH:MM` local time
    pub daily_at: String,
    /// Scan once immediately when the scheduler starts
    pub run_on_start: bool,
    /// Seconds before an unfinished notification claim may be taken over
    pub claim_lease_secs: u64,
    /// Conditional-write attempts per transition
    pub max_conflict_retries: u32,
    /// Emit logs as JSON
    pub json_logs: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let transition = TransitionConfig::default();
        Self {
            data_file: PathBuf::from("./data/rmas.json"),
            outbox_dir: PathBuf::from("./data/outbox"),
            staff_email: "rma-staff@localhost".to_string(),
            daily_at: "08:00".to_string(),
            run_on_start: false,
            claim_lease_secs: transition.claim_lease_secs,
            max_conflict_retries: transition.max_attempts,
            json_logs: false,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist. Without one, `RMA_MONITOR_CONFIG` is
    /// consulted and then `rma-monitor.toml`; a missing default file means
    /// defaults.
    ///
    /// # Errors
    /// `ConfigError` if the file cannot be read or parsed, or the result
    /// fails validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = std::env::var(CONFIG_ENV)
                    .map_or_else(|_| PathBuf::from("rma-monitor.toml"), PathBuf::from);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// `ConfigError::FileRead` or `ConfigError::Parse`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse`
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(email) = std::env::var("RMA_STAFF_EMAIL") {
            self.staff_email = email;
        }
        if let Ok(path) = std::env::var("RMA_DATA_FILE") {
            self.data_file = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("RMA_OUTBOX_DIR") {
            self.outbox_dir = PathBuf::from(dir);
        }
        if let Ok(at) = std::env::var("RMA_DAILY_AT") {
            self.daily_at = at;
        }
    }

    /// Check field values
    ///
    /// # Errors
    /// - `ConfigError::MissingStaffEmail` for a blank staff address
    /// - `ConfigError::InvalidTime` for an unparsable `daily_at`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staff_email.trim().is_empty() {
            return Err(ConfigError::MissingStaffEmail);
        }
        self.schedule()?;
        Ok(())
    }

    /// Parsed daily schedule
    ///
    /// # Errors
    /// `ConfigError::InvalidTime`
    pub fn schedule(&self) -> Result<DailySchedule, ConfigError> {
        DailySchedule::parse(&self.daily_at)
            .ok_or_else(|| ConfigError::InvalidTime(self.daily_at.clone()))
    }

    /// Transition engine settings
    #[must_use]
    pub fn transition(&self) -> TransitionConfig {
        TransitionConfig::new()
            .with_claim_lease_secs(self.claim_lease_secs)
            .with_max_attempts(self.max_conflict_retries)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("staff_email must not be empty")]
    MissingStaffEmail,

    #[error("invalid daily_at '{0}', expected HH:MM")]
    InvalidTime(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.daily_at, "08:00");
        assert_eq!(config.claim_lease_secs, 300);
        assert_eq!(config.max_conflict_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            staff_email = "ops@example.com"
            daily_at = "06:30"
            run_on_start = true
            "#,
        )
        .unwrap();
        assert_eq!(config.staff_email, "ops@example.com");
        assert!(config.run_on_start);
        assert_eq!(config.data_file, PathBuf::from("./data/rmas.json"));
        assert_eq!(
            config.schedule().unwrap().at(),
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_validation_rejects_blank_staff_and_bad_time() {
        let blank = MonitorConfig {
            staff_email: "  ".into(),
            ..MonitorConfig::default()
        };
        assert!(matches!(blank.validate(), Err(ConfigError::MissingStaffEmail)));

        let late = MonitorConfig {
            daily_at: "25:00".into(),
            ..MonitorConfig::default()
        };
        assert!(matches!(late.validate(), Err(ConfigError::InvalidTime(_))));
    }

    #[test]
    fn test_transition_settings() {
        let config = MonitorConfig {
            claim_lease_secs: 60,
            max_conflict_retries: 0,
            ..MonitorConfig::default()
        };
        let transition = config.transition();
        assert_eq!(transition.claim_lease_secs, 60);
        assert_eq!(transition.max_attempts, 1);
    }

    #[test]
    fn test_unknown_file_is_read_error() {
        let err = MonitorConfig::from_file(Path::new("/nonexistent/rma.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
