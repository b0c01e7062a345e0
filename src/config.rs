//! Bot configuration
//!
//! Loaded from a YAML file (every field optional), then overridden from the
//! environment, then validated.

use crate::error::{ModerationError, ModerationResult};
use crate::grant::MAX_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "WARDEN_CONFIG";
/// Config file used when `WARDEN_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/warden.yaml";

pub const SUBJECTS_FILE: &str = "subjects.yaml";
pub const GRANTS_FILE: &str = "grants.yaml";
pub const POLICY_FILE: &str = "access_policy.yaml";

/// Longest timeout history window, about a century
pub const MAX_HISTORY_WINDOW_DAYS: i64 = 36_500;

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Directory holding the YAML snapshots
    pub data_dir: PathBuf,
    /// Directory for the rolling JSON log
    pub log_dir: PathBuf,
    /// Role handed out by `/mute`
    pub mute_role_id: Option<u64>,
    /// Channel that receives moderation notices
    pub log_channel_id: Option<u64>,
    /// Blacklist warnings before the automatic timeout
    pub warning_threshold: u32,
    pub auto_timeout_secs: u64,
    /// How often overdue grants are swept up
    pub sweep_interval_secs: u64,
    /// How far back `/userinfo` counts timeouts
    pub history_window_days: i64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            mute_role_id: None,
            log_channel_id: None,
            warning_threshold: 3,
            auto_timeout_secs: 259_200,
            sweep_interval_secs: 60,
            history_window_days: 30,
        }
    }
}

impl BotConfig {
    /// Load the config named by `WARDEN_CONFIG`, apply environment overrides and validate.
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be parsed, an override is malformed,
    /// or a value is out of range.
    pub fn load() -> ModerationResult<Self> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns `Config` if the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> ModerationResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content)
                .map_err(|e| ModerationError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ModerationError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Parse YAML. An empty document yields the defaults.
    ///
    /// # Errors
    /// Returns `Config` if the YAML is malformed.
    pub fn from_yaml(content: &str) -> ModerationResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| ModerationError::Config(e.to_string()))
    }

    /// Apply `WARDEN_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns `Config` if an ID override is not a number.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ModerationResult<()> {
        if let Some(dir) = lookup("WARDEN_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("WARDEN_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(id) = lookup("WARDEN_MUTE_ROLE_ID") {
            self.mute_role_id = Some(parse_id("WARDEN_MUTE_ROLE_ID", &id)?);
        }
        if let Some(id) = lookup("WARDEN_LOG_CHANNEL_ID") {
            self.log_channel_id = Some(parse_id("WARDEN_LOG_CHANNEL_ID", &id)?);
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Config` describing the first out-of-range value.
    pub fn validate(&self) -> ModerationResult<()> {
        if self.warning_threshold == 0 {
            return Err(ModerationError::Config(
                "warning_threshold must be at least 1".to_string(),
            ));
        }
        if self.auto_timeout_secs == 0 || self.auto_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ModerationError::Config(format!(
                "auto_timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ModerationError::Config(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_HISTORY_WINDOW_DAYS).contains(&self.history_window_days) {
            return Err(ModerationError::Config(format!(
                "history_window_days must be between 1 and {MAX_HISTORY_WINDOW_DAYS}"
            )));
        }
        if self.mute_role_id == Some(0) || self.log_channel_id == Some(0) {
            return Err(ModerationError::Config("IDs must be non-zero".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn subjects_path(&self) -> PathBuf {
        self.data_dir.join(SUBJECTS_FILE)
    }

    #[must_use]
    pub fn grants_path(&self) -> PathBuf {
        self.data_dir.join(GRANTS_FILE)
    }

    #[must_use]
    pub fn policy_path(&self) -> PathBuf {
        self.data_dir.join(POLICY_FILE)
    }

    #[must_use]
    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_window_days)
    }
}

fn parse_id(key: &str, value: &str) -> ModerationResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ModerationError::Config(format!("{key} must be a numeric ID, got `{value}`")))
}

/// Read the bot token.
///
/// # Errors
/// Returns `Config` if `DISCORD_TOKEN` is unset or empty.
pub fn discord_token() -> ModerationResult<String> {
    env::var("DISCORD_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| ModerationError::Config("DISCORD_TOKEN must be set".to_string()))
}
