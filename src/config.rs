//! Worker settings
//!
//! Stored in `<config dir>/patchpilot/config.json`. Environment variables take
//! precedence over the file, and every field has a default so a missing file
//! is fine. Settings are built once at startup and handed to each component.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default OpenRouter model for analysis
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid number in {var}: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Backoff policy for the per-file AI call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Wait used when the rate-limit signal mentions quota
    pub quota_backoff_secs: u64,
    /// Wait used for any other rate-limit signal
    pub rate_limit_backoff_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quota_backoff_secs: 60,
            rate_limit_backoff_secs: 30,
        }
    }
}

impl RetrySettings {
    pub fn quota_backoff(&self) -> Duration {
        Duration::from_secs(self.quota_backoff_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parent directory for transient workspaces
    pub clone_dir: PathBuf,
    pub database_path: PathBuf,
    /// Files larger than this many bytes are never sent for analysis
    pub max_file_size: u64,
    pub max_files_per_repo: usize,
    pub model: String,
    pub openrouter_api_key: Option<String>,
    pub github_token: Option<String>,
    pub log_level: String,
    pub retry: RetrySettings,
    /// Hard wall-clock limit for one audit
    pub time_limit_secs: u64,
    /// Warning threshold, logged to the audit trail
    pub soft_time_limit_secs: u64,
    /// Ask the AI service to confirm each fix before applying it
    pub validate_fixes: bool,
    /// Run the dedicated secret scan on every analyzed file
    pub scan_secrets: bool,
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clone_dir: std::env::temp_dir().join("patchpilot-clones"),
            database_path: default_data_dir().join("audits.db"),
            max_file_size: 1_048_576,
            max_files_per_repo: 100,
            model: DEFAULT_MODEL.to_string(),
            openrouter_api_key: None,
            github_token: None,
            log_level: "info".to_string(),
            retry: RetrySettings::default(),
            time_limit_secs: 3600,
            soft_time_limit_secs: 3000,
            validate_fixes: false,
            scan_secrets: false,
            poll_interval_secs: 5,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("patchpilot")
}

impl Settings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("patchpilot"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load the config file (or defaults), then apply environment overrides.
    /// Also returns a notice when a corrupt file had to be set aside; the
    /// caller logs it once tracing is up.
    pub fn load() -> Result<(Self, Option<String>), ConfigError> {
        let (mut settings, notice) = match Self::config_path() {
            Some(path) => Self::load_file(&path),
            None => (Self::default(), None),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok((settings, notice))
    }

    /// Read settings from a JSON file. A corrupt file is moved aside and
    /// defaults are used, with a notice describing what happened.
    pub fn load_file(path: &Path) -> (Self, Option<String>) {
        let Ok(content) = fs::read_to_string(path) else {
            return (Self::default(), None);
        };
        match serde_json::from_str(&content) {
            Ok(settings) => (settings, None),
            Err(err) => {
                preserve_corrupt_config(path, &content);
                let notice = format!(
                    "Config file {} was corrupted ({}). \
                     A backup was saved and defaults were loaded.",
                    path.display(),
                    err
                );
                (Self::default(), Some(notice))
            }
        }
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.openrouter_api_key = Some(key);
        }
        if let Some(model) = get("PATCHPILOT_MODEL") {
            self.model = model;
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.github_token = Some(token);
        }
        if let Some(dir) = get("PATCHPILOT_CLONE_DIR") {
            self.clone_dir = PathBuf::from(dir);
        }
        if let Some(db) = get("PATCHPILOT_DATABASE") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(level) = get("PATCHPILOT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(value) = get("PATCHPILOT_MAX_FILE_SIZE") {
            self.max_file_size = parse_number("PATCHPILOT_MAX_FILE_SIZE", &value)?;
        }
        if let Some(value) = get("PATCHPILOT_MAX_FILES_PER_REPO") {
            self.max_files_per_repo = parse_number("PATCHPILOT_MAX_FILES_PER_REPO", &value)?;
        }
        Ok(())
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(path, &content)?;
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // The file may hold API tokens
        if let Err(e) = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!("Failed to set config file permissions: {}", e);
        }
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
