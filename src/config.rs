//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Log output format for the binary's subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Application configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
    /// Directory for daily-rotated log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Default number of history entries to list.
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/tenfold.db"),
            log_format: LogFormat::Text,
            log_dir: None,
            history_limit: 20,
        }
    }
}

impl AppConfig {
    /// Build config from `TENFOLD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys take defaults;
    /// set keys that fail to parse are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("TENFOLD_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let log_format = match lookup("TENFOLD_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "TENFOLD_LOG_FORMAT".to_string(),
                message,
            })?,
            None => defaults.log_format,
        };

        let log_dir = lookup("TENFOLD_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let history_limit = match lookup("TENFOLD_HISTORY_LIMIT") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "TENFOLD_HISTORY_LIMIT".to_string(),
                        message: format!("expected a positive integer, got '{raw}'"),
                    });
                }
            },
            None => defaults.history_limit,
        };

        Ok(Self {
            db_path,
            log_format,
            log_dir,
            history_limit,
        })
    }
}
