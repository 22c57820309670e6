//! Runtime configuration from the environment

use crate::prompt::DEFAULT_HISTORY_WINDOW;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveConfig {
    /// SQLite file holding the persisted session
    pub db_path: PathBuf,
    /// Past turns included in each prompt
    pub history_window: usize,
    /// Initial value of the session's audio flag
    pub audio_enabled: bool,
    /// Upper bound on a single backend call
    pub backend_timeout: Duration,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/tmp/.whispers-wave/session.db"),
            history_window: DEFAULT_HISTORY_WINDOW,
            audio_enabled: false,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }
}

impl WaveConfig {
    /// Read `WAVE_DB_PATH`, `WAVE_HISTORY_WINDOW`, `WAVE_AUDIO` and
    /// `WAVE_BACKEND_TIMEOUT_SECS`. Unset variables take their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("WAVE_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.whispers-wave/session.db"))
            },
            PathBuf::from,
        );

        let history_window = match lookup("WAVE_HISTORY_WINDOW") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "WAVE_HISTORY_WINDOW",
                value: raw.clone(),
                reason: "expected a non-negative integer",
            })?,
            None => DEFAULT_HISTORY_WINDOW,
        };

        let audio_enabled = match lookup("WAVE_AUDIO") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                name: "WAVE_AUDIO",
                value: raw.clone(),
                reason: "expected on/off, true/false or 1/0",
            })?,
            None => false,
        };

        let backend_timeout = match lookup("WAVE_BACKEND_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "WAVE_BACKEND_TIMEOUT_SECS",
                        value: raw,
                        reason: "expected a positive number of seconds",
                    })
                }
            },
            None => DEFAULT_BACKEND_TIMEOUT,
        };

        Ok(Self {
            db_path,
            history_window,
            audio_enabled,
            backend_timeout,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
