use thiserror::Error;
use tracing::debug;

use crate::capabilities::http::ValidatedUrl;
use crate::form::ValidationPolicy;
use crate::{
    DEFAULT_DISPATCH_BASE_URL, DEFAULT_DISPATCH_PHONE, DEFAULT_REMOTE_TIMEOUT_MS,
    HISTORY_CAPACITY,
};

const MAX_REMOTE_TIMEOUT_MS: u64 = 120_000;
const MAX_HISTORY_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("remote URL is invalid: {0}")]
    InvalidRemoteUrl(String),

    #[error("dispatch phone must contain only digits, got '{0}'")]
    InvalidPhone(String),

    #[error("remote timeout must be between 1 and {max} ms, got {0}", max = MAX_REMOTE_TIMEOUT_MS)]
    TimeoutOutOfRange(u64),

    #[error("history capacity must be between 1 and {max}, got {0}", max = MAX_HISTORY_CAPACITY)]
    HistoryCapacityOutOfRange(usize),
}

/// Remote table API endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
        }
    }
}

/// Messaging deep link the generated message is sent through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub base_url: String,
    pub phone: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DISPATCH_BASE_URL.to_string(),
            phone: DEFAULT_DISPATCH_PHONE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "tripdesk_shared=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub dispatch: DispatchConfig,
    pub validation: ValidationPolicy,
    pub telemetry: TelemetryConfig,
    pub history_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            dispatch: DispatchConfig::default(),
            validation: ValidationPolicy::default(),
            telemetry: TelemetryConfig::default(),
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// | Env Var                        | Default                  |
    /// |--------------------------------|--------------------------|
    /// | `TRIPDESK_REMOTE_URL`          | `http://localhost:54321` |
    /// | `TRIPDESK_REMOTE_KEY`          | empty                    |
    /// | `TRIPDESK_REMOTE_TIMEOUT_MS`   | `15000`                  |
    /// | `TRIPDESK_DISPATCH_PHONE`      | `554991109940`           |
    /// | `TRIPDESK_DISPATCH_BASE_URL`   | `https://wa.me/`         |
    /// | `TRIPDESK_STRICT_STRUCTURE_ID` | `true`                   |
    /// | `TRIPDESK_HISTORY_CAPACITY`    | `50`                     |
    /// | `TRIPDESK_LOG_FILTER`          | `tripdesk_shared=info`   |
    /// | `TRIPDESK_LOG_JSON`            | `false`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!(error = %e, "no .env file loaded");
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from an arbitrary variable source, then validates it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("TRIPDESK_REMOTE_URL") {
            config.remote.base_url = url.trim().to_string();
        }
        if let Some(key) = lookup("TRIPDESK_REMOTE_KEY") {
            config.remote.api_key = key.trim().to_string();
        }
        if let Some(raw) = lookup("TRIPDESK_REMOTE_TIMEOUT_MS") {
            config.remote.timeout_ms = parse_number("TRIPDESK_REMOTE_TIMEOUT_MS", &raw)?;
        }
        if let Some(phone) = lookup("TRIPDESK_DISPATCH_PHONE") {
            config.dispatch.phone = phone.trim().to_string();
        }
        if let Some(base) = lookup("TRIPDESK_DISPATCH_BASE_URL") {
            config.dispatch.base_url = base.trim().to_string();
        }
        if let Some(raw) = lookup("TRIPDESK_STRICT_STRUCTURE_ID") {
            config.validation.strict_structure_id = parse_flag("TRIPDESK_STRICT_STRUCTURE_ID", &raw)?;
        }
        if let Some(raw) = lookup("TRIPDESK_HISTORY_CAPACITY") {
            config.history_capacity = parse_number("TRIPDESK_HISTORY_CAPACITY", &raw)?;
        }
        if let Some(filter) = lookup("TRIPDESK_LOG_FILTER") {
            config.telemetry.default_filter = filter.trim().to_string();
        }
        if let Some(raw) = lookup("TRIPDESK_LOG_JSON") {
            config.telemetry.json = parse_flag("TRIPDESK_LOG_JSON", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.remote.base_url.clone())
            .map_err(|e| ConfigError::InvalidRemoteUrl(e.to_string()))?;
        ValidatedUrl::new(self.dispatch.base_url.clone())
            .map_err(|e| ConfigError::InvalidRemoteUrl(e.to_string()))?;

        if self.dispatch.phone.is_empty() || !self.dispatch.phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidPhone(self.dispatch.phone.clone()));
        }
        if self.remote.timeout_ms == 0 || self.remote.timeout_ms > MAX_REMOTE_TIMEOUT_MS {
            return Err(ConfigError::TimeoutOutOfRange(self.remote.timeout_ms));
        }
        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::HistoryCapacityOutOfRange(self.history_capacity));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        reason: "expected a non-negative integer",
    })
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: "expected true or false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.phone, "554991109940");
        assert_eq!(config.history_capacity, 50);
        assert!(config.validation.strict_structure_id);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TRIPDESK_REMOTE_URL", "https://project.example.co"),
            ("TRIPDESK_REMOTE_KEY", " anon-key "),
            ("TRIPDESK_REMOTE_TIMEOUT_MS", "5000"),
            ("TRIPDESK_DISPATCH_PHONE", "5511999990000"),
            ("TRIPDESK_STRICT_STRUCTURE_ID", "false"),
            ("TRIPDESK_HISTORY_CAPACITY", "20"),
            ("TRIPDESK_LOG_JSON", "1"),
        ]))
        .unwrap();

        assert_eq!(config.remote.base_url, "https://project.example.co");
        assert_eq!(config.remote.api_key, "anon-key");
        assert_eq!(config.remote.timeout_ms, 5000);
        assert_eq!(config.dispatch.phone, "5511999990000");
        assert!(!config.validation.strict_structure_id);
        assert_eq!(config.history_capacity, 20);
        assert!(config.telemetry.json);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("TRIPDESK_REMOTE_TIMEOUT_MS", "soon")])),
            Err(ConfigError::InvalidValue { var: "TRIPDESK_REMOTE_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("TRIPDESK_DISPATCH_PHONE", "+55 49")])),
            Err(ConfigError::InvalidPhone(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("TRIPDESK_REMOTE_URL", "ftp://host")])),
            Err(ConfigError::InvalidRemoteUrl(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("TRIPDESK_HISTORY_CAPACITY", "0")])),
            Err(ConfigError::HistoryCapacityOutOfRange(0))
        ));
    }
}
