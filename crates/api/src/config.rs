//! Relay configuration
//!
//! Built once at startup from the environment and shared read-only with the
//! forwarder and the attribution store.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::extractor::MessageTokens;

pub const DEFAULT_API_BASE: &str = "https://chatter.salebot.pro";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_PATH: &str = "utm_metrics.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    /// SaleBot API key; part of the callback URL path
    pub salebot_api_key: String,
    pub salebot_api_base: String,
    pub salebot_api_timeout_secs: u64,
    pub database_path: PathBuf,
    pub bind_address: String,
    pub message_tokens: MessageTokens,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let salebot_api_key = lookup("SALEBOT_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("SALEBOT_API_KEY"))?;

        let salebot_api_timeout_secs = match lookup("SALEBOT_API_TIMEOUT") {
            None => DEFAULT_TIMEOUT_SECS,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SALEBOT_API_TIMEOUT",
                        value: raw,
                    })
                }
            },
        };

        let defaults = MessageTokens::default();
        let message_tokens = MessageTokens {
            new_payment_suffix: lookup("RELAY_NEW_PAYMENT_SUFFIX")
                .unwrap_or(defaults.new_payment_suffix),
            recurring_message: lookup("RELAY_RECURRING_MESSAGE")
                .unwrap_or(defaults.recurring_message),
        };

        Ok(Self {
            salebot_api_key,
            salebot_api_base: lookup("SALEBOT_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            salebot_api_timeout_secs,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            bind_address: lookup("BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            message_tokens,
        })
    }

    /// SaleBot Chatter callback endpoint
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/{}/callback",
            self.salebot_api_base.trim_end_matches('/'),
            self.salebot_api_key
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.salebot_api_timeout_secs)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("salebot_api_key", &"<redacted>")
            .field("salebot_api_base", &self.salebot_api_base)
            .field("salebot_api_timeout_secs", &self.salebot_api_timeout_secs)
            .field("database_path", &self.database_path)
            .field("bind_address", &self.bind_address)
            .field("message_tokens", &self.message_tokens)
            .finish()
    }
}
