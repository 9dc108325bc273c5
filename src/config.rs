/// Service configuration loader - parses kwhmon.toml
///
/// Keeps portal credentials, account identifiers and polling knobs out of
/// the code. Credentials may also come from the environment (or a `.env`
/// file) so the TOML file can be committed without secrets.

use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "kwhmon.toml";
pub const DEFAULT_NAME: &str = "CF-EMC Energy";
pub const DEFAULT_BACKFILL_DAYS: u32 = 7;
pub const DEFAULT_POLL_INTERVAL_MINUTES: u64 = 24 * 60;
pub const DEFAULT_TIME_ZONE: &str = "America/New_York";
pub const DEFAULT_PORTAL_BASE_URL: &str = "https://billing.utility.org/onlineportal";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest accepted poll interval: one year.
pub const MAX_POLL_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

pub const ENV_USERNAME: &str = "KWHMON_USERNAME";
pub const ENV_PASSWORD: &str = "KWHMON_PASSWORD";

/// Service settings loaded from kwhmon.toml.
#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
    /// Display name, used for the statistic name.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    // Account identifiers; both appear in every usage request.
    #[serde(deserialize_with = "string_or_number")]
    pub member_number: String,
    #[serde(deserialize_with = "string_or_number")]
    pub account_number: String,

    /// Trailing lookback window, in days, checked for gaps every cycle.
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,

    /// IANA zone the portal reports its hour timestamps in.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    #[serde(default = "default_portal_base_url")]
    pub portal_base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_backfill_days() -> u32 {
    DEFAULT_BACKFILL_DAYS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MINUTES
}

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_portal_base_url() -> String {
    DEFAULT_PORTAL_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Account numbers are often written unquoted in TOML; accept both forms.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("member_number", &self.member_number)
            .field("account_number", &self.account_number)
            .field("backfill_days", &self.backfill_days)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("time_zone", &self.time_zone)
            .field("portal_base_url", &self.portal_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}\n\n  Copy kwhmon.example.toml to {path} and fill in your portal account")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("`{0}` is required (set it in the config file or via {1})")]
    Missing(&'static str, &'static str),

    #[error("`{field}` is invalid: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    #[error("unknown time zone `{0}` (expected an IANA name such as America/New_York)")]
    UnknownTimeZone(String),
}

impl ServiceConfig {
    /// Parses configuration text without consulting the environment.
    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Fills empty credentials from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|v| !v.is_empty()) {
            self.password = password;
        }
    }

    /// Checks required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username", ENV_USERNAME));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password", ENV_PASSWORD));
        }
        if self.member_number.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "member_number",
                reason: "must not be empty".to_string(),
            });
        }
        if self.account_number.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "account_number",
                reason: "must not be empty".to_string(),
            });
        }
        if self.backfill_days == 0 {
            return Err(ConfigError::Invalid {
                field: "backfill_days",
                reason: "must be a positive number of days".to_string(),
            });
        }
        if self.poll_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_minutes",
                reason: "must be at least one minute".to_string(),
            });
        }
        if self.poll_interval_minutes > MAX_POLL_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid {
                field: "poll_interval_minutes",
                reason: format!("must be at most {} (one year)", MAX_POLL_INTERVAL_MINUTES),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        let url = &self.portal_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field: "portal_base_url",
                reason: format!("`{}` is not an http(s) URL", self.portal_base_url),
            });
        }
        self.tz()?;
        Ok(())
    }

    /// The portal's time zone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimeZone(self.time_zone.clone()))
    }
}

/// Loads, overrides from the environment, and validates the configuration.
///
/// A `.env` file in the working directory is loaded first if present.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    dotenv::dotenv().ok();

    let origin = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: origin.clone(),
        source,
    })?;

    let mut config = ServiceConfig::from_toml_str(&contents, &origin)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
