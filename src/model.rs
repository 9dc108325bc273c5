/// Shared data types for the usage service.
///
/// Everything that crosses a module boundary lives here: fetched usage
/// points, the statistic rows written to the store, statistic metadata,
/// monitoring state, and the portal error type.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source tag recorded with every statistic this service writes.
pub const DOMAIN: &str = "cfemc_energy";

/// Unit of every usage value and cumulative sum.
pub const KWH_UNIT: &str = "kWh";

// ---------------------------------------------------------------------------
// Usage data
// ---------------------------------------------------------------------------

/// One hourly usage reading as reported by the portal.
///
/// `usage_kwh` is always finite and non-negative; the parser zero-fills
/// anything the portal reports as `"NaN"`, `null`, or omits entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct UsagePoint {
    /// Start of the hour, in the portal's local time zone.
    pub time: DateTime<Tz>,
    pub usage_kwh: f64,
}

impl UsagePoint {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.time.with_timezone(&Utc)
    }
}

/// One row of an external statistic: the hourly value plus the running
/// cumulative sum since an arbitrary epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRow {
    pub start: DateTime<Utc>,
    /// Usage during this hour (kWh).
    pub state: f64,
    /// Cumulative usage up to and including this hour (kWh).
    pub sum: f64,
}

/// Describes the statistic series rows are appended to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    pub statistic_id: String,
    pub name: String,
    pub source: String,
    pub unit_of_measurement: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

impl StatisticMetadata {
    /// Metadata for the energy usage series of a single utility account.
    pub fn for_account(display_name: &str, account_number: &str) -> Self {
        Self {
            statistic_id: statistic_id(account_number),
            name: format!("{} Usage", display_name),
            source: DOMAIN.to_string(),
            unit_of_measurement: KWH_UNIT.to_string(),
            has_mean: false,
            has_sum: true,
        }
    }
}

/// Stable identifier of an account's energy usage statistic,
/// e.g. `cfemc_energy:energy_usage_1234567`.
pub fn statistic_id(account_number: &str) -> String {
    format!("{}:energy_usage_{}", DOMAIN, account_number)
}

// ---------------------------------------------------------------------------
// Monitoring state
// ---------------------------------------------------------------------------

/// Polling health for one statistic, persisted so it survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub last_poll_attempted: Option<DateTime<Utc>>,
    pub last_successful_update: Option<DateTime<Utc>>,
    /// Total usage of the most recent day fetched (kWh).
    pub yesterday_total_kwh: Option<f64>,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures talking to the utility's customer portal.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The login page no longer carries the hidden form fields we replay.
    #[error("login form field `{0}` not found; the login page structure may have changed")]
    LoginFormChanged(&'static str),

    /// The portal accepted the post but did not echo the username back.
    #[error("login failed, please check credentials")]
    InvalidCredentials,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
    },

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl PortalError {
    /// Authentication failures will not fix themselves by retrying another date.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            PortalError::LoginFormChanged(_) | PortalError::InvalidCredentials
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_statistic_id_format() {
        assert_eq!(statistic_id("1234567"), "cfemc_energy:energy_usage_1234567");
    }

    #[test]
    fn test_metadata_for_account() {
        let meta = StatisticMetadata::for_account("CF-EMC Energy", "42");
        assert_eq!(meta.statistic_id, "cfemc_energy:energy_usage_42");
        assert_eq!(meta.name, "CF-EMC Energy Usage");
        assert_eq!(meta.unit_of_measurement, "kWh");
        assert!(meta.has_sum);
        assert!(!meta.has_mean);
    }

    #[test]
    fn test_usage_point_start_utc() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let point = UsagePoint {
            time: tz.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            usage_kwh: 1.5,
        };
        assert_eq!(
            point.start_utc(),
            Utc.with_ymd_and_hms(2024, 7, 1, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_auth_error_classification() {
        assert!(PortalError::InvalidCredentials.is_auth());
        assert!(PortalError::LoginFormChanged("__VIEWSTATE").is_auth());
        assert!(!PortalError::Parse("bad".into()).is_auth());
        let server_error = PortalError::HttpStatus {
            url: "x".into(),
            status: 500,
        };
        assert!(!server_error.is_auth());
    }
}
