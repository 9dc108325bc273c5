/// Usage request bodies and hourly response parsing.
///
/// The MeterData page methods take a JavaScript-style object literal as the
/// request body (single-quoted keys and values) rather than strict JSON,
/// and answer with `{ "d": { "Items": [...] } }`. See `fixtures.rs` for
/// annotated examples.

use crate::model::{PortalError, UsagePoint};
use chrono::{LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Date format used in request bodies.
pub const PORTAL_DATE_FORMAT: &str = "%m/%d/%Y";

/// Timestamp format of `UsageHourDate`.
pub const USAGE_HOUR_FORMAT: &str = "%m/%d/%Y %I:%M %p";

/// Interval length requested from GetIntervalData, in minutes.
const HOURLY_INTERVAL: &str = "60";

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// The account and date range a usage request is for.
#[derive(Debug, Clone, Copy)]
pub struct UsageRequest<'a> {
    pub member_number: &'a str,
    pub account_number: &'a str,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl UsageRequest<'_> {
    fn common_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("keymbr", self.member_number.to_string()),
            ("MemberSep", format!("{}-{}", self.member_number, self.account_number)),
            ("StartDate", self.start.format(PORTAL_DATE_FORMAT).to_string()),
            ("EndDate", self.end.format(PORTAL_DATE_FORMAT).to_string()),
        ]
    }

    /// Body for GetDailyUsageData.
    pub fn daily_body(&self) -> String {
        let mut fields = self.common_fields();
        fields.push(("IsEnergy", "false".to_string()));
        fields.push(("IsPPM", "false".to_string()));
        fields.push(("IsCostEnable", "3".to_string()));
        dict_literal(&fields)
    }

    /// Body for GetIntervalData at hourly resolution.
    pub fn hourly_body(&self) -> String {
        let mut fields = self.common_fields();
        fields.push(("IntervalType", HOURLY_INTERVAL.to_string()));
        dict_literal(&fields)
    }
}

/// Renders `{'k': 'v', ...}` with quotes and backslashes escaped.
pub fn dict_literal(fields: &[(&str, String)]) -> String {
    let body = fields
        .iter()
        .map(|(k, v)| format!("'{}': '{}'", escape_single_quoted(k), escape_single_quoted(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

fn escape_single_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct UsageEnvelope {
    d: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(rename = "Items")]
    items: Option<Vec<UsageItem>>,
}

#[derive(Deserialize)]
struct UsageItem {
    #[serde(rename = "UsageHourDate")]
    usage_hour_date: Option<String>,
    #[serde(rename = "KWH")]
    kwh: Option<Value>,
}

/// Parses a GetIntervalData response into usage points in `tz`.
///
/// Shape problems inside individual items are normalized rather than
/// reported: an unusable KWH becomes `0.0`, and an item whose timestamp
/// is missing, malformed, or falls in a DST gap is dropped. A missing
/// `d` or `Items` yields an empty series. On a fall-back day the portal
/// lists the repeated hour twice; the second listing maps to the later
/// instant.
///
/// # Errors
/// `PortalError::Parse` if the body is not JSON at all (an expired
/// session typically answers with the HTML login page).
pub fn parse_hourly_response(json: &str, tz: Tz) -> Result<Vec<UsagePoint>, PortalError> {
    let envelope: UsageEnvelope = serde_json::from_str(json)
        .map_err(|e| PortalError::Parse(format!("interval data is not JSON: {}", e)))?;

    let items = envelope.d.and_then(|d| d.items).unwrap_or_default();

    let mut points = Vec::with_capacity(items.len());
    let mut taken = HashSet::new();
    for item in items {
        let Some(raw_time) = item.usage_hour_date else {
            warn!("Skipping interval item without UsageHourDate");
            continue;
        };

        let naive = match NaiveDateTime::parse_from_str(raw_time.trim(), USAGE_HOUR_FORMAT) {
            Ok(naive) => naive,
            Err(e) => {
                warn!("Skipping interval item with unparseable time '{}': {}", raw_time, e);
                continue;
            }
        };

        let time = match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(first, second) => {
                if taken.contains(&first) {
                    second
                } else {
                    first
                }
            }
            LocalResult::None => {
                warn!("Skipping interval item at nonexistent local time {}", naive);
                continue;
            }
        };
        taken.insert(time);

        points.push(UsagePoint {
            time,
            usage_kwh: normalize_kwh(item.kwh.as_ref()),
        });
    }

    Ok(points)
}

/// Interprets a KWH field, zero-filling anything that is not a usable
/// non-negative number.
pub fn normalize_kwh(raw: Option<&Value>) -> f64 {
    let value = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
