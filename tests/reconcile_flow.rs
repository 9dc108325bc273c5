/// Integration tests for a full polling cycle against a fake portal
///
/// A mockito server plays the customer portal (login form, usage page,
/// daily and hourly page methods); statistics go to the in-memory store.
/// Verifies that:
/// 1. Missing days in the lookback window are requested one by one
/// 2. A failing date does not stop later dates
/// 3. A gap filled on a later cycle lifts every later sum
/// 4. Monitoring state reflects the outcome of each cycle
///
/// Run with: cargo test --test reconcile_flow

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use kwhmon_service::daemon::{lock_status, Daemon, DaemonConfig};
use kwhmon_service::model::{statistic_id, StatisticMetadata};
use kwhmon_service::portal::{PortalClient, PortalEndpoints};
use kwhmon_service::store::MemoryStore;
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const HOURLY_PATH: &str =
    "/onlineportal/DesktopModules/MeterUsage/API/MeterData.aspx/GetIntervalData";
const DAILY_PATH: &str =
    "/onlineportal/DesktopModules/MeterUsage/API/MeterData.aspx/GetDailyUsageData";

const LOGIN_PAGE: &str = r#"<html><body><form method="post">
<input type="hidden" name="__VIEWSTATE" value="vs-1" />
<input type="hidden" name="__VIEWSTATEGENERATOR" value="CA0B0334" />
<input type="hidden" name="__EVENTVALIDATION" value="ev-1" />
<input name="__RequestVerificationToken" type="hidden" value="tok-1" />
</form></body></html>"#;

/// Login and priming pages. The login POST mock comes last.
fn mock_login(server: &mut ServerGuard, logins: usize) -> Vec<Mock> {
    vec![
        server
            .mock("GET", "/onlineportal/Customer-Login")
            .with_status(200)
            .with_header("set-cookie", "ASP.NET_SessionId=s1; path=/")
            .with_body(LOGIN_PAGE)
            .create(),
        server
            .mock("GET", "/onlineportal/My-Account/Usage-History")
            .with_status(200)
            .create(),
        server
            .mock("POST", DAILY_PATH)
            .with_status(200)
            .with_body(r#"{"d":{"Items":[]}}"#)
            .create(),
        server
            .mock("POST", "/onlineportal/Customer-Login")
            .match_body(Matcher::UrlEncoded("__VIEWSTATE".into(), "vs-1".into()))
            .with_status(200)
            .with_body("<span class=\"welcome\">Welcome, jdoe</span>")
            .expect(logins)
            .create(),
    ]
}

/// Hourly mock answering only for `day`.
fn mock_hourly(server: &mut ServerGuard, day: &str, items: &str) -> Mock {
    server
        .mock("POST", HOURLY_PATH)
        .match_body(Matcher::Regex(format!("'StartDate': '{}'", day)))
        .with_status(200)
        .with_body(format!(r#"{{"d":{{"Items":[{}]}}}}"#, items))
        .create()
}

fn daemon_for(server: &ServerGuard, days: u32) -> Daemon<PortalClient, MemoryStore> {
    let tz = chrono_tz::America::New_York;
    let portal = PortalClient::new(
        "jdoe",
        "s3cret",
        "1001",
        "2002",
        tz,
        PortalEndpoints::from_base(&format!("{}/onlineportal", server.url())),
        Duration::from_secs(5),
    )
    .unwrap();

    Daemon::new(
        DaemonConfig {
            backfill_days: days,
            time_zone: tz,
            ..Default::default()
        },
        StatisticMetadata::for_account("CF-EMC Energy", "2002"),
        portal,
        MemoryStore::new(),
    )
}

/// Noon in New York on 07/08/2024; yesterday is 07/07.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 8, 16, 0, 0).unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
}

fn sums(daemon: &Daemon<PortalClient, MemoryStore>) -> Vec<f64> {
    daemon
        .store()
        .rows(&statistic_id("2002"))
        .iter()
        .map(|r| r.sum)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_cycle_backfills_window_and_survives_failing_date() {
    let mut server = Server::new();
    // 07/06 fails, which drops the session; 07/07 signs in again
    let portal = mock_login(&mut server, 2);
    let _first = mock_hourly(
        &mut server,
        "07/05/2024",
        r#"{"UsageHourDate":"07/05/2024 12:00 AM","KWH":1.0},
           {"UsageHourDate":"07/05/2024 01:00 AM","KWH":"2.5"}"#,
    );
    let failing = server
        .mock("POST", HOURLY_PATH)
        .match_body(Matcher::Regex("'StartDate': '07/06/2024'".into()))
        .with_status(503)
        .create();
    let _last = mock_hourly(
        &mut server,
        "07/07/2024",
        r#"{"UsageHourDate":"07/07/2024 02:00 AM","KWH":1.5},
           {"UsageHourDate":"07/07/2024 12:00 AM","KWH":0.5},
           {"UsageHourDate":"07/07/2024 01:00 AM","KWH":"NaN"}"#,
    );

    let mut daemon = daemon_for(&server, 3);
    let report = daemon.run_cycle(now()).unwrap();

    assert_eq!(report.days_checked, 3);
    assert_eq!(report.missing, vec![date(5), date(6), date(7)]);
    assert_eq!(report.fetched, vec![date(5), date(7)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, date(6));
    assert_eq!(report.rows_written, 5);
    assert_eq!(sums(&daemon), vec![1.0, 3.5, 4.0, 4.0, 5.5]);

    {
        let status = daemon.status();
        let status = lock_status(&status);
        assert_eq!(status.state.consecutive_failures, 0);
        assert_eq!(status.state.yesterday_total_kwh, Some(2.0));
    }

    if let Some(login) = portal.last() {
        login.assert();
    }
    failing.assert();

    // Next cycle: the portal has 07/06 now
    failing.remove();
    let _gap = mock_hourly(
        &mut server,
        "07/06/2024",
        r#"{"UsageHourDate":"07/06/2024 05:00 AM","KWH":3.0}"#,
    );

    let report = daemon.run_cycle(now()).unwrap();
    assert_eq!(report.missing, vec![date(6)]);
    assert_eq!(report.fetched, vec![date(6)]);
    assert_eq!(sums(&daemon), vec![1.0, 3.5, 6.5, 7.0, 7.0, 8.5]);

    let status = daemon.status();
    assert_eq!(lock_status(&status).state.yesterday_total_kwh, Some(2.0));
}

#[test]
fn test_rejected_login_fails_cycle_and_counts_failures() {
    let mut server = Server::new();
    let _page = server
        .mock("GET", "/onlineportal/Customer-Login")
        .with_status(200)
        .with_body(LOGIN_PAGE)
        .create();
    let _rejected = server
        .mock("POST", "/onlineportal/Customer-Login")
        .with_status(200)
        .with_body("<span class=\"error\">Invalid username or password.</span>")
        .create();
    let hourly = server.mock("POST", HOURLY_PATH).expect(0).create();

    let mut daemon = daemon_for(&server, 7);
    assert!(daemon.run_cycle(now()).is_err());
    assert!(daemon.run_cycle(now()).is_err());

    let status = daemon.status();
    let status = lock_status(&status);
    assert_eq!(status.state.consecutive_failures, 2);
    assert!(status.state.last_error.as_deref().unwrap().contains("credentials"));
    assert_eq!(status.state.last_poll_attempted, Some(now()));
    assert!(sums(&daemon).is_empty());

    hourly.assert();
}

#[test]
fn test_unreachable_portal_fails_cycle() {
    let mut server = Server::new();
    let _down = server
        .mock("GET", "/onlineportal/Customer-Login")
        .with_status(502)
        .create();

    let mut daemon = daemon_for(&server, 2);
    let err = daemon.run_cycle(now()).unwrap_err();
    assert!(err.to_string().contains("502"));

    let status = daemon.status();
    assert_eq!(lock_status(&status).state.consecutive_failures, 1);
}
