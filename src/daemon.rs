/// Core daemon implementation for the usage polling service
///
/// This module implements the main daemon loop that:
/// 1. Restores monitoring state from the store on startup
/// 2. Starts every cycle with a fresh portal session
/// 3. Reconciles the trailing window of days, backfilling gaps
/// 4. Records success or failure in the monitoring state
/// 5. Sleeps out the rest of the poll interval

use crate::model::{MonitoringState, StatisticMetadata};
use crate::portal::UsageSource;
use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler};
use crate::store::{StatisticsStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// How often to reconcile (default: once a day; the portal publishes
    /// a day's hourly data some time after midnight)
    pub poll_interval_minutes: u64,

    /// How many trailing days to check for gaps (default: 7)
    pub backfill_days: u32,

    /// Zone the portal reports in; "yesterday" is computed here
    pub time_zone: Tz,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 1440,
            backfill_days: 7,
            time_zone: chrono_tz::America::New_York,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared status
// ---------------------------------------------------------------------------

/// What the status endpoint reports; written by the daemon thread only.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub statistic_id: String,
    pub name: String,
    #[serde(flatten)]
    pub state: MonitoringState,
}

pub type SharedStatus = Arc<Mutex<ServiceStatus>>;

/// Locks the shared status, recovering the data if a writer panicked.
pub fn lock_status(status: &Mutex<ServiceStatus>) -> MutexGuard<'_, ServiceStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cycle did not complete; retried on the next tick.
#[derive(Debug, Error)]
#[error("update failed: {0}")]
pub struct UpdateFailed(#[from] pub ReconcileError);

// ---------------------------------------------------------------------------
// Daemon State
// ---------------------------------------------------------------------------

/// Main daemon state
pub struct Daemon<U, S> {
    config: DaemonConfig,
    reconciler: Reconciler,
    source: U,
    store: S,
    status: SharedStatus,
}

impl<U: UsageSource, S: StatisticsStore> Daemon<U, S> {
    pub fn new(config: DaemonConfig, metadata: StatisticMetadata, source: U, store: S) -> Self {
        let status = ServiceStatus {
            statistic_id: metadata.statistic_id.clone(),
            name: metadata.name.clone(),
            state: MonitoringState::default(),
        };
        let reconciler = Reconciler::new(metadata, config.backfill_days, config.time_zone);

        Self {
            config,
            reconciler,
            source,
            store,
            status: Arc::new(Mutex::new(status)),
        }
    }

    /// Restore monitoring state persisted by a previous run.
    pub fn initialize(&mut self) -> Result<(), StoreError> {
        let id = self.reconciler.statistic_id().to_string();

        if let Some(state) = self.store.load_monitoring_state(&id)? {
            info!(
                "✓ Restored monitoring state (last success: {}, failures: {})",
                state
                    .last_successful_update
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
                state.consecutive_failures
            );
            lock_status(&self.status).state = state;
        }

        match self.store.last_statistic(&id)? {
            Some(row) => info!("   Most recent statistic: {} (sum {:.3} kWh)", row.start, row.sum),
            None => info!("   No statistics recorded yet for {}", id),
        }

        Ok(())
    }

    /// Handle for the status endpoint thread.
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Local calendar date of `now` in the portal's zone.
    pub fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.config.time_zone).date_naive()
    }

    /// Run one reconciliation cycle as of `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<ReconcileReport, UpdateFailed> {
        // A session lives for one cycle
        self.source.end_session();

        let today = self.local_today(now);
        let outcome = self.reconciler.run(&mut self.source, &mut self.store, today);

        let state = {
            let mut status = lock_status(&self.status);
            let state = &mut status.state;
            state.last_poll_attempted = Some(now);

            match &outcome {
                Ok(report) => {
                    state.consecutive_failures = 0;
                    state.last_error = None;
                    // Only new hourly data counts as an update
                    if !report.fetched.is_empty() {
                        state.last_successful_update = Some(now);
                    }
                    // Backfilling an older gap leaves yesterday's figure alone
                    if let Some((day, total)) = report.latest_day_total {
                        if today.pred_opt() == Some(day) {
                            state.yesterday_total_kwh = Some(total);
                        }
                    }
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    state.last_error = Some(e.to_string());
                }
            }
            state.clone()
        };

        if let Err(e) = self
            .store
            .save_monitoring_state(self.reconciler.statistic_id(), &state)
        {
            warn!("⚠️  Failed to persist monitoring state: {}", e);
        }

        if let Err(e) = &outcome {
            error!(
                "✗ Update failed ({} consecutive): {}",
                state.consecutive_failures, e
            );
        }

        outcome.map_err(UpdateFailed::from)
    }

    /// Single cycle for cron-style use.
    pub fn run_once(&mut self) -> Result<ReconcileReport, UpdateFailed> {
        self.run_cycle(Utc::now())
    }

    /// Main daemon loop (runs indefinitely)
    pub fn run(&mut self) {
        info!("🚀 Starting daemon loop...");
        info!("   Poll interval: {} minutes", self.config.poll_interval_minutes);
        info!("   Lookback window: {} days", self.config.backfill_days);

        loop {
            let start = Utc::now();

            // Failures are logged and recorded inside; the next tick retries
            if let Ok(report) = self.run_cycle(start) {
                info!(
                    "✓ Cycle complete: {} of {} days missing, {} backfilled, {} rows written",
                    report.missing.len(),
                    report.days_checked,
                    report.fetched.len(),
                    report.rows_written
                );
            }

            // Sleep until next poll interval
            let elapsed = (Utc::now() - start).num_seconds().max(0) as u64;
            let sleep_seconds = self
                .config
                .poll_interval_minutes
                .saturating_mul(60)
                .saturating_sub(elapsed);

            if sleep_seconds > 0 {
                std::thread::sleep(std::time::Duration::from_secs(sleep_seconds));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortalError, UsagePoint};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    /// Returns the same canned hours for every date, or fails.
    struct StubSource {
        usages: Vec<f64>,
        fail: bool,
        sessions_ended: usize,
        tz: Tz,
    }

    impl StubSource {
        fn new(usages: &[f64]) -> Self {
            Self {
                usages: usages.to_vec(),
                fail: false,
                sessions_ended: 0,
                tz: chrono_tz::America::New_York,
            }
        }
    }

    impl UsageSource for StubSource {
        fn fetch_hourly(&mut self, date: NaiveDate) -> Result<Vec<UsagePoint>, PortalError> {
            if self.fail {
                return Err(PortalError::HttpStatus {
                    url: "GetIntervalData".into(),
                    status: 503,
                });
            }
            Ok(self
                .usages
                .iter()
                .enumerate()
                .map(|(h, usage)| UsagePoint {
                    time: self
                        .tz
                        .from_local_datetime(&date.and_hms_opt(h as u32, 0, 0).unwrap())
                        .earliest()
                        .unwrap(),
                    usage_kwh: *usage,
                })
                .collect())
        }

        fn end_session(&mut self) {
            self.sessions_ended += 1;
        }
    }

    fn config(days: u32) -> DaemonConfig {
        DaemonConfig {
            backfill_days: days,
            ..Default::default()
        }
    }

    fn daemon(source: StubSource, days: u32) -> Daemon<StubSource, MemoryStore> {
        Daemon::new(
            config(days),
            StatisticMetadata::for_account("Test", "2002"),
            source,
            MemoryStore::new(),
        )
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 8, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.poll_interval_minutes, 1440);
        assert_eq!(config.backfill_days, 7);
        assert_eq!(config.time_zone, chrono_tz::America::New_York);
    }

    #[test]
    fn test_local_today_uses_portal_zone() {
        let d = daemon(StubSource::new(&[]), 1);
        // 02:00 UTC is still the previous evening in New York
        let late = Utc.with_ymd_and_hms(2024, 7, 9, 2, 0, 0).unwrap();
        assert_eq!(d.local_today(late), NaiveDate::from_ymd_opt(2024, 7, 8).unwrap());
    }

    #[test]
    fn test_successful_cycle_records_yesterday_total() {
        let mut d = daemon(StubSource::new(&[1.25, 0.75, 2.0]), 2);

        let report = d.run_cycle(noon()).unwrap();
        assert_eq!(report.fetched.len(), 2);
        assert_eq!(d.source.sessions_ended, 1);

        let status = d.status();
        let status = lock_status(&status);
        assert_eq!(status.state.consecutive_failures, 0);
        assert_eq!(status.state.yesterday_total_kwh, Some(4.0));
        assert_eq!(status.state.last_successful_update, Some(noon()));
        assert_eq!(status.state.last_poll_attempted, Some(noon()));
    }

    #[test]
    fn test_failures_accumulate_then_reset() {
        let mut d = daemon(StubSource::new(&[1.0]), 1);
        d.source.fail = true;

        assert!(d.run_cycle(noon()).is_err());
        assert!(d.run_cycle(noon()).is_err());
        {
            let status = d.status();
            let status = lock_status(&status);
            assert_eq!(status.state.consecutive_failures, 2);
            assert!(status.state.last_error.as_deref().unwrap().contains("503"));
            assert_eq!(status.state.last_successful_update, None);
        }

        d.source.fail = false;
        d.run_cycle(noon()).unwrap();
        let status = d.status();
        let status = lock_status(&status);
        assert_eq!(status.state.consecutive_failures, 0);
        assert_eq!(status.state.last_error, None);
        assert_eq!(d.source.sessions_ended, 3);
    }

    #[test]
    fn test_up_to_date_cycle_keeps_previous_total() {
        let mut d = daemon(StubSource::new(&[3.0]), 1);
        d.run_cycle(noon()).unwrap();

        let later = noon() + chrono::Duration::hours(1);
        let report = d.run_cycle(later).unwrap();
        assert!(report.missing.is_empty());

        let status = d.status();
        let status = lock_status(&status);
        assert_eq!(status.state.yesterday_total_kwh, Some(3.0));
        assert_eq!(status.state.last_successful_update, Some(noon()));
        assert_eq!(status.state.last_poll_attempted, Some(later));
    }

    #[test]
    fn test_cycle_with_no_data_yet_is_not_an_update() {
        let mut d = daemon(StubSource::new(&[]), 2);

        let report = d.run_cycle(noon()).unwrap();
        assert!(report.fetched.is_empty());
        assert_eq!(report.empty.len(), 2);

        let status = d.status();
        let status = lock_status(&status);
        assert_eq!(status.state.consecutive_failures, 0);
        assert_eq!(status.state.last_successful_update, None);
        assert_eq!(status.state.yesterday_total_kwh, None);
        assert_eq!(status.state.last_poll_attempted, Some(noon()));
    }

    #[test]
    fn test_state_survives_restart() {
        let mut first = daemon(StubSource::new(&[2.5]), 1);
        first.run_cycle(noon()).unwrap();
        let Daemon { store, .. } = first;

        let mut second = Daemon::new(
            config(1),
            StatisticMetadata::for_account("Test", "2002"),
            StubSource::new(&[]),
            store,
        );
        second.initialize().unwrap();

        let status = second.status();
        let status = lock_status(&status);
        assert_eq!(status.state.yesterday_total_kwh, Some(2.5));
        assert_eq!(status.state.last_successful_update, Some(noon()));
    }
}
