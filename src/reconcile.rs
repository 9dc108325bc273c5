/// Gap detection and backfill of the hourly usage statistic.
///
/// Each cycle looks at a trailing window of local days ending yesterday.
/// A day counts as present only if its day-end cumulative sum is strictly
/// greater than the previous day's; every other day is re-fetched from
/// the portal, one date at a time, and appended with a running sum seeded
/// from the cumulative value at that day's midnight.
///
/// A day of genuinely zero usage is indistinguishable from a missing day
/// under this rule and will be re-fetched while it stays inside the window.

use crate::model::{PortalError, StatisticMetadata, StatisticRow, UsagePoint};
use crate::portal::UsageSource;
use crate::store::{StatisticsStore, StoreError};
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Whether a day already has usage recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Present,
    Missing,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub days_checked: usize,
    pub missing: Vec<NaiveDate>,
    pub fetched: Vec<NaiveDate>,
    /// Dates the portal answered for but had no readings yet.
    pub empty: Vec<NaiveDate>,
    pub failed: Vec<(NaiveDate, String)>,
    pub rows_written: usize,
    /// Total usage of the newest day fetched in this pass.
    pub latest_day_total: Option<(NaiveDate, f64)>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("portal authentication failed: {0}")]
    Auth(#[source] PortalError),

    #[error("portal unreachable: all {attempted} missing dates failed (last error: {last})")]
    PortalUnreachable {
        attempted: usize,
        last: String,
    },

    #[error("statistics store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Window and classification
// ---------------------------------------------------------------------------

/// The `backfill_days` local dates before `today`, oldest first.
pub fn expected_days(today: NaiveDate, backfill_days: u32) -> Vec<NaiveDate> {
    (1..=u64::from(backfill_days))
        .rev()
        .filter_map(|n| today.checked_sub_days(Days::new(n)))
        .collect()
}

/// Classifies each day by comparing its day-end cumulative sum with the
/// previous day's. `baseline` is the sum at the end of the day before the
/// first one; absent sums carry the previous value forward.
pub fn classify_days(baseline: Option<f64>, day_end_sums: &[Option<f64>]) -> Vec<DayStatus> {
    let mut previous = baseline.unwrap_or(0.0);
    day_end_sums
        .iter()
        .map(|sum| {
            let current = sum.unwrap_or(previous);
            let status = if current > previous {
                DayStatus::Present
            } else {
                DayStatus::Missing
            };
            previous = current;
            status
        })
        .collect()
}

/// UTC instant at which local `date` begins in `tz`.
///
/// Zones that skip midnight for DST start the day at the first hour
/// that exists.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..3)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + Duration::hours(h)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Sorts points chronologically and turns them into statistic rows with a
/// running cumulative sum starting from `seed_sum`. Duplicate hours keep
/// their first reading.
pub fn build_statistic_rows(points: &[UsagePoint], seed_sum: f64) -> Vec<StatisticRow> {
    let mut sorted: Vec<&UsagePoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.start_utc());
    sorted.dedup_by_key(|p| p.start_utc());

    let mut sum = seed_sum;
    sorted
        .into_iter()
        .map(|p| {
            sum += p.usage_kwh;
            StatisticRow {
                start: p.start_utc(),
                state: p.usage_kwh,
                sum,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Reconciles one statistic series against the portal.
#[derive(Debug, Clone)]
pub struct Reconciler {
    metadata: StatisticMetadata,
    backfill_days: u32,
    tz: Tz,
}

impl Reconciler {
    pub fn new(metadata: StatisticMetadata, backfill_days: u32, tz: Tz) -> Self {
        Self {
            metadata,
            backfill_days,
            tz,
        }
    }

    pub fn statistic_id(&self) -> &str {
        &self.metadata.statistic_id
    }

    pub fn metadata(&self) -> &StatisticMetadata {
        &self.metadata
    }

    /// Days in the window whose usage is not yet recorded, oldest first,
    /// together with the number of days checked.
    pub fn missing_days<S>(
        &self,
        store: &mut S,
        today: NaiveDate,
    ) -> Result<(Vec<NaiveDate>, usize), StoreError>
    where
        S: StatisticsStore + ?Sized,
    {
        let days = expected_days(today, self.backfill_days);
        let Some(first) = days.first() else {
            return Ok((Vec::new(), 0));
        };

        let id = self.statistic_id();
        let baseline = store.sum_before(id, start_of_day(*first, self.tz))?;

        let mut day_end_sums = Vec::with_capacity(days.len());
        for day in &days {
            let next = day.succ_opt().unwrap_or(*day);
            day_end_sums.push(store.sum_before(id, start_of_day(next, self.tz))?);
        }

        let missing = days
            .iter()
            .zip(classify_days(baseline, &day_end_sums))
            .filter(|(_, status)| *status == DayStatus::Missing)
            .map(|(day, _)| *day)
            .collect();

        Ok((missing, days.len()))
    }

    /// Runs one pass: find missing days and backfill them sequentially.
    ///
    /// # Errors
    /// - `ReconcileError::Auth`: login failed; remaining dates are skipped.
    /// - `ReconcileError::PortalUnreachable`: every attempted date failed.
    /// - `ReconcileError::Store`: reading or writing statistics failed.
    pub fn run<U, S>(
        &self,
        source: &mut U,
        store: &mut S,
        today: NaiveDate,
    ) -> Result<ReconcileReport, ReconcileError>
    where
        U: UsageSource + ?Sized,
        S: StatisticsStore + ?Sized,
    {
        let (missing, days_checked) = self.missing_days(store, today)?;
        let mut report = ReconcileReport {
            days_checked,
            missing: missing.clone(),
            ..Default::default()
        };

        if missing.is_empty() {
            info!("✓ Statistics are up to date. Skipping fetch.");
            return Ok(report);
        }

        info!(
            "📋 {} of {} days missing for {}",
            missing.len(),
            days_checked,
            self.statistic_id()
        );

        let mut last_error = None;
        for date in missing {
            info!("📥 Fetching hourly data for: {}", date);
            match source.fetch_hourly(date) {
                Ok(points) => match self.backfill_day(store, date, &points)? {
                    Some((written, total)) => {
                        report.rows_written += written;
                        report.fetched.push(date);
                        report.latest_day_total = Some((date, total));
                    }
                    None => {
                        warn!("No data returned for {}. It may not be available yet.", date);
                        report.empty.push(date);
                    }
                },
                Err(e) if e.is_auth() => return Err(ReconcileError::Auth(e)),
                Err(e) => {
                    warn!("⚠️  Failed to fetch {}: {}", date, e);
                    report.failed.push((date, e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        if report.fetched.is_empty() && report.empty.is_empty() {
            if let Some(last) = last_error {
                return Err(ReconcileError::PortalUnreachable {
                    attempted: report.failed.len(),
                    last: last.to_string(),
                });
            }
        }

        info!(
            "✓ Processed {} hourly energy statistics for {} ({} fetched, {} empty, {} failed)",
            report.rows_written,
            self.statistic_id(),
            report.fetched.len(),
            report.empty.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Writes one day's points. Returns `(rows written, day total)`, or
    /// `None` if no point falls inside the day.
    fn backfill_day<S>(
        &self,
        store: &mut S,
        date: NaiveDate,
        points: &[UsagePoint],
    ) -> Result<Option<(usize, f64)>, StoreError>
    where
        S: StatisticsStore + ?Sized,
    {
        let day_start = start_of_day(date, self.tz);
        let next_start = start_of_day(date.succ_opt().unwrap_or(date), self.tz);

        let in_day: Vec<UsagePoint> = points
            .iter()
            .filter(|p| {
                let start = p.start_utc();
                start >= day_start && start < next_start
            })
            .cloned()
            .collect();

        if in_day.len() < points.len() {
            debug!("Dropped {} readings outside {}", points.len() - in_day.len(), date);
        }
        if in_day.is_empty() {
            return Ok(None);
        }

        let id = self.statistic_id();
        let seed = store.sum_before(id, day_start)?.unwrap_or(0.0);
        let previous_day_end = store.sum_before(id, next_start)?.unwrap_or(seed);

        let rows = build_statistic_rows(&in_day, seed);
        let day_end = rows.last().map(|r| r.sum).unwrap_or(seed);

        // Rows after the gap move up by what the gap adds
        let delta = day_end - previous_day_end;
        let delta = if delta.abs() > f64::EPSILON {
            delta
        } else {
            0.0
        };

        let (written, shifted) = store.backfill_day(&self.metadata, &rows, next_start, delta)?;
        if shifted > 0 {
            info!(
                "   Shifted {} later rows by {:.3} kWh after backfilling {}",
                shifted, delta, date
            );
        }

        Ok(Some((written, day_end - seed)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
