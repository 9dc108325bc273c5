/// Statistics store: where reconciled hourly rows end up.
///
/// The store behaves like an external-statistics sink: rows are keyed by
/// (statistic_id, start) and re-inserting a row replaces it. Sums are
/// expected to be non-decreasing by start time; `adjust_sums_from` exists
/// so a backfilled gap can lift every later row by the gap's total;
/// `backfill_day` does the insert and the lift together.

pub mod memory;
pub mod pg;

pub use self::memory::MemoryStore;
pub use self::pg::PgStatisticsStore;

use crate::db::DbConfigError;
use crate::model::{MonitoringState, StatisticMetadata, StatisticRow};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),

    #[error(transparent)]
    Config(#[from] DbConfigError),
}

pub trait StatisticsStore {
    /// Most recent row of the series, if any.
    fn last_statistic(&mut self, statistic_id: &str) -> Result<Option<StatisticRow>, StoreError>;

    /// Cumulative sum of the last row starting strictly before `before`.
    fn sum_before(
        &mut self,
        statistic_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;

    /// Upserts the metadata and rows; returns the number of rows written.
    fn add_external_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
    ) -> Result<usize, StoreError>;

    /// Upserts one backfilled day and adds `delta` to the sum of every row
    /// starting at or after `shift_from`. Both writes apply or neither does.
    /// Returns `(rows written, later rows shifted)`.
    fn backfill_day(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
        shift_from: DateTime<Utc>,
        delta: f64,
    ) -> Result<(usize, usize), StoreError>;

    /// Adds `delta` to the sum of every row starting at or after `from`.
    fn adjust_sums_from(
        &mut self,
        statistic_id: &str,
        from: DateTime<Utc>,
        delta: f64,
    ) -> Result<usize, StoreError>;

    fn load_monitoring_state(
        &mut self,
        statistic_id: &str,
    ) -> Result<Option<MonitoringState>, StoreError>;

    fn save_monitoring_state(
        &mut self,
        statistic_id: &str,
        state: &MonitoringState,
    ) -> Result<(), StoreError>;
}
