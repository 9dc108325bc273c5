/// In-process statistics store, for `--memory` runs and tests.

use super::{StatisticsStore, StoreError};
use crate::model::{MonitoringState, StatisticMetadata, StatisticRow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryStore {
    metadata: HashMap<String, StatisticMetadata>,
    series: HashMap<String, BTreeMap<DateTime<Utc>, StatisticRow>>,
    monitoring: HashMap<String, MonitoringState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of a series in chronological order.
    pub fn rows(&self, statistic_id: &str) -> Vec<StatisticRow> {
        self.series
            .get(statistic_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metadata(&self, statistic_id: &str) -> Option<&StatisticMetadata> {
        self.metadata.get(statistic_id)
    }
}

impl StatisticsStore for MemoryStore {
    fn last_statistic(&mut self, statistic_id: &str) -> Result<Option<StatisticRow>, StoreError> {
        Ok(self
            .series
            .get(statistic_id)
            .and_then(|rows| rows.values().next_back().cloned()))
    }

    fn sum_before(
        &mut self,
        statistic_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        Ok(self
            .series
            .get(statistic_id)
            .and_then(|rows| rows.range(..before).next_back())
            .map(|(_, row)| row.sum))
    }

    fn add_external_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
    ) -> Result<usize, StoreError> {
        self.metadata
            .insert(metadata.statistic_id.clone(), metadata.clone());

        let series = self.series.entry(metadata.statistic_id.clone()).or_default();
        for row in rows {
            series.insert(row.start, row.clone());
        }
        Ok(rows.len())
    }

    fn backfill_day(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
        shift_from: DateTime<Utc>,
        delta: f64,
    ) -> Result<(usize, usize), StoreError> {
        // Shift first so the new rows, which start before `shift_from`, are untouched
        let shifted = if delta != 0.0 {
            self.adjust_sums_from(&metadata.statistic_id, shift_from, delta)?
        } else {
            0
        };
        let written = self.add_external_statistics(metadata, rows)?;
        Ok((written, shifted))
    }

    fn adjust_sums_from(
        &mut self,
        statistic_id: &str,
        from: DateTime<Utc>,
        delta: f64,
    ) -> Result<usize, StoreError> {
        let Some(series) = self.series.get_mut(statistic_id) else {
            return Ok(0);
        };

        let mut adjusted = 0;
        for (_, row) in series.range_mut(from..) {
            row.sum += delta;
            adjusted += 1;
        }
        Ok(adjusted)
    }

    fn load_monitoring_state(
        &mut self,
        statistic_id: &str,
    ) -> Result<Option<MonitoringState>, StoreError> {
        Ok(self.monitoring.get(statistic_id).cloned())
    }

    fn save_monitoring_state(
        &mut self,
        statistic_id: &str,
        state: &MonitoringState,
    ) -> Result<(), StoreError> {
        self.monitoring
            .insert(statistic_id.to_string(), state.clone());
        Ok(())
    }
}
