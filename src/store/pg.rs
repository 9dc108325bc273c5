/// PostgreSQL statistics store (schema `energy`, see sql/001_energy_schema.sql).

use super::{StatisticsStore, StoreError};
use crate::db::{self, ENERGY_SCHEMA};
use crate::model::{MonitoringState, StatisticMetadata, StatisticRow};
use chrono::{DateTime, Utc};
use postgres::{Client, Transaction};

pub struct PgStatisticsStore {
    client: Client,
}

impl PgStatisticsStore {
    /// Connects via DATABASE_URL and verifies the `energy` schema.
    pub fn connect() -> Result<Self, StoreError> {
        let client = db::connect_and_verify(&[ENERGY_SCHEMA])?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl StatisticsStore for PgStatisticsStore {
    fn last_statistic(&mut self, statistic_id: &str) -> Result<Option<StatisticRow>, StoreError> {
        let rows = self.client.query(
            "SELECT start_time, state_kwh, sum_kwh
             FROM energy.statistics
             WHERE statistic_id = $1
             ORDER BY start_time DESC
             LIMIT 1",
            &[&statistic_id],
        )?;

        Ok(rows.first().map(|row| StatisticRow {
            start: row.get(0),
            state: row.get(1),
            sum: row.get(2),
        }))
    }

    fn sum_before(
        &mut self,
        statistic_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let rows = self.client.query(
            "SELECT sum_kwh
             FROM energy.statistics
             WHERE statistic_id = $1 AND start_time < $2
             ORDER BY start_time DESC
             LIMIT 1",
            &[&statistic_id, &before],
        )?;

        Ok(rows.first().map(|row| row.get(0)))
    }

    fn add_external_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
    ) -> Result<usize, StoreError> {
        let mut tx = self.client.transaction()?;
        let written = upsert_statistics(&mut tx, metadata, rows)?;
        tx.commit()?;
        Ok(written)
    }

    fn backfill_day(
        &mut self,
        metadata: &StatisticMetadata,
        rows: &[StatisticRow],
        shift_from: DateTime<Utc>,
        delta: f64,
    ) -> Result<(usize, usize), StoreError> {
        // Dropping the transaction on error rolls back both writes
        let mut tx = self.client.transaction()?;
        let shifted = if delta != 0.0 {
            shift_sums(&mut tx, &metadata.statistic_id, shift_from, delta)?
        } else {
            0
        };
        let written = upsert_statistics(&mut tx, metadata, rows)?;
        tx.commit()?;
        Ok((written, shifted))
    }

    fn adjust_sums_from(
        &mut self,
        statistic_id: &str,
        from: DateTime<Utc>,
        delta: f64,
    ) -> Result<usize, StoreError> {
        let mut tx = self.client.transaction()?;
        let adjusted = shift_sums(&mut tx, statistic_id, from, delta)?;
        tx.commit()?;
        Ok(adjusted)
    }

    fn load_monitoring_state(
        &mut self,
        statistic_id: &str,
    ) -> Result<Option<MonitoringState>, StoreError> {
        let rows = self.client.query(
            "SELECT last_poll_attempted, last_successful_update, yesterday_total_kwh,
                    consecutive_failures, last_error
             FROM energy.monitoring_state
             WHERE statistic_id = $1",
            &[&statistic_id],
        )?;

        Ok(rows.first().map(|row| MonitoringState {
            last_poll_attempted: row.get(0),
            last_successful_update: row.get(1),
            yesterday_total_kwh: row.get(2),
            consecutive_failures: row.get(3),
            last_error: row.get(4),
        }))
    }

    fn save_monitoring_state(
        &mut self,
        statistic_id: &str,
        state: &MonitoringState,
    ) -> Result<(), StoreError> {
        self.client.execute(
            "INSERT INTO energy.monitoring_state
             (statistic_id, last_poll_attempted, last_successful_update, yesterday_total_kwh,
              consecutive_failures, last_error)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (statistic_id) DO UPDATE SET
                last_poll_attempted = EXCLUDED.last_poll_attempted,
                last_successful_update = EXCLUDED.last_successful_update,
                yesterday_total_kwh = EXCLUDED.yesterday_total_kwh,
                consecutive_failures = EXCLUDED.consecutive_failures,
                last_error = EXCLUDED.last_error",
            &[
                &statistic_id,
                &state.last_poll_attempted,
                &state.last_successful_update,
                &state.yesterday_total_kwh,
                &state.consecutive_failures,
                &state.last_error,
            ],
        )?;
        Ok(())
    }
}

fn upsert_statistics(
    tx: &mut Transaction<'_>,
    metadata: &StatisticMetadata,
    rows: &[StatisticRow],
) -> Result<usize, postgres::Error> {
    tx.execute(
        "INSERT INTO energy.statistics_meta
         (statistic_id, name, source, unit_of_measurement, has_mean, has_sum)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (statistic_id) DO UPDATE SET
            name = EXCLUDED.name,
            source = EXCLUDED.source,
            unit_of_measurement = EXCLUDED.unit_of_measurement,
            has_mean = EXCLUDED.has_mean,
            has_sum = EXCLUDED.has_sum",
        &[
            &metadata.statistic_id,
            &metadata.name,
            &metadata.source,
            &metadata.unit_of_measurement,
            &metadata.has_mean,
            &metadata.has_sum,
        ],
    )?;

    let mut written = 0;
    for row in rows {
        written += tx.execute(
            "INSERT INTO energy.statistics (statistic_id, start_time, state_kwh, sum_kwh)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (statistic_id, start_time) DO UPDATE SET
                state_kwh = EXCLUDED.state_kwh,
                sum_kwh = EXCLUDED.sum_kwh",
            &[&metadata.statistic_id, &row.start, &row.state, &row.sum],
        )? as usize;
    }
    Ok(written)
}

fn shift_sums(
    tx: &mut Transaction<'_>,
    statistic_id: &str,
    from: DateTime<Utc>,
    delta: f64,
) -> Result<usize, postgres::Error> {
    let adjusted = tx.execute(
        "UPDATE energy.statistics
         SET sum_kwh = sum_kwh + $3
         WHERE statistic_id = $1 AND start_time >= $2",
        &[&statistic_id, &from, &delta],
    )?;
    Ok(adjusted as usize)
}
