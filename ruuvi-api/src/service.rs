//! Latest-Measurements Service
//!
//! Ties the query builder, the row collector and the resilient connection
//! together: validate the requested columns, discover device identities when
//! none were given, then fetch the newest rows per device and group them by
//! identity.

use crate::connection::{Connector, ResilientConnection};
use crate::deadline::Deadline;
use async_trait::async_trait;
use ruuvi_core::{
    clean_for_logging, scan_identity, ColumnMapping, QueryBuilder, Record, RowCollector,
    RuuviError, RuuviResult,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Records per device identity, newest first.
pub type Measurements = BTreeMap<String, Vec<Record>>;

/// What the HTTP layer needs from the engine. Kept as a trait so routes can
/// be exercised without a store.
#[async_trait]
pub trait MeasurementService: Send + Sync + 'static {
    /// The `n` newest records for each device.
    ///
    /// An empty `columns` selects every mapped column. An empty
    /// `identities` means every device listed in the name table.
    async fn latest(
        &self,
        n: i64,
        columns: &[String],
        identities: &[String],
        deadline: Deadline,
    ) -> RuuviResult<Measurements>;

    async fn ping(&self, deadline: Deadline) -> RuuviResult<()>;

    async fn close(&self) -> RuuviResult<()>;
}

pub struct LatestService<C: Connector> {
    queries: QueryBuilder,
    collector: RowCollector,
    conn: ResilientConnection<C>,
}

impl<C: Connector> LatestService<C> {
    pub fn new(queries: QueryBuilder, conn: ResilientConnection<C>) -> Self {
        let collector = RowCollector::new(queries.columns());
        Self {
            queries,
            collector,
            conn,
        }
    }

    pub fn columns(&self) -> &ColumnMapping {
        self.queries.columns()
    }

    pub fn connection(&self) -> &ResilientConnection<C> {
        &self.conn
    }

    async fn identities(&self, deadline: Deadline) -> RuuviResult<Vec<String>> {
        let sql = self.queries.identity_list();
        debug!(query = %clean_for_logging(&sql), "Listing device identities");
        self.conn
            .query(&sql, &[], deadline, |row| {
                scan_identity(row).map_err(RuuviError::from)
            })
            .await
    }
}

/// Different identities can resolve to one key (a case-insensitive name
/// column, or rows keyed by MAC). Keep the newest `n` under each key.
fn truncate_per_key(measurements: &mut Measurements, n: i64) {
    let limit = usize::try_from(n).unwrap_or(usize::MAX);
    for records in measurements.values_mut() {
        if records.len() > limit {
            records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            records.truncate(limit);
        }
    }
}

#[async_trait]
impl<C: Connector> MeasurementService for LatestService<C> {
    async fn latest(
        &self,
        n: i64,
        columns: &[String],
        identities: &[String],
        deadline: Deadline,
    ) -> RuuviResult<Measurements> {
        let columns = if columns.is_empty() {
            self.columns().physical_columns()
        } else {
            columns.to_vec()
        };
        self.columns().validate_requested_columns(&columns)?;

        // Same statement for every device; build it before touching the store.
        let sql = self.queries.latest(&columns, n)?;
        debug!(
            query = %clean_for_logging(&sql),
            columns = ?columns,
            "Fetching latest measurements"
        );

        let identities = if identities.is_empty() {
            self.identities(deadline).await?
        } else {
            identities.to_vec()
        };

        // Each identity is queried once, in first-seen order.
        let mut seen = BTreeSet::new();
        let mut measurements = Measurements::new();
        for identity in identities.iter().filter(|id| seen.insert(id.as_str())) {
            let records = self
                .conn
                .query(&sql, &[identity.as_str()], deadline, |row| {
                    self.collector
                        .collect(row, &columns)
                        .map_err(RuuviError::from)
                })
                .await
                .map_err(|e| e.for_device(identity.as_str()))?;

            if records.is_empty() {
                measurements.entry(identity.clone()).or_default();
            }
            for mut record in records {
                let key = record.take_identity().unwrap_or_else(|| identity.clone());
                measurements.entry(key).or_default().push(record);
            }
        }

        truncate_per_key(&mut measurements, n);
        Ok(measurements)
    }

    async fn ping(&self, deadline: Deadline) -> RuuviResult<()> {
        self.conn.ping(deadline).await
    }

    async fn close(&self) -> RuuviResult<()> {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(minute: u32) -> Record {
        Record::new(Utc.with_ymd_and_hms(2020, 12, 10, 12, minute, 0).unwrap())
    }

    #[test]
    fn test_merged_key_keeps_newest_n() {
        let mut measurements = Measurements::new();
        // Two queries landed under the same key, each newest first.
        measurements.insert("Kitchen".to_string(), vec![at(5), at(1), at(9), at(3)]);
        measurements.insert("Sauna".to_string(), vec![at(2)]);

        truncate_per_key(&mut measurements, 2);

        let minutes: Vec<_> = measurements["Kitchen"]
            .iter()
            .map(|r| r.timestamp.format("%M").to_string())
            .collect();
        assert_eq!(minutes, vec!["09", "05"]);
        assert_eq!(measurements["Sauna"].len(), 1);
    }

    #[test]
    fn test_within_limit_left_alone() {
        let mut measurements = Measurements::new();
        measurements.insert("Kitchen".to_string(), vec![at(5), at(1)]);
        truncate_per_key(&mut measurements, 1000);
        assert_eq!(measurements["Kitchen"].len(), 2);
    }
}
