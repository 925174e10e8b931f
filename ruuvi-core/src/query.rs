//! SQL text construction.
//!
//! Pure functions only. Table and column identifiers come from the validated
//! configuration and are interpolated; the device identity is always the bound
//! parameter `$1`.

use crate::error::{ConfigError, ValidationError};
use crate::mapping::{validate_table_identifier, ColumnMapping};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuilder {
    table: String,
    name_table: String,
    columns: ColumnMapping,
}

impl QueryBuilder {
    pub fn new(
        table: impl Into<String>,
        name_table: impl Into<String>,
        columns: ColumnMapping,
    ) -> Result<Self, ConfigError> {
        let table = table.into();
        let name_table = name_table.into();
        validate_table_identifier("table", &table)?;
        validate_table_identifier("name table", &name_table)?;
        Ok(Self {
            table,
            name_table,
            columns,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name_table(&self) -> &str {
        &self.name_table
    }

    pub fn columns(&self) -> &ColumnMapping {
        &self.columns
    }

    /// All known device identities, in ascending order.
    pub fn identity_list(&self) -> String {
        let identity = self.columns.identity_column();
        format!(
            "SELECT {identity} FROM {table} ORDER BY {identity} ASC",
            identity = identity,
            table = self.name_table,
        )
    }

    /// The `limit` newest rows for one device, newest first. The device
    /// identity is bound as `$1`.
    pub fn latest(&self, columns: &[String], limit: i64) -> Result<String, ValidationError> {
        if columns.is_empty() {
            return Err(ValidationError::NoColumns);
        }
        if limit < 1 {
            return Err(ValidationError::LimitTooSmall { n: limit });
        }
        let select = columns
            .iter()
            .map(|column| format!("{}.{}", self.table, column))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "SELECT {select} FROM {table} WHERE {identity} = $1 ORDER BY {time} DESC LIMIT {limit}",
            select = select,
            table = self.table,
            identity = self.columns.identity_column(),
            time = self.columns.time_column(),
            limit = limit,
        ))
    }
}

/// Collapse runs of whitespace so a query fits on one log line.
pub fn clean_for_logging(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn builder() -> QueryBuilder {
        let columns = ColumnMapping::from_pairs([
            ("time", "ts"),
            ("name", "device"),
            ("temperature", "temp_c"),
        ])
        .expect("valid mapping");
        QueryBuilder::new("ruuvitag", "ruuvitag_names", columns).expect("valid tables")
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identity_list() {
        assert_eq!(
            builder().identity_list(),
            "SELECT device FROM ruuvitag_names ORDER BY device ASC"
        );
    }

    #[test]
    fn test_identity_list_uses_mac_without_name() {
        let columns =
            ColumnMapping::from_pairs([("time", "time"), ("mac", "mac")]).expect("valid mapping");
        let qb = QueryBuilder::new("measurements", "tags", columns).expect("valid tables");
        assert_eq!(qb.identity_list(), "SELECT mac FROM tags ORDER BY mac ASC");
    }

    #[test]
    fn test_latest() {
        let sql = builder()
            .latest(&cols(&["ts", "device", "temp_c"]), 3)
            .expect("valid query");
        assert_eq!(
            sql,
            "SELECT ruuvitag.ts, ruuvitag.device, ruuvitag.temp_c FROM ruuvitag \
             WHERE device = $1 ORDER BY ts DESC LIMIT 3"
        );
    }

    #[test]
    fn test_latest_rejects_bad_arguments() {
        let qb = builder();
        assert_eq!(qb.latest(&[], 1), Err(ValidationError::NoColumns));
        assert_eq!(
            qb.latest(&cols(&["ts", "device"]), 0),
            Err(ValidationError::LimitTooSmall { n: 0 })
        );
        assert_eq!(
            qb.latest(&cols(&["ts", "device"]), -5),
            Err(ValidationError::LimitTooSmall { n: -5 })
        );
    }

    #[test]
    fn test_bad_table_rejected() {
        let err = QueryBuilder::new("ruuvitag; --", "names", ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_clean_for_logging() {
        let query = "\n\t\tSELECT ts\n\t\tFROM ruuvitag\n\t\tWHERE device = $1\n\t";
        assert_eq!(
            clean_for_logging(query),
            "SELECT ts FROM ruuvitag WHERE device = $1"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Same inputs give byte-identical SQL, with exactly one placeholder.
        #[test]
        fn prop_latest_is_deterministic(
            mask in prop::collection::vec(any::<bool>(), 3),
            limit in 1i64..10_000,
        ) {
            let qb = builder();
            let columns: Vec<String> = ["ts", "device", "temp_c"]
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(c, _)| c.to_string())
                .collect();
            prop_assume!(!columns.is_empty());

            let first = qb.latest(&columns, limit);
            let second = qb.latest(&columns, limit);
            prop_assert_eq!(&first, &second);

            let sql = first.expect("non-empty columns and positive limit");
            prop_assert_eq!(sql.matches('$').count(), 1);
            let limit_clause = format!("LIMIT {}", limit);
            prop_assert!(sql.ends_with(&limit_clause));
        }
    }
}
