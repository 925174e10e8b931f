//! Decoding result rows into sparse records.
//!
//! The set of columns varies per request, so decoding is driven by a lookup
//! table from physical column name to logical field, built once from the
//! column mapping.

use crate::error::DecodeError;
use crate::field::{Field, FieldKind};
use crate::mapping::ColumnMapping;
use crate::record::{Record, Value};
use std::collections::HashMap;

/// Positional access to one result row.
///
/// Implementations convert the driver's native column type into `kind`,
/// returning `Ok(None)` for SQL NULL.
pub trait RowReader {
    fn len(&self) -> usize;

    fn read(&self, idx: usize, kind: FieldKind) -> Result<Option<Value>, DecodeError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    field: Field,
    kind: FieldKind,
}

#[derive(Debug, Clone)]
pub struct RowCollector {
    slots: HashMap<String, Slot>,
}

impl RowCollector {
    pub fn new(mapping: &ColumnMapping) -> Self {
        let slots = mapping
            .reverse()
            .into_iter()
            .map(|(physical, field)| {
                (
                    physical,
                    Slot {
                        field,
                        kind: field.kind(),
                    },
                )
            })
            .collect();
        Self { slots }
    }

    fn resolve(&self, columns: &[String]) -> Result<Vec<Slot>, DecodeError> {
        columns
            .iter()
            .map(|column| {
                self.slots
                    .get(column)
                    .copied()
                    .ok_or_else(|| DecodeError::UnknownColumn {
                        column: column.clone(),
                    })
            })
            .collect()
    }

    /// Decode `row`, whose columns are `columns` in order.
    pub fn collect<R>(&self, row: &R, columns: &[String]) -> Result<Record, DecodeError>
    where
        R: RowReader + ?Sized,
    {
        let slots = self.resolve(columns)?;
        if row.len() != columns.len() {
            return Err(DecodeError::ColumnCount {
                expected: columns.len(),
                got: row.len(),
            });
        }

        let time_idx = slots
            .iter()
            .position(|slot| slot.field == Field::Time)
            .ok_or_else(|| DecodeError::MissingTimestamp {
                columns: columns.to_vec(),
            })?;
        let timestamp = match row.read(time_idx, FieldKind::Timestamp)? {
            Some(Value::Timestamp(ts)) => ts,
            Some(other) => {
                return Err(DecodeError::TypeMismatch {
                    column: columns[time_idx].clone(),
                    expected: FieldKind::Timestamp,
                    found: format!("{:?}", other.kind()),
                })
            }
            None => {
                return Err(DecodeError::UnexpectedNull {
                    column: columns[time_idx].clone(),
                })
            }
        };

        let mut record = Record::new(timestamp);
        for (idx, slot) in slots.iter().enumerate() {
            if slot.field == Field::Time {
                continue;
            }
            let value = row.read(idx, slot.kind)?;
            record.set(slot.field, value).map_err(|err| match err {
                DecodeError::TypeMismatch {
                    expected, found, ..
                } => DecodeError::TypeMismatch {
                    column: columns[idx].clone(),
                    expected,
                    found,
                },
                other => other,
            })?;
        }
        Ok(record)
    }
}

/// Read a single-column row holding a device identity.
pub fn scan_identity<R>(row: &R) -> Result<String, DecodeError>
where
    R: RowReader + ?Sized,
{
    if row.len() != 1 {
        return Err(DecodeError::ColumnCount {
            expected: 1,
            got: row.len(),
        });
    }
    match row.read(0, FieldKind::Text)? {
        Some(Value::Text(identity)) => Ok(identity),
        Some(other) => Err(DecodeError::TypeMismatch {
            column: "identity".to_string(),
            expected: FieldKind::Text,
            found: format!("{:?}", other.kind()),
        }),
        None => Err(DecodeError::UnexpectedNull {
            column: "identity".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    /// Row backed by a vector of already-typed values.
    struct VecRow(Vec<Option<Value>>);

    impl RowReader for VecRow {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn read(&self, idx: usize, kind: FieldKind) -> Result<Option<Value>, DecodeError> {
            match self.0.get(idx) {
                Some(Some(value)) if value.kind() == kind => Ok(Some(value.clone())),
                Some(Some(value)) => Err(DecodeError::TypeMismatch {
                    column: idx.to_string(),
                    expected: kind,
                    found: format!("{:?}", value.kind()),
                }),
                Some(None) => Ok(None),
                None => Err(DecodeError::ColumnCount {
                    expected: idx + 1,
                    got: self.0.len(),
                }),
            }
        }
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::from_pairs([
            ("time", "ts"),
            ("name", "device"),
            ("mac", "addr"),
            ("temperature", "temp_c"),
            ("humidity", "rh"),
            ("tx_power", "tx"),
        ])
        .expect("valid mapping")
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn ts() -> crate::Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_collect_requested_columns() {
        let collector = RowCollector::new(&mapping());
        let row = VecRow(vec![
            Some(Value::Text("Kitchen".to_string())),
            Some(Value::Timestamp(ts())),
            Some(Value::Float(19.5)),
            Some(Value::Integer(4)),
        ]);
        let record = collector
            .collect(&row, &cols(&["device", "ts", "temp_c", "tx"]))
            .expect("row decodes");

        assert_eq!(record.timestamp, ts());
        assert_eq!(record.name.as_deref(), Some("Kitchen"));
        assert_eq!(record.temperature, Some(19.5));
        assert_eq!(record.tx_power, Some(4));
        assert_eq!(record.humidity, None);
        assert_eq!(record.addr, None);
    }

    #[test]
    fn test_null_is_absent_not_zero() {
        let collector = RowCollector::new(&mapping());
        let row = VecRow(vec![
            Some(Value::Timestamp(ts())),
            Some(Value::Text("Kitchen".to_string())),
            None,
            None,
        ]);
        let record = collector
            .collect(&row, &cols(&["ts", "device", "temp_c", "tx"]))
            .expect("row decodes");
        assert_eq!(record.temperature, None);
        assert_eq!(record.tx_power, None);
    }

    #[test]
    fn test_unknown_column() {
        let collector = RowCollector::new(&mapping());
        let row = VecRow(vec![Some(Value::Timestamp(ts())), Some(Value::Float(1.0))]);
        let err = collector
            .collect(&row, &cols(&["ts", "pressure"]))
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownColumn {
                column: "pressure".to_string()
            }
        );
    }

    #[test]
    fn test_null_timestamp_rejected() {
        let collector = RowCollector::new(&mapping());
        let row = VecRow(vec![None, Some(Value::Text("Kitchen".to_string()))]);
        let err = collector.collect(&row, &cols(&["ts", "device"])).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedNull {
                column: "ts".to_string()
            }
        );
    }

    #[test]
    fn test_column_count_mismatch() {
        let collector = RowCollector::new(&mapping());
        let row = VecRow(vec![Some(Value::Timestamp(ts()))]);
        let err = collector.collect(&row, &cols(&["ts", "device"])).unwrap_err();
        assert_eq!(err, DecodeError::ColumnCount { expected: 2, got: 1 });
    }

    #[test]
    fn test_scan_identity() {
        let row = VecRow(vec![Some(Value::Text("Sauna".to_string()))]);
        assert_eq!(scan_identity(&row), Ok("Sauna".to_string()));

        let row = VecRow(vec![None]);
        assert!(matches!(
            scan_identity(&row),
            Err(DecodeError::UnexpectedNull { .. })
        ));
    }

    fn arb_value_for(kind: FieldKind) -> BoxedStrategy<Option<Value>> {
        let value = match kind {
            FieldKind::Float => (-100.0f64..100.0).prop_map(Value::Float).boxed(),
            FieldKind::Integer => (-2000i64..2000).prop_map(Value::Integer).boxed(),
            FieldKind::Text => "[A-Za-z ]{1,12}".prop_map(Value::Text).boxed(),
            FieldKind::Timestamp => Just(Value::Timestamp(ts())).boxed(),
        };
        prop::option::of(value).boxed()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Reading back a decoded row yields exactly the requested values and
        /// nothing for fields that were not requested.
        #[test]
        fn prop_collect_round_trip(
            mask in prop::collection::vec(any::<bool>(), 5),
            sample in (
                arb_value_for(FieldKind::Text),
                arb_value_for(FieldKind::Text),
                arb_value_for(FieldKind::Float),
                arb_value_for(FieldKind::Float),
                arb_value_for(FieldKind::Integer),
            ),
        ) {
            let mapping = mapping();
            let collector = RowCollector::new(&mapping);
            let (name, addr, temp, rh, tx) = sample;
            let optional = [
                ("device", Field::Name, name),
                ("addr", Field::Mac, addr),
                ("temp_c", Field::Temperature, temp),
                ("rh", Field::Humidity, rh),
                ("tx", Field::TxPower, tx),
            ];

            let mut columns = vec!["ts".to_string()];
            let mut values = vec![Some(Value::Timestamp(ts()))];
            for ((column, _, value), keep) in optional.iter().zip(mask.iter()) {
                if *keep {
                    columns.push(column.to_string());
                    values.push(value.clone());
                }
            }

            let record = collector.collect(&VecRow(values), &columns)
                .expect("fixture row decodes");
            prop_assert_eq!(record.timestamp, ts());
            for ((_, field, value), keep) in optional.iter().zip(mask.iter()) {
                let expected = if *keep { value.clone() } else { None };
                prop_assert_eq!(record.get(*field), expected);
            }
            prop_assert_eq!(record.get(Field::Pressure), None);
            prop_assert_eq!(record.get(Field::AccelerationX), None);
        }
    }
}
