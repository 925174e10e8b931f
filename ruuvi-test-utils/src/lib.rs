//! RuuviTag Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - An in-memory measurement store behind the [`Connector`] seam, with
//!   scriptable dial and operation failures
//! - Proptest generators for column mappings
//! - Fixtures for common scenarios
//! - Assertions for result ordering and record shape

pub use ruuvi_api::{
    BackoffConfig, Connector, Deadline, LatestService, MeasurementService, Measurements,
    ResilientConnection, StoreConnection,
};
pub use ruuvi_core::{
    ColumnMapping, ConnectionError, DecodeError, Field, FieldKind, QueryBuilder, Record,
    RowReader, RuuviError, RuuviResult, Timestamp, Value,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK STORE
// ============================================================================

/// One executed statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    identity_column: String,
    time_column: String,
    rows: Vec<BTreeMap<String, Value>>,
    names: Option<Vec<String>>,
    dial_failures: VecDeque<ConnectionError>,
    operation_failures: VecDeque<ConnectionError>,
    delay: Option<Duration>,
    generation: u64,
    dials: usize,
    pings: usize,
    cancels: usize,
    statements: Vec<Statement>,
}

/// In-memory measurement table plus name table.
///
/// Understands exactly the two statement shapes the query builder emits: an
/// identity list (no parameters) and a latest-N select bound to one identity.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new(mapping: &ColumnMapping) -> Self {
        let state = StoreState {
            identity_column: mapping.identity_column().to_string(),
            time_column: mapping.time_column().to_string(),
            ..StoreState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            store: self.clone(),
        }
    }

    /// Insert a row given as physical column → value. Missing columns are NULL.
    pub fn insert<I, K>(&self, row: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let row = row.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.state().rows.push(row);
    }

    /// Contents of the name table. Defaults to the distinct identities found
    /// in the measurement rows.
    pub fn set_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().names = Some(names.into_iter().map(Into::into).collect());
    }

    /// Make the next dial attempt fail with `err`. Queued failures are used in
    /// order.
    pub fn fail_dial(&self, err: ConnectionError) {
        self.state().dial_failures.push_back(err);
    }

    /// Make the next query or ping fail with `err`.
    pub fn fail_operation(&self, err: ConnectionError) {
        self.state().operation_failures.push_back(err);
    }

    /// Simulate the server closing every open connection, e.g. an idle
    /// timeout. Connections dialed afterwards work normally.
    pub fn drop_connections(&self) {
        self.state().generation += 1;
    }

    /// Delay every query and ping by `delay` after it has been accepted.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    pub fn dials(&self) -> usize {
        self.state().dials
    }

    pub fn pings(&self) -> usize {
        self.state().pings
    }

    pub fn cancels(&self) -> usize {
        self.state().cancels
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state().statements.clone()
    }

    fn admit(&self, generation: u64) -> Result<Option<Duration>, ConnectionError> {
        let mut state = self.state();
        if generation != state.generation {
            return Err(ConnectionError::lost(
                "server closed the connection unexpectedly",
            ));
        }
        if let Some(err) = state.operation_failures.pop_front() {
            return Err(err);
        }
        Ok(state.delay)
    }

    fn execute(&self, sql: &str, params: &[&str]) -> Result<Vec<MockRow>, ConnectionError> {
        let mut state = self.state();
        state.statements.push(Statement {
            sql: sql.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        });

        match params {
            [] => Ok(identity_rows(&state)),
            [identity] => {
                let (columns, limit) = parse_select(sql).ok_or_else(|| {
                    ConnectionError::query(format!("syntax error in statement: {}", sql))
                })?;
                Ok(latest_rows(&state, identity, &columns, limit))
            }
            _ => Err(ConnectionError::query("unexpected parameter count")),
        }
    }
}

fn identity_rows(state: &StoreState) -> Vec<MockRow> {
    let names = match &state.names {
        Some(names) => {
            let mut names = names.clone();
            names.sort();
            names
        }
        None => {
            let mut names: Vec<String> = state
                .rows
                .iter()
                .filter_map(|row| match row.get(&state.identity_column) {
                    Some(Value::Text(name)) => Some(name.clone()),
                    _ => None,
                })
                .collect();
            names.sort();
            names.dedup();
            names
        }
    };
    names
        .into_iter()
        .map(|name| MockRow(vec![Some(Value::Text(name))]))
        .collect()
}

fn latest_rows(
    state: &StoreState,
    identity: &str,
    columns: &[String],
    limit: Option<usize>,
) -> Vec<MockRow> {
    let time_of = |row: &BTreeMap<String, Value>| match row.get(&state.time_column) {
        Some(Value::Timestamp(ts)) => Some(*ts),
        _ => None,
    };
    let mut matching: Vec<&BTreeMap<String, Value>> = state
        .rows
        .iter()
        .filter(|row| {
            matches!(row.get(&state.identity_column), Some(Value::Text(v)) if v == identity)
        })
        .collect();
    matching.sort_by(|a, b| time_of(b).cmp(&time_of(a)));
    matching
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|row| MockRow(columns.iter().map(|c| row.get(c).cloned()).collect()))
        .collect()
}

/// Pull the selected column names and the limit out of a latest-N statement.
fn parse_select(sql: &str) -> Option<(Vec<String>, Option<usize>)> {
    let rest = sql.strip_prefix("SELECT ")?;
    let (select, rest) = rest.split_once(" FROM ")?;
    let columns = select
        .split(',')
        .map(str::trim)
        .map(|c| c.rsplit('.').next().unwrap_or(c).to_string())
        .collect();
    let limit = rest
        .rsplit_once("LIMIT ")
        .and_then(|(_, n)| n.trim().parse().ok());
    Some((columns, limit))
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    store: MockStore,
}

impl MockConnector {
    pub fn store(&self) -> &MockStore {
        &self.store
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, ConnectionError> {
        let mut state = self.store.state();
        state.dials += 1;
        if let Some(err) = state.dial_failures.pop_front() {
            return Err(err);
        }
        Ok(MockConnection {
            store: self.store.clone(),
            generation: state.generation,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    store: MockStore,
    generation: u64,
}

#[async_trait]
impl StoreConnection for MockConnection {
    type Row = MockRow;

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<MockRow>, ConnectionError> {
        let delay = self.store.admit(self.generation)?;
        let rows = self.store.execute(sql, params)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        let delay = self.store.admit(self.generation)?;
        self.store.state().pings += 1;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn cancel(&self) {
        self.store.state().cancels += 1;
    }
}

/// A result row of already-typed values; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRow(pub Vec<Option<Value>>);

impl RowReader for MockRow {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn read(&self, idx: usize, kind: FieldKind) -> Result<Option<Value>, DecodeError> {
        match self.0.get(idx) {
            None => Err(DecodeError::ColumnCount {
                expected: idx + 1,
                got: self.0.len(),
            }),
            Some(None) => Ok(None),
            Some(Some(Value::Integer(v))) if kind == FieldKind::Float => {
                Ok(Some(Value::Float(*v as f64)))
            }
            Some(Some(value)) if value.kind() == kind => Ok(Some(value.clone())),
            Some(Some(value)) => Err(DecodeError::TypeMismatch {
                column: idx.to_string(),
                expected: kind,
                found: format!("{:?}", value.kind()),
            }),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for mappings and measurement values.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    /// A valid SQL identifier.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,15}"
    }

    pub fn arb_field() -> impl Strategy<Value = Field> {
        prop::sample::select(Field::ALL.to_vec())
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2015-01-01 .. 2035-01-01
        (1_420_070_400i64..2_051_222_400i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    /// A mapping that always has `time` and at least one identity field.
    pub fn arb_column_mapping() -> impl Strategy<Value = ColumnMapping> {
        (
            arb_identifier(),
            prop::option::of(arb_identifier()),
            prop::option::of(arb_identifier()),
            prop::collection::btree_map(arb_field(), arb_identifier(), 0..6),
            any::<bool>(),
        )
            .prop_map(|(time, name, mac, extra, prefer_name)| {
                let mut columns = extra;
                columns.insert(Field::Time, time);
                if let Some(name) = name {
                    columns.insert(Field::Name, name);
                }
                if let Some(mac) = mac {
                    columns.insert(Field::Mac, mac);
                }
                if !columns.contains_key(&Field::Name) && !columns.contains_key(&Field::Mac) {
                    let field = if prefer_name { Field::Name } else { Field::Mac };
                    columns.insert(field, "identity".to_string());
                }
                columns
            })
            .prop_filter_map("generated mapping must validate", |columns| {
                ColumnMapping::new(columns).ok()
            })
    }

    /// A value of the given kind, or NULL.
    pub fn arb_value(kind: FieldKind) -> BoxedStrategy<Option<Value>> {
        let value = match kind {
            FieldKind::Timestamp => arb_timestamp().prop_map(Value::Timestamp).boxed(),
            FieldKind::Float => (-40.0f64..85.0).prop_map(Value::Float).boxed(),
            FieldKind::Integer => (-2000i64..2000).prop_map(Value::Integer).boxed(),
            FieldKind::Text => "[A-Za-z ]{1,16}".prop_map(Value::Text).boxed(),
        };
        prop::option::of(value).boxed()
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use chrono::{TimeZone, Utc};

    /// Mapping where most physical names differ from the logical ones.
    pub fn renamed_mapping() -> ColumnMapping {
        ColumnMapping::from_pairs([
            ("time", "ts"),
            ("name", "device"),
            ("mac", "addr"),
            ("temperature", "temp_c"),
            ("humidity", "rh"),
            ("pressure", "pressure_hpa"),
            ("battery_voltage", "battery"),
            ("tx_power", "tx"),
        ])
        .expect("fixture mapping is valid")
    }

    /// Base instant for fixture rows: 2020-12-10T12:00:00Z.
    pub fn base_time() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 12, 10, 12, 0, 0).unwrap()
    }

    /// `minutes` after [`base_time`].
    pub fn at(minutes: i64) -> Timestamp {
        base_time() + chrono::Duration::minutes(minutes)
    }

    /// A row for [`renamed_mapping`].
    pub fn reading(
        device: &str,
        addr: &str,
        minutes: i64,
        temperature: f64,
    ) -> Vec<(String, Value)> {
        vec![
            ("ts".to_string(), Value::Timestamp(at(minutes))),
            ("device".to_string(), Value::Text(device.to_string())),
            ("addr".to_string(), Value::Text(addr.to_string())),
            ("temp_c".to_string(), Value::Float(temperature)),
            ("rh".to_string(), Value::Float(40.0)),
            ("tx".to_string(), Value::Integer(4)),
        ]
    }

    /// A store for [`renamed_mapping`] holding two devices: Kitchen with three
    /// readings and Sauna with two.
    pub fn two_device_store() -> MockStore {
        let store = MockStore::new(&renamed_mapping());
        store.insert(reading("Kitchen", "aa:bb:cc:00:00:01", 0, 20.0));
        store.insert(reading("Kitchen", "aa:bb:cc:00:00:01", 10, 21.0));
        store.insert(reading("Kitchen", "aa:bb:cc:00:00:01", 5, 20.5));
        store.insert(reading("Sauna", "aa:bb:cc:00:00:02", 3, 80.0));
        store.insert(reading("Sauna", "aa:bb:cc:00:00:02", 7, 85.0));
        store
    }

    /// Service over `store` with no backoff delay.
    pub fn service(store: &MockStore) -> LatestService<MockConnector> {
        service_with(store, &renamed_mapping())
    }

    pub fn service_with(
        store: &MockStore,
        mapping: &ColumnMapping,
    ) -> LatestService<MockConnector> {
        let queries = QueryBuilder::new("ruuvitag", "ruuvitag_names", mapping.clone())
            .expect("fixture tables are valid");
        LatestService::new(
            queries,
            ResilientConnection::new(store.connector(), BackoffConfig::none()),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for engine results.

    use super::*;

    /// Assert that records are strictly newest first.
    #[track_caller]
    pub fn assert_newest_first(records: &[Record]) {
        for pair in records.windows(2) {
            assert!(
                pair[0].timestamp > pair[1].timestamp,
                "records out of order: {} before {}",
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
    }

    /// Assert that exactly `fields` (plus `time`) carry values.
    #[track_caller]
    pub fn assert_populated(record: &Record, fields: &[Field]) {
        for field in Field::ALL {
            if field == Field::Time {
                continue;
            }
            let populated = record.get(field).is_some();
            assert_eq!(
                populated,
                fields.contains(&field),
                "field {} populated = {}",
                field,
                populated
            );
        }
    }

    /// Assert that a result is a connection error of the combined
    /// retry-after-reconnect kind.
    #[track_caller]
    pub fn assert_retry_failed<T: std::fmt::Debug>(result: &RuuviResult<T>) {
        match result.as_ref().map_err(RuuviError::root) {
            Err(RuuviError::Connection(ConnectionError::RetryFailed { .. })) => {}
            other => panic!("Expected RetryFailed, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
