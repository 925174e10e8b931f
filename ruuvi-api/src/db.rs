//! PostgreSQL Store
//!
//! [`Connector`] implementation on top of tokio-postgres. A single client is
//! opened per connection; its background I/O task is spawned on the runtime
//! and ends when the client is dropped.

use crate::config::{env_parse, process_env, EnvLookup};
use crate::connection::{Connector, StoreConnection};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use ruuvi_core::{ConnectionError, DecodeError, FieldKind, RowReader, Value};
use std::error::Error as _;
use std::fmt;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls};

// ============================================================================
// CONNECTION CONFIGURATION
// ============================================================================

/// Database connection configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Timeout for a single dial attempt
    pub connect_timeout: Duration,
    /// Measurement table
    pub table: String,
    /// Table listing known device identities
    pub name_table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "ruuvi".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            connect_timeout: Duration::from_secs(10),
            table: "ruuvitag".to_string(),
            name_table: "ruuvitag_names".to_string(),
        }
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("table", &self.table)
            .field("name_table", &self.name_table)
            .finish()
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self::default().with_env(&process_env)
    }

    /// Overlay `RUUVI_DB_HOST`, `RUUVI_DB_PORT`, `RUUVI_DB_NAME`,
    /// `RUUVI_DB_USER`, `RUUVI_DB_PASSWORD`, `RUUVI_DB_CONNECT_TIMEOUT`
    /// (seconds), `RUUVI_DB_TABLE` and `RUUVI_DB_NAME_TABLE`.
    pub fn with_env(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(host) = env("RUUVI_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse(env, "RUUVI_DB_PORT") {
            self.port = port;
        }
        if let Some(dbname) = env("RUUVI_DB_NAME") {
            self.dbname = dbname;
        }
        if let Some(user) = env("RUUVI_DB_USER") {
            self.user = user;
        }
        if let Some(password) = env("RUUVI_DB_PASSWORD") {
            self.password = password;
        }
        if let Some(secs) = env_parse(env, "RUUVI_DB_CONNECT_TIMEOUT") {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(table) = env("RUUVI_DB_TABLE") {
            self.table = table;
        }
        if let Some(name_table) = env("RUUVI_DB_NAME_TABLE") {
            self.name_table = name_table;
        }
        self
    }

    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .connect_timeout(self.connect_timeout)
            .application_name("ruuvi-api");
        if !self.password.is_empty() {
            cfg.password(&self.password);
        }
        cfg
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    pub fn new(config: &DbConfig) -> Self {
        Self {
            config: config.pg_config(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, ConnectionError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| ConnectionError::dial(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Database connection task ended");
            }
        });
        Ok(PgConnection { client })
    }
}

pub struct PgConnection {
    client: Client,
}

#[async_trait]
impl StoreConnection for PgConnection {
    type Row = PgRow;

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<PgRow>, ConnectionError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(sql, &params).await.map_err(classify)?;
        Ok(rows.into_iter().map(PgRow).collect())
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(classify)
    }

    fn cancel(&self) {
        let token = self.client.cancel_token();
        tokio::spawn(async move {
            if let Err(e) = token.cancel_query(NoTls).await {
                tracing::debug!(error = %e, "Failed to cancel query");
            }
        });
    }
}

/// Sort a driver error into "connection gone" versus "statement failed".
fn classify(err: tokio_postgres::Error) -> ConnectionError {
    if err.is_closed() {
        return ConnectionError::lost(err.to_string());
    }
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        if code.code().starts_with("08")
            || *code == SqlState::ADMIN_SHUTDOWN
            || *code == SqlState::CRASH_SHUTDOWN
        {
            return ConnectionError::lost(db.to_string());
        }
        return ConnectionError::query(db.to_string());
    }
    if err
        .source()
        .is_some_and(|source| source.is::<std::io::Error>())
    {
        return ConnectionError::lost(err.to_string());
    }
    ConnectionError::query(err.to_string())
}

// ============================================================================
// ROW DECODING
// ============================================================================

pub struct PgRow(tokio_postgres::Row);

impl PgRow {
    fn get<'a, T: FromSql<'a>>(&'a self, idx: usize) -> Result<Option<T>, DecodeError> {
        self.0
            .try_get::<_, Option<T>>(idx)
            .map_err(|e| DecodeError::Malformed {
                column: self.column_name(idx),
                reason: e.to_string(),
            })
    }

    fn column_name(&self, idx: usize) -> String {
        self.0
            .columns()
            .get(idx)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| idx.to_string())
    }
}

impl RowReader for PgRow {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn read(&self, idx: usize, kind: FieldKind) -> Result<Option<Value>, DecodeError> {
        let ty = match self.0.columns().get(idx) {
            Some(column) => column.type_().clone(),
            None => {
                return Err(DecodeError::ColumnCount {
                    expected: idx + 1,
                    got: self.0.len(),
                })
            }
        };
        let value = match kind {
            FieldKind::Timestamp if ty == Type::TIMESTAMPTZ => self
                .get::<DateTime<Utc>>(idx)?
                .map(Value::Timestamp),
            FieldKind::Timestamp if ty == Type::TIMESTAMP => self
                .get::<NaiveDateTime>(idx)?
                .map(|ts| Value::Timestamp(ts.and_utc())),
            FieldKind::Float if ty == Type::FLOAT8 => self.get::<f64>(idx)?.map(Value::Float),
            FieldKind::Float if ty == Type::FLOAT4 => self
                .get::<f32>(idx)?
                .map(|v| Value::Float(f64::from(v))),
            FieldKind::Float | FieldKind::Integer if ty == Type::INT2 => {
                self.get::<i16>(idx)?.map(|v| numeric(kind, i64::from(v)))
            }
            FieldKind::Float | FieldKind::Integer if ty == Type::INT4 => {
                self.get::<i32>(idx)?.map(|v| numeric(kind, i64::from(v)))
            }
            FieldKind::Float | FieldKind::Integer if ty == Type::INT8 => {
                self.get::<i64>(idx)?.map(|v| numeric(kind, v))
            }
            FieldKind::Text
                if ty == Type::TEXT
                    || ty == Type::VARCHAR
                    || ty == Type::BPCHAR
                    || ty == Type::NAME =>
            {
                self.get::<String>(idx)?.map(Value::Text)
            }
            _ => {
                return Err(DecodeError::TypeMismatch {
                    column: self.column_name(idx),
                    expected: kind,
                    found: ty.name().to_string(),
                })
            }
        };
        Ok(value)
    }
}

fn numeric(kind: FieldKind, value: i64) -> Value {
    match kind {
        FieldKind::Float => Value::Float(value as f64),
        _ => Value::Integer(value),
    }
}


#[cfg(all(test, feature = "db-tests"))]
mod db_tests {
    use super::*;
    use crate::connection::{BackoffConfig, ResilientConnection};
    use crate::deadline::Deadline;

    #[tokio::test]
    async fn test_ping_live_database() -> Result<(), ruuvi_core::RuuviError> {
        let conn = ResilientConnection::new(
            PgConnector::new(&DbConfig::from_env()),
            BackoffConfig::default(),
        );
        conn.connect(Deadline::after(Duration::from_secs(10))).await?;
        conn.ping(Deadline::after(Duration::from_secs(5))).await?;
        conn.close().await?;
        Ok(())
    }
}
