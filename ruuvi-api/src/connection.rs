//! Resilient Store Connection
//!
//! One long-lived connection to the measurement store, shared by every
//! request. Calls are serialized through an async mutex, so a reconnect is
//! never raced by a second caller and a broken handle is never used twice.
//!
//! When an operation fails because the connection was closed or reset, the
//! connection is re-established (with exponential backoff between dial
//! attempts) and the operation is retried exactly once. Any other failure is
//! returned as is.

use crate::config::{env_parse, process_env, EnvLookup};
use crate::deadline::Deadline;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use ruuvi_core::{ConnectionError, RuuviError, RuuviResult, RowReader};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

// ============================================================================
// STORE SEAMS
// ============================================================================

/// Opens connections to the store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StoreConnection;

    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;
}

/// An open connection to the store.
///
/// Implementations must report a closed or reset connection as
/// [`ConnectionError::Lost`]; that is the only error that triggers a
/// reconnect.
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    type Row: RowReader + Send + Sync;

    /// Run `sql` with positional text parameters.
    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Self::Row>, ConnectionError>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<(), ConnectionError>;

    /// Ask the store to abandon whatever is in flight. Called after a
    /// deadline expires mid-operation.
    fn cancel(&self) {}
}

/// Row type produced by a connector's connections.
pub type RowOf<C> = <<C as Connector>::Connection as StoreConnection>::Row;

// ============================================================================
// BACKOFF CONFIGURATION
// ============================================================================

/// Delay schedule between dial attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first dial attempt.
    pub max_times: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_times: 5,
        }
    }
}

impl BackoffConfig {
    pub fn from_env() -> Self {
        Self::default().with_env(&process_env)
    }

    /// Overlay `RUUVI_DB_BACKOFF_MIN_MS`, `RUUVI_DB_BACKOFF_MAX_MS` and
    /// `RUUVI_DB_BACKOFF_MAX_TIMES`, keeping current values for unset or
    /// unparseable ones.
    pub fn with_env(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(ms) = env_parse(env, "RUUVI_DB_BACKOFF_MIN_MS") {
            self.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "RUUVI_DB_BACKOFF_MAX_MS") {
            self.max_delay = Duration::from_millis(ms);
        }
        if let Some(times) = env_parse(env, "RUUVI_DB_BACKOFF_MAX_TIMES") {
            self.max_times = times;
        }
        self
    }

    /// No delay between attempts and no retries.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_times: 0,
        }
    }

    pub fn policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
    }
}

// ============================================================================
// RESILIENT CONNECTION
// ============================================================================

enum ConnState<T> {
    Disconnected,
    Connected(T),
    /// The last operation saw the connection drop; the next call redials.
    Broken,
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Broken,
}

enum Operation<'a> {
    Query { sql: &'a str, params: &'a [&'a str] },
    Ping,
}

pub struct ResilientConnection<C: Connector> {
    connector: C,
    backoff: BackoffConfig,
    state: Mutex<ConnState<C::Connection>>,
}

impl<C: Connector> ResilientConnection<C> {
    /// Create a handle in the disconnected state. Nothing is dialed until
    /// [`connect`](Self::connect) or the first operation.
    pub fn new(connector: C, backoff: BackoffConfig) -> Self {
        Self {
            connector,
            backoff,
            state: Mutex::new(ConnState::Disconnected),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub async fn status(&self) -> ConnectionStatus {
        match *self.state.lock().await {
            ConnState::Disconnected => ConnectionStatus::Disconnected,
            ConnState::Connected(_) => ConnectionStatus::Connected,
            ConnState::Broken => ConnectionStatus::Broken,
        }
    }

    /// Establish the connection now, unless one is already open.
    pub async fn connect(&self, deadline: Deadline) -> RuuviResult<()> {
        let mut state = self.lock(deadline).await?;
        if matches!(*state, ConnState::Connected(_)) {
            return Ok(());
        }
        let conn = deadline.run(self.dial()).await?;
        *state = ConnState::Connected(conn);
        Ok(())
    }

    /// Run `sql` and decode every returned row with `decode`.
    ///
    /// The connection stays locked until decoding finishes, so rows are
    /// never read from a handle another caller is reconnecting.
    pub async fn query<T, F>(
        &self,
        sql: &str,
        params: &[&str],
        deadline: Deadline,
        mut decode: F,
    ) -> RuuviResult<Vec<T>>
    where
        F: FnMut(&RowOf<C>) -> RuuviResult<T> + Send,
        T: Send,
    {
        let mut state = self.lock(deadline).await?;
        let rows = self
            .execute(&mut state, Operation::Query { sql, params }, deadline)
            .await?;
        rows.iter().map(|row| decode(row)).collect()
    }

    /// Round trip to the store, reconnecting like any other operation.
    pub async fn ping(&self, deadline: Deadline) -> RuuviResult<()> {
        let mut state = self.lock(deadline).await?;
        self.execute(&mut state, Operation::Ping, deadline)
            .await
            .map(|_| ())
    }

    /// Drop the connection. Safe to call repeatedly; a later operation
    /// dials again.
    pub async fn close(&self) -> RuuviResult<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, ConnState::Connected(_)) {
            debug!("Closing database connection");
        }
        *state = ConnState::Disconnected;
        Ok(())
    }

    async fn lock(
        &self,
        deadline: Deadline,
    ) -> RuuviResult<MutexGuard<'_, ConnState<C::Connection>>> {
        deadline
            .run(async { Ok::<_, RuuviError>(self.state.lock().await) })
            .await
    }

    async fn dial(&self) -> RuuviResult<C::Connection> {
        let conn = (|| self.connector.connect())
            .retry(self.backoff.policy())
            .notify(|err: &ConnectionError, dur: Duration| {
                warn!(
                    error = %err,
                    "Failed to connect to database. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await?;
        Ok(conn)
    }

    async fn execute(
        &self,
        state: &mut ConnState<C::Connection>,
        op: Operation<'_>,
        deadline: Deadline,
    ) -> RuuviResult<Vec<RowOf<C>>> {
        if !matches!(state, ConnState::Connected(_)) {
            debug!(
                broken = matches!(state, ConnState::Broken),
                "Connecting to database"
            );
            let conn = deadline.run(self.dial()).await?;
            *state = ConnState::Connected(conn);
        }

        let original = match self.attempt(state, &op, deadline).await {
            Ok(rows) => return Ok(rows),
            Err(RuuviError::Connection(err)) if err.is_connection_lost() => err,
            Err(err) => return Err(err),
        };

        *state = ConnState::Broken;
        debug!(error = %original, "Database connection lost, reconnecting");
        let conn = match deadline.run(self.dial()).await {
            Ok(conn) => conn,
            Err(RuuviError::Connection(reconnect)) => {
                return Err(ConnectionError::ReconnectFailed {
                    original: Box::new(original),
                    reconnect: Box::new(reconnect),
                }
                .into())
            }
            Err(err) => return Err(err),
        };
        *state = ConnState::Connected(conn);
        debug!("Reconnected to database, retrying once");

        match self.attempt(state, &op, deadline).await {
            Ok(rows) => Ok(rows),
            Err(RuuviError::Connection(retry)) => {
                if retry.is_connection_lost() {
                    *state = ConnState::Broken;
                }
                Err(ConnectionError::RetryFailed {
                    original: Box::new(original),
                    retry: Box::new(retry),
                }
                .into())
            }
            Err(err) => Err(err),
        }
    }

    async fn attempt(
        &self,
        state: &ConnState<C::Connection>,
        op: &Operation<'_>,
        deadline: Deadline,
    ) -> RuuviResult<Vec<RowOf<C>>> {
        let ConnState::Connected(conn) = state else {
            return Err(ConnectionError::lost("not connected").into());
        };
        let result = deadline
            .run(async {
                let rows = match op {
                    Operation::Query { sql, params } => conn.query(sql, params).await?,
                    Operation::Ping => {
                        conn.ping().await?;
                        Vec::new()
                    }
                };
                Ok::<_, RuuviError>(rows)
            })
            .await;
        if matches!(result, Err(RuuviError::DeadlineExceeded)) {
            debug!("Deadline exceeded, cancelling in-flight statement");
            conn.cancel();
        }
        result
    }
}
