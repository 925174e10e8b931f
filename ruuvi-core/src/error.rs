//! Error types for the retrieval engine.

use crate::field::FieldKind;
use thiserror::Error;

/// Errors in the column mapping, table identifiers or config file supplied at
/// startup.
///
/// These are fatal: the service must not start with a bad mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("columns cannot be empty")]
    EmptyMapping,

    #[error("column time is required")]
    MissingTimeColumn,

    #[error("identifier column name or mac is required")]
    MissingIdentityColumn,

    #[error("unknown logical field: {name}")]
    UnknownField { name: String },

    #[error("invalid identifier for {target}: {value:?}")]
    InvalidIdentifier { target: String, value: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// The config file exists but could not be read or parsed.
    #[error("Failed to load config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// A per-request column list that does not fit the configured mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidColumnError {
    #[error("invalid column: requested columns cannot be empty")]
    Empty,

    #[error("invalid column: unknown column {column}")]
    Unknown { column: String },

    #[error("invalid column: column {column} is required")]
    MissingTime { column: String },

    #[error("invalid column: identifier column {columns} is required")]
    MissingIdentity { columns: String },
}

/// Bad arguments to the query builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no columns specified")]
    NoColumns,

    #[error("n must be at least 1, got {n}")]
    LimitTooSmall { n: i64 },
}

/// A result row that does not match the column set it was queried with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown column: {column}")]
    UnknownColumn { column: String },

    #[error("row has {got} columns, expected {expected}")]
    ColumnCount { expected: usize, got: usize },

    #[error("no timestamp column among {columns:?}")]
    MissingTimestamp { columns: Vec<String> },

    #[error("column {column} is NULL")]
    UnexpectedNull { column: String },

    #[error("column {column} has type {found}, expected {expected:?}")]
    TypeMismatch {
        column: String,
        expected: FieldKind,
        found: String,
    },

    #[error("failed to decode column {column}: {reason}")]
    Malformed { column: String, reason: String },
}

/// Failures talking to the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to connect to database: {reason}")]
    Dial { reason: String },

    /// The physical connection was closed or reset underneath us.
    #[error("connection lost: {reason}")]
    Lost { reason: String },

    /// The store rejected the statement; the connection itself is fine.
    #[error("query failed: {reason}")]
    Query { reason: String },

    #[error("reconnect failed: {reconnect} (after: {original})")]
    ReconnectFailed {
        original: Box<ConnectionError>,
        reconnect: Box<ConnectionError>,
    },

    #[error("retry after reconnect failed: {retry} (first attempt: {original})")]
    RetryFailed {
        original: Box<ConnectionError>,
        retry: Box<ConnectionError>,
    },
}

impl ConnectionError {
    pub fn dial(reason: impl Into<String>) -> Self {
        Self::Dial {
            reason: reason.into(),
        }
    }

    pub fn lost(reason: impl Into<String>) -> Self {
        Self::Lost {
            reason: reason.into(),
        }
    }

    pub fn query(reason: impl Into<String>) -> Self {
        Self::Query {
            reason: reason.into(),
        }
    }

    /// True for the "connection closed/reset" class that triggers a reconnect.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Lost { .. })
    }
}

/// Master error type for the retrieval engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuuviError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    InvalidColumn(#[from] InvalidColumnError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("device {identity}: {source}")]
    Device {
        identity: String,
        #[source]
        source: Box<RuuviError>,
    },
}

impl RuuviError {
    /// Attach the device identity being processed when the error occurred.
    pub fn for_device(self, identity: impl Into<String>) -> Self {
        Self::Device {
            identity: identity.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error with any device context peeled off.
    pub fn root(&self) -> &RuuviError {
        match self {
            Self::Device { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self.root(), Self::Connection(err) if err.is_connection_lost())
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), Self::DeadlineExceeded)
    }
}

/// Result type alias for engine operations.
pub type RuuviResult<T> = Result<T, RuuviError>;
