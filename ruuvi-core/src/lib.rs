//! RuuviTag Core - Retrieval Engine Primitives
//!
//! I/O-free building blocks for reading the latest RuuviTag measurements out
//! of a relational store whose column names are supplied at runtime:
//! - [`ColumnMapping`]: validated logical-to-physical column names
//! - [`QueryBuilder`]: parameterized SQL text for identity lists and latest-N
//! - [`RowCollector`]: decodes a row into a sparse [`Record`]

use chrono::{DateTime, Utc};

pub mod collect;
pub mod error;
pub mod field;
pub mod mapping;
pub mod query;
pub mod record;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use collect::{scan_identity, RowCollector, RowReader};
pub use error::{
    ConfigError, ConnectionError, DecodeError, InvalidColumnError, RuuviError, RuuviResult,
    ValidationError,
};
pub use field::{Field, FieldKind};
pub use mapping::{
    validate_column_identifier, validate_mapping, validate_table_identifier, ColumnMapping,
};
pub use query::{clean_for_logging, QueryBuilder};
pub use record::{Record, Value};
