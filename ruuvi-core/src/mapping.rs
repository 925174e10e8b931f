//! Logical-to-physical column mapping.
//!
//! The mapping is validated once when the service starts and is immutable
//! afterwards. Requested column lists arrive per request, so those are checked
//! on every retrieval call with [`ColumnMapping::validate_requested_columns`].

use crate::error::{ConfigError, InvalidColumnError};
use crate::field::Field;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

static COLUMN_IDENTIFIER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

static TABLE_IDENTIFIER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$"));

fn matches(pattern: &Lazy<Result<Regex, regex::Error>>, value: &str) -> bool {
    match &**pattern {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

/// Check that a physical column name is safe to interpolate as an identifier.
pub fn validate_column_identifier(field: Field, value: &str) -> Result<(), ConfigError> {
    if matches(&COLUMN_IDENTIFIER, value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            target: format!("column {}", field),
            value: value.to_string(),
        })
    }
}

/// Check that a table name (optionally schema-qualified) is safe to interpolate.
pub fn validate_table_identifier(target: &str, value: &str) -> Result<(), ConfigError> {
    if matches(&TABLE_IDENTIFIER, value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            target: target.to_string(),
            value: value.to_string(),
        })
    }
}

/// Validate the shape of a raw mapping: it must be non-empty, bind `time`,
/// and bind at least one of `name` or `mac`.
pub fn validate_mapping(columns: &BTreeMap<Field, String>) -> Result<(), ConfigError> {
    if columns.is_empty() {
        return Err(ConfigError::EmptyMapping);
    }
    if !columns.contains_key(&Field::Time) {
        return Err(ConfigError::MissingTimeColumn);
    }
    if !columns.contains_key(&Field::Name) && !columns.contains_key(&Field::Mac) {
        return Err(ConfigError::MissingIdentityColumn);
    }
    Ok(())
}

/// Validated dictionary from logical field to physical column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<Field, String>,
}

impl ColumnMapping {
    pub fn new(columns: BTreeMap<Field, String>) -> Result<Self, ConfigError> {
        validate_mapping(&columns)?;
        for (field, physical) in &columns {
            validate_column_identifier(*field, physical)?;
        }
        Ok(Self { columns })
    }

    /// Build a mapping from `(logical, physical)` string pairs, as read from
    /// configuration.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut columns = BTreeMap::new();
        for (logical, physical) in pairs {
            let field: Field = logical.as_ref().trim().parse()?;
            columns.insert(field, physical.into());
        }
        Self::new(columns)
    }

    /// Parse the `logical=physical,logical=physical` form used in environment
    /// configuration.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut pairs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (logical, physical) =
                entry
                    .split_once('=')
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "columns".to_string(),
                        value: entry.to_string(),
                        reason: "expected logical=physical".to_string(),
                    })?;
            pairs.push((logical.trim().to_string(), physical.trim().to_string()));
        }
        Self::from_pairs(pairs)
    }

    pub fn physical(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    /// Reverse lookup. When several logical fields share a physical name the
    /// first in declaration order wins.
    pub fn field_for(&self, physical: &str) -> Option<Field> {
        self.columns
            .iter()
            .find(|(_, p)| p.as_str() == physical)
            .map(|(field, _)| *field)
    }

    pub fn time_column(&self) -> &str {
        self.physical(Field::Time).unwrap_or_default()
    }

    /// The column device identities are stored in: `name` when mapped,
    /// otherwise `mac`.
    pub fn identity_column(&self) -> &str {
        self.physical(Field::Name)
            .or_else(|| self.physical(Field::Mac))
            .unwrap_or_default()
    }

    /// Every distinct physical column, in logical field order.
    pub fn physical_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.columns.len());
        for physical in self.columns.values() {
            if !out.contains(physical) {
                out.push(physical.clone());
            }
        }
        out
    }

    /// Physical name to logical field, built once for row decoding.
    pub fn reverse(&self) -> HashMap<String, Field> {
        let mut reverse = HashMap::with_capacity(self.columns.len());
        for (field, physical) in &self.columns {
            reverse.entry(physical.clone()).or_insert(*field);
        }
        reverse
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.columns.iter().map(|(f, p)| (*f, p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check a caller-supplied list of physical column names.
    pub fn validate_requested_columns(&self, requested: &[String]) -> Result<(), InvalidColumnError> {
        if requested.is_empty() {
            return Err(InvalidColumnError::Empty);
        }
        for column in requested {
            if !self.columns.values().any(|p| p == column) {
                return Err(InvalidColumnError::Unknown {
                    column: column.clone(),
                });
            }
        }

        let time = self.time_column();
        if !requested.iter().any(|c| c == time) {
            return Err(InvalidColumnError::MissingTime {
                column: time.to_string(),
            });
        }

        let name = self.physical(Field::Name);
        let mac = self.physical(Field::Mac);
        let has_identity = requested
            .iter()
            .any(|c| Some(c.as_str()) == name || Some(c.as_str()) == mac);
        if !has_identity {
            let columns = [name, mac]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(InvalidColumnError::MissingIdentity { columns });
        }
        Ok(())
    }
}

impl Default for ColumnMapping {
    /// Every logical field mapped to a column of the same name.
    fn default() -> Self {
        Self {
            columns: Field::ALL
                .iter()
                .map(|field| (*field, field.as_str().to_string()))
                .collect(),
        }
    }
}
