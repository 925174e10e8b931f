//! Logical measurement fields.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the fixed, named measurement attributes a RuuviTag reports,
/// independent of what the backing table calls the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Time,
    Mac,
    Name,
    Temperature,
    Humidity,
    Pressure,
    DewPoint,
    BatteryVoltage,
    TxPower,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    MovementCounter,
    MeasurementNumber,
}

/// Destination type a column decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Timestamp,
    Float,
    Integer,
    Text,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Time,
        Field::Mac,
        Field::Name,
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::DewPoint,
        Field::BatteryVoltage,
        Field::TxPower,
        Field::AccelerationX,
        Field::AccelerationY,
        Field::AccelerationZ,
        Field::MovementCounter,
        Field::MeasurementNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Time => "time",
            Field::Mac => "mac",
            Field::Name => "name",
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
            Field::DewPoint => "dew_point",
            Field::BatteryVoltage => "battery_voltage",
            Field::TxPower => "tx_power",
            Field::AccelerationX => "acceleration_x",
            Field::AccelerationY => "acceleration_y",
            Field::AccelerationZ => "acceleration_z",
            Field::MovementCounter => "movement_counter",
            Field::MeasurementNumber => "measurement_number",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Time => FieldKind::Timestamp,
            Field::Mac | Field::Name => FieldKind::Text,
            Field::Temperature
            | Field::Humidity
            | Field::Pressure
            | Field::DewPoint
            | Field::BatteryVoltage => FieldKind::Float,
            Field::TxPower
            | Field::AccelerationX
            | Field::AccelerationY
            | Field::AccelerationZ
            | Field::MovementCounter
            | Field::MeasurementNumber => FieldKind::Integer,
        }
    }

    /// Whether this field identifies the device rather than measuring it.
    pub fn is_identity(&self) -> bool {
        matches!(self, Field::Mac | Field::Name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownField {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>(), Ok(field));
        }
    }

    #[test]
    fn test_unknown_field() {
        let err = "humidity_pct".parse::<Field>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownField {
                name: "humidity_pct".to_string()
            }
        );
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(Field::Time.kind(), FieldKind::Timestamp);
        assert_eq!(Field::Name.kind(), FieldKind::Text);
        assert_eq!(Field::Mac.kind(), FieldKind::Text);
        assert_eq!(Field::DewPoint.kind(), FieldKind::Float);
        assert_eq!(Field::BatteryVoltage.kind(), FieldKind::Float);
        assert_eq!(Field::TxPower.kind(), FieldKind::Integer);
        assert_eq!(Field::MeasurementNumber.kind(), FieldKind::Integer);
    }

    #[test]
    fn test_serde_uses_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Field::DewPoint)?, "\"dew_point\"");
        let field: Field = serde_json::from_str("\"acceleration_z\"")?;
        assert_eq!(field, Field::AccelerationZ);
        Ok(())
    }
}
