//! Sparse measurement records.

use crate::error::DecodeError;
use crate::field::{Field, FieldKind};
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A single decoded scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Timestamp(Timestamp),
    Float(f64),
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Timestamp(_) => FieldKind::Timestamp,
            Value::Float(_) => FieldKind::Float,
            Value::Integer(_) => FieldKind::Integer,
            Value::Text(_) => FieldKind::Text,
        }
    }
}

/// One measurement. Only `timestamp` is always present; every other field is
/// set only when its column was requested and the store returned a non-null
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "time")]
    pub timestamp: Timestamp,
    #[serde(rename = "mac", default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_counter: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_number: Option<i64>,
}

impl Record {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            addr: None,
            name: None,
            temperature: None,
            humidity: None,
            pressure: None,
            dew_point: None,
            battery_voltage: None,
            tx_power: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            movement_counter: None,
            measurement_number: None,
        }
    }

    fn float_slot(&mut self, field: Field) -> Option<&mut Option<f64>> {
        match field {
            Field::Temperature => Some(&mut self.temperature),
            Field::Humidity => Some(&mut self.humidity),
            Field::Pressure => Some(&mut self.pressure),
            Field::DewPoint => Some(&mut self.dew_point),
            Field::BatteryVoltage => Some(&mut self.battery_voltage),
            _ => None,
        }
    }

    fn integer_slot(&mut self, field: Field) -> Option<&mut Option<i64>> {
        match field {
            Field::TxPower => Some(&mut self.tx_power),
            Field::AccelerationX => Some(&mut self.acceleration_x),
            Field::AccelerationY => Some(&mut self.acceleration_y),
            Field::AccelerationZ => Some(&mut self.acceleration_z),
            Field::MovementCounter => Some(&mut self.movement_counter),
            Field::MeasurementNumber => Some(&mut self.measurement_number),
            _ => None,
        }
    }

    fn text_slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Mac => Some(&mut self.addr),
            Field::Name => Some(&mut self.name),
            _ => None,
        }
    }

    /// Store `value` in the slot for `field`. `None` leaves the slot absent.
    pub fn set(&mut self, field: Field, value: Option<Value>) -> Result<(), DecodeError> {
        let mismatch = |found: &Value| DecodeError::TypeMismatch {
            column: field.to_string(),
            expected: field.kind(),
            found: format!("{:?}", found.kind()),
        };
        match value {
            None => Ok(()),
            Some(Value::Timestamp(ts)) if field == Field::Time => {
                self.timestamp = ts;
                Ok(())
            }
            Some(Value::Float(v)) => match self.float_slot(field) {
                Some(slot) => {
                    *slot = Some(v);
                    Ok(())
                }
                None => Err(mismatch(&Value::Float(v))),
            },
            Some(Value::Integer(v)) => match self.integer_slot(field) {
                Some(slot) => {
                    *slot = Some(v);
                    Ok(())
                }
                None => Err(mismatch(&Value::Integer(v))),
            },
            Some(Value::Text(v)) => match self.text_slot(field) {
                Some(slot) => {
                    *slot = Some(v);
                    Ok(())
                }
                None => Err(mismatch(&Value::Text(v))),
            },
            Some(other) => Err(mismatch(&other)),
        }
    }

    pub fn get(&self, field: Field) -> Option<Value> {
        match field {
            Field::Time => Some(Value::Timestamp(self.timestamp)),
            Field::Mac => self.addr.clone().map(Value::Text),
            Field::Name => self.name.clone().map(Value::Text),
            Field::Temperature => self.temperature.map(Value::Float),
            Field::Humidity => self.humidity.map(Value::Float),
            Field::Pressure => self.pressure.map(Value::Float),
            Field::DewPoint => self.dew_point.map(Value::Float),
            Field::BatteryVoltage => self.battery_voltage.map(Value::Float),
            Field::TxPower => self.tx_power.map(Value::Integer),
            Field::AccelerationX => self.acceleration_x.map(Value::Integer),
            Field::AccelerationY => self.acceleration_y.map(Value::Integer),
            Field::AccelerationZ => self.acceleration_z.map(Value::Integer),
            Field::MovementCounter => self.movement_counter.map(Value::Integer),
            Field::MeasurementNumber => self.measurement_number.map(Value::Integer),
        }
    }

    /// Remove and return the device identity: the name when present and
    /// non-empty, otherwise the address.
    pub fn take_identity(&mut self) -> Option<String> {
        match self.name.take() {
            Some(name) if !name.is_empty() => Some(name),
            _ => self.addr.take(),
        }
    }
}
