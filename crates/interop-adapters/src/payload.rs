//! Typed field access over a raw JSON payload.

use interop_core::parse_timestamp;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::outcome::ValidationError;

/// Read-only view over a submitted JSON object.
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a Value) -> Result<Self, ValidationError> {
        payload
            .as_object()
            .map(|fields| Self { fields })
            .ok_or(ValidationError::NotAnObject)
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.fields
    }

    /// Check that every listed field is present and non-null.
    pub fn require_all(&self, fields: &[&'static str]) -> Result<(), ValidationError> {
        match fields.iter().find(|f| self.present(f).is_none()) {
            Some(missing) => Err(ValidationError::MissingField(*missing)),
            None => Ok(()),
        }
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Required non-empty string. Numbers are accepted and rendered as text.
    pub fn required_str(&self, field: &'static str) -> Result<String, ValidationError> {
        let value = self
            .present(field)
            .ok_or(ValidationError::MissingField(field))?;
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => {
                return Err(ValidationError::InvalidType {
                    field,
                    expected: "a string",
                });
            }
        };
        if text.is_empty() {
            return Err(ValidationError::EmptyField(field));
        }
        Ok(text)
    }

    /// Optional string; blank strings count as absent.
    pub fn optional_str(&self, field: &'static str) -> Result<Option<String>, ValidationError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(ValidationError::InvalidType {
                field,
                expected: "a string",
            }),
        }
    }

    /// Required number, given either as a JSON number or a numeric string.
    pub fn required_f64(&self, field: &'static str) -> Result<f64, ValidationError> {
        let value = self
            .present(field)
            .ok_or(ValidationError::MissingField(field))?;
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s.trim().is_empty() => {
                return Err(ValidationError::EmptyField(field));
            }
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number
            .filter(|n| n.is_finite())
            .ok_or(ValidationError::InvalidType {
                field,
                expected: "a number",
            })
    }

    /// Required whole, non-negative number.
    pub fn required_count(&self, field: &'static str) -> Result<u64, ValidationError> {
        let number = self.required_f64(field)?;
        if number < 0.0 || number.fract() != 0.0 {
            return Err(ValidationError::InvalidType {
                field,
                expected: "a non-negative whole number",
            });
        }
        Ok(number as u64)
    }

    /// Latitude and longitude, range-checked.
    pub fn coordinates(&self) -> Result<(f64, f64), ValidationError> {
        let lat = self.required_f64("lat")?;
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::OutOfRange {
                field: "lat",
                value: lat,
            });
        }
        let lon = self.required_f64("lon")?;
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::OutOfRange {
                field: "lon",
                value: lon,
            });
        }
        Ok((lat, lon))
    }

    pub fn timestamp(&self, field: &'static str) -> Result<OffsetDateTime, ValidationError> {
        let value = self.required_str(field)?;
        parse_timestamp(&value).map_err(|e| ValidationError::InvalidTimestamp {
            field,
            reason: e.to_string(),
        })
    }
}
