use interop_core::{CoreError, IncidentSource};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::contract::RecordKind;

/// Why a submitted payload was not turned into a canonical event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Payload must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Field {field} must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Field {field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid timestamp in {field}: {reason}")]
    InvalidTimestamp { field: &'static str, reason: String },

    #[error("{adapter} adapter does not handle {kind} records")]
    UnsupportedRecord {
        adapter: IncidentSource,
        kind: RecordKind,
    },

    #[error("Invalid incident: {0}")]
    InvalidIncident(String),
}

impl ValidationError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingField(_) => "missing_field",
            Self::EmptyField(_) => "empty_field",
            Self::InvalidType { .. } => "invalid_type",
            Self::OutOfRange { .. } => "out_of_range",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::UnsupportedRecord { .. } => "unsupported_record",
            Self::InvalidIncident(_) => "invalid_incident",
        }
    }

    /// The offending field, when the error concerns a single field.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField(field) | Self::EmptyField(field) => Some(*field),
            Self::InvalidType { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidTimestamp { field, .. } => Some(*field),
            _ => None,
        }
    }
}

impl From<CoreError> for ValidationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCoordinate { field, value } => Self::OutOfRange { field, value },
            CoreError::InvalidTimestamp(reason) => Self::InvalidTimestamp {
                field: "timestamp",
                reason,
            },
            other => Self::InvalidIncident(other.to_string()),
        }
    }
}

/// Result of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A new canonical event was published.
    Accepted { event_id: String },
    /// The natural key was already ingested; nothing new was published.
    Duplicate { incident_id: String },
    /// The payload failed validation.
    Rejected(#[serde(serialize_with = "serialize_rejection")] ValidationError),
}

fn serialize_rejection<S: Serializer>(
    error: &ValidationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("reason", error.code())?;
    map.serialize_entry("message", &error.to_string())?;
    map.end()
}

impl IngestOutcome {
    pub fn rejected(error: ValidationError) -> Self {
        Self::Rejected(error)
    }

    /// True for accepted and duplicate submissions.
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Reason code for rejections.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Rejected(error) => Some(error.code()),
            _ => None,
        }
    }

    pub fn validation_error(&self) -> Option<&ValidationError> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }
}
