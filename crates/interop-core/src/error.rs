use thiserror::Error;

/// Core error types for interop broker operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid incident source: {0}")]
    InvalidSource(String),

    #[error("Invalid coordinate {field}: {value}")]
    InvalidCoordinate { field: &'static str, value: f64 },

    #[error("Invalid incident data: {message}")]
    InvalidIncident { message: String },

    #[error("Consumer already registered: {0}")]
    DuplicateConsumer(String),
}

impl CoreError {
    /// Create a new InvalidTimestamp error
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp(value.into())
    }

    /// Create a new InvalidSource error
    pub fn invalid_source(value: impl Into<String>) -> Self {
        Self::InvalidSource(value.into())
    }

    /// Create a new InvalidIncident error
    pub fn invalid_incident(message: impl Into<String>) -> Self {
        Self::InvalidIncident {
            message: message.into(),
        }
    }

    /// Check if this error was caused by the submitted data
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::DuplicateConsumer(_))
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTimestamp(_)
            | Self::InvalidSource(_)
            | Self::InvalidCoordinate { .. }
            | Self::InvalidIncident { .. } => ErrorCategory::Validation,
            Self::DuplicateConsumer(_) => ErrorCategory::System,
        }
    }
}

/// Error categories for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    System,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::System => write!(f, "system"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
