// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for duroflow-core.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the run log and the data model.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Run was not found in the run log.
    RunNotFound {
        /// The run ID that was not found.
        run_id: String,
    },

    /// Persisting a run failed. The previously stored log is left intact.
    PersistFailed {
        /// The run ID.
        run_id: String,
        /// The reason for failure.
        reason: String,
    },

    /// A stored value could not be encoded or decoded.
    SerializationError {
        /// What was being (de)serialized.
        context: String,
        /// Error details.
        details: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::PersistFailed { .. } => "PERSIST_FAILED",
            Self::SerializationError { .. } => "SERIALIZATION_ERROR",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "Run '{}' not found", run_id),
            Self::PersistFailed { run_id, reason } => {
                write!(f, "Failed to persist run '{}': {}", run_id, reason)
            }
            Self::SerializationError { context, details } => {
                write!(f, "Serialization error in {}: {}", context, details)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError {
            context: "json".to_string(),
            details: err.to_string(),
        }
    }
}
