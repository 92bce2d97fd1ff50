// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for closures-core.
//!
//! Every variant maps to a stable error code that the HTTP layer forwards to clients.

use std::fmt;

use crate::state::ClosureState;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors returned by the closure store.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed description or instance input. Never stored.
    InvalidArgument {
        /// The offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Closure description was not found.
    DescriptionNotFound {
        /// The description ID that was not found.
        description_id: String,
    },

    /// Closure was not found.
    ClosureNotFound {
        /// The closure ID that was not found.
        closure_id: String,
    },

    /// An execution of this closure is already in flight.
    Conflict {
        /// The closure ID.
        closure_id: String,
        /// Generation of the in-flight execution.
        generation: i64,
    },

    /// Terminal transition against a non-STARTED record or another generation.
    StaleTransition {
        /// The closure ID.
        closure_id: String,
        /// Generation the caller tried to finalize.
        attempted_generation: i64,
        /// Generation currently stored.
        current_generation: i64,
        /// State currently stored.
        current_state: ClosureState,
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
    /// Shorthand for an [`CoreError::InvalidArgument`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::DescriptionNotFound { .. } => "DESCRIPTION_NOT_FOUND",
            Self::ClosureNotFound { .. } => "CLOSURE_NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::StaleTransition { .. } => "STALE_TRANSITION",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error rejects a transition without touching the record.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StaleTransition { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { field, message } => {
                write!(f, "Invalid argument '{}': {}", field, message)
            }
            Self::DescriptionNotFound { description_id } => {
                write!(f, "Closure description '{}' not found", description_id)
            }
            Self::ClosureNotFound { closure_id } => {
                write!(f, "Closure '{}' not found", closure_id)
            }
            Self::Conflict {
                closure_id,
                generation,
            } => {
                write!(
                    f,
                    "Closure '{}' is already executing (generation {})",
                    closure_id, generation
                )
            }
            Self::StaleTransition {
                closure_id,
                attempted_generation,
                current_generation,
                current_state,
            } => {
                write!(
                    f,
                    "Stale transition for closure '{}': generation {} is not in flight (current generation {}, state {})",
                    closure_id, attempted_generation, current_generation, current_state
                )
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
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (CoreError::invalid("runtimeId", "must not be empty"), "INVALID_ARGUMENT"),
            (
                CoreError::DescriptionNotFound {
                    description_id: "d-1".to_string(),
                },
                "DESCRIPTION_NOT_FOUND",
            ),
            (
                CoreError::ClosureNotFound {
                    closure_id: "c-1".to_string(),
                },
                "CLOSURE_NOT_FOUND",
            ),
            (
                CoreError::Conflict {
                    closure_id: "c-1".to_string(),
                    generation: 2,
                },
                "CONFLICT",
            ),
            (
                CoreError::StaleTransition {
                    closure_id: "c-1".to_string(),
                    attempted_generation: 1,
                    current_generation: 2,
                    current_state: ClosureState::Started,
                },
                "STALE_TRANSITION",
            ),
            (
                CoreError::DatabaseError {
                    operation: "insert".to_string(),
                    details: "disk full".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(error.error_code(), expected_code, "for {:?}", error);
        }
    }

    #[test]
    fn test_stale_transition_display() {
        let err = CoreError::StaleTransition {
            closure_id: "c-42".to_string(),
            attempted_generation: 1,
            current_generation: 1,
            current_state: ClosureState::Cancelled,
        };
        let msg = err.to_string();
        assert!(msg.contains("c-42"));
        assert!(msg.contains("generation 1"));
        assert!(msg.contains("CANCELLED"));
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = CoreError::invalid("descriptionRef", "must reference an existing description");
        assert_eq!(
            err.to_string(),
            "Invalid argument 'descriptionRef': must reference an existing description"
        );
    }

    #[test]
    fn test_is_rejection() {
        assert!(
            CoreError::Conflict {
                closure_id: "c".to_string(),
                generation: 1
            }
            .is_rejection()
        );
        assert!(!CoreError::invalid("name", "empty").is_rejection());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CoreError = json_err.into();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }
}
