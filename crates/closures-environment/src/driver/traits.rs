// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Driver trait definitions.
//!
//! Defines the abstract interface for script runtimes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use closures_core::Bindings;
use thiserror::Error;

/// Errors from driver operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Compile error, reference error or uncaught exception inside the script.
    #[error("{0}")]
    Script(String),

    /// A value cannot cross the sandbox boundary.
    #[error("Unsupported value at '{path}': {reason}")]
    UnsupportedValue {
        /// Location of the value, e.g. `inputs.a[2]`.
        path: String,
        /// Why it cannot be converted.
        reason: String,
    },

    /// Execution was stopped through the cancel token or the deadline.
    #[error("Execution interrupted")]
    Interrupted,

    /// The interpreter could not be started.
    #[error("Driver start failed: {0}")]
    StartFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Names every driver binds into the script scope itself. An input with one of
/// these names would be shadowed, so it is rejected before execution.
pub const RESERVED_INPUT_NAMES: &[&str] = &["inputs", "print", "console"];

/// The first input name that collides with a driver binding, if any.
pub fn reserved_input_name(inputs: &Bindings) -> Option<&str> {
    inputs
        .keys()
        .map(String::as_str)
        .find(|name| RESERVED_INPUT_NAMES.contains(name))
}

/// Cancellation token for stopping execution.
pub type CancelToken = Arc<AtomicBool>;

/// Create a token in the not-cancelled state.
pub fn new_cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// One script invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Closure the invocation belongs to, used for logging.
    pub closure_id: String,
    /// Execution generation, used for logging.
    pub generation: i64,
    /// Script text.
    pub source: String,
    /// Values bound into the script scope.
    pub inputs: Bindings,
    /// Names read back after the script returns.
    pub output_names: Vec<String>,
    /// Hard deadline; set by the timeout supervisor.
    pub deadline: Option<Instant>,
    /// Interpreter heap limit.
    pub memory_limit_bytes: Option<usize>,
}

impl ExecutionRequest {
    /// Create a request without deadline or memory limit.
    pub fn new(
        closure_id: impl Into<String>,
        generation: i64,
        source: impl Into<String>,
        inputs: Bindings,
        output_names: Vec<String>,
    ) -> Self {
        Self {
            closure_id: closure_id.into(),
            generation,
            source: source.into(),
            inputs,
            output_names,
            deadline: None,
            memory_limit_bytes: None,
        }
    }

    /// Set the interpreter heap limit.
    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Whether the deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether the invocation should stop now.
    pub fn should_stop(&self, cancel_token: &CancelToken) -> bool {
        cancel_token.load(Ordering::SeqCst) || self.deadline_passed()
    }
}

/// A script runtime.
///
/// Each call to [`run`](Driver::run) evaluates `source` in a fresh context,
/// binds `inputs`, and returns one entry per name in `output_names`, with
/// JSON null for names the script never assigned. Drivers must stop promptly
/// once the cancel token is set, even inside a loop that never yields, and
/// report that as [`DriverError::Interrupted`].
///
/// Drivers do not touch the closure store; the coordinator records outcomes.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver type identifier (e.g. "quickjs", "process").
    fn driver_type(&self) -> &'static str;

    /// Run one invocation to completion, failure or interruption.
    async fn run(&self, request: &ExecutionRequest, cancel_token: CancelToken) -> Result<Bindings>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reserved_input_name() {
        let mut inputs = Bindings::new();
        inputs.insert("a".to_string(), 1.into());
        assert_eq!(reserved_input_name(&inputs), None);

        inputs.insert("console".to_string(), 2.into());
        assert_eq!(reserved_input_name(&inputs), Some("console"));
    }

    #[test]
    fn test_should_stop_on_cancel() {
        let request = ExecutionRequest::new("c-1", 1, "x", Bindings::new(), vec![]);
        let token = new_cancel_token();
        assert!(!request.should_stop(&token));

        token.store(true, Ordering::SeqCst);
        assert!(request.should_stop(&token));
    }

    #[test]
    fn test_should_stop_on_deadline() {
        let mut request = ExecutionRequest::new("c-1", 1, "x", Bindings::new(), vec![]);
        request.deadline = Some(Instant::now() - Duration::from_millis(1));
        assert!(request.should_stop(&new_cancel_token()));
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::UnsupportedValue {
            path: "outputs.result".to_string(),
            reason: "functions cannot be converted".to_string(),
        };
        assert!(err.to_string().contains("outputs.result"));
        assert_eq!(
            DriverError::Script("ReferenceError: x is not defined".to_string()).to_string(),
            "ReferenceError: x is not defined"
        );
    }
}
