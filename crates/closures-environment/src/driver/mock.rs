// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock driver for testing.
//!
//! Simulates script execution without an interpreter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use closures_core::Bindings;
use serde_json::Value;

use super::traits::*;

/// What the mock does when run.
#[derive(Debug, Clone)]
enum MockBehavior {
    /// Copy each declared output name from the inputs, null if absent.
    EchoInputs,
    /// Return fixed outputs.
    Returning(Bindings),
    /// Fail with a script error.
    Failing(String),
    /// Spin until cancelled.
    NeverCompleting,
}

/// Mock driver for testing.
pub struct MockDriver {
    behavior: MockBehavior,
    /// Simulated execution time.
    pub execution_delay: Duration,
    invocations: AtomicUsize,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// A driver that echoes declared outputs from the inputs.
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::EchoInputs)
    }

    /// A driver that always returns `outputs`.
    pub fn returning(outputs: Bindings) -> Self {
        Self::with_behavior(MockBehavior::Returning(outputs))
    }

    /// A driver that always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Failing(message.into()))
    }

    /// A driver whose invocations only end through cancellation.
    /// Useful for testing timeout enforcement.
    pub fn never_completing() -> Self {
        Self::with_behavior(MockBehavior::NeverCompleting)
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            execution_delay: Duration::from_millis(10),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Set the simulated execution time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Number of times [`Driver::run`] was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, request: &ExecutionRequest, cancel_token: CancelToken) -> Result<Bindings> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if !self.execution_delay.is_zero() {
            tokio::time::sleep(self.execution_delay).await;
        }

        match &self.behavior {
            MockBehavior::EchoInputs => Ok(request
                .output_names
                .iter()
                .map(|name| {
                    let value = request.inputs.get(name).cloned().unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect()),
            MockBehavior::Returning(outputs) => Ok(outputs.clone()),
            MockBehavior::Failing(message) => Err(DriverError::Script(message.clone())),
            MockBehavior::NeverCompleting => loop {
                if request.should_stop(&cancel_token) {
                    return Err(DriverError::Interrupted);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ExecutionRequest {
        ExecutionRequest::new(
            "c-1",
            1,
            "ignored",
            json!({"a": 3}).as_object().cloned().unwrap(),
            vec!["a".to_string(), "b".to_string()],
        )
    }

    #[tokio::test]
    async fn test_echo_inputs() {
        let driver = MockDriver::new();
        let outputs = driver.run(&request(), new_cancel_token()).await.unwrap();

        assert_eq!(Value::Object(outputs), json!({"a": 3, "b": null}));
        assert_eq!(driver.invocations(), 1);
    }

    #[tokio::test]
    async fn test_failing() {
        let driver = MockDriver::failing("TypeError: boom");
        let err = driver.run(&request(), new_cancel_token()).await.unwrap_err();
        assert!(matches!(err, DriverError::Script(msg) if msg == "TypeError: boom"));
    }

    #[tokio::test]
    async fn test_never_completing_stops_on_cancel() {
        let driver = MockDriver::never_completing();
        let token = new_cancel_token();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.store(true, Ordering::SeqCst);
        });

        let err = driver.run(&request(), token).await.unwrap_err();
        assert!(matches!(err, DriverError::Interrupted));
    }
}
