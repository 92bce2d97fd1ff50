// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timeout supervision of driver invocations.
//!
//! The supervisor races a driver invocation against its deadline. Whichever
//! finishes first decides the single [`ExecutionOutcome`] of the invocation:
//!
//! ```text
//!   driver.run() ──► Ok(outputs)        ──► Finished
//!                ──► Err(Script/...)    ──► Failed(message)
//!                ──► Err(Interrupted)   ──► DeadlineExceeded
//!   sleep_until(deadline) fires first   ──► set cancel token, drop run ──► DeadlineExceeded
//! ```
//!
//! When the deadline wins, the driver future is dropped without waiting for it.
//! Drivers watch the cancel token (and the deadline carried on the request), so
//! the interpreter thread or child process winds down on its own; its late
//! result, if any, is discarded.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use closures_core::Bindings;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverError, ExecutionRequest, new_cancel_token};

/// Message recorded when a script fails without one.
const EMPTY_ERROR_MESSAGE: &str = "Script failed without an error message";

/// The one outcome of a supervised invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The script returned; one entry per declared output.
    Finished(Bindings),
    /// The script failed; the interpreter's message.
    Failed(String),
    /// The deadline elapsed first.
    DeadlineExceeded,
}

impl ExecutionOutcome {
    /// Short name for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Finished(_) => "finished",
            Self::Failed(_) => "failed",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    fn from_driver_result(result: Result<Bindings, DriverError>) -> Self {
        match result {
            Ok(outputs) => Self::Finished(outputs),
            Err(DriverError::Interrupted) => Self::DeadlineExceeded,
            Err(DriverError::Script(message)) if message.trim().is_empty() => {
                Self::Failed(EMPTY_ERROR_MESSAGE.to_string())
            }
            Err(DriverError::Script(message)) => Self::Failed(message),
            Err(other) => Self::Failed(other.to_string()),
        }
    }
}

/// Runs driver invocations under a wall-clock deadline.
#[derive(Debug, Clone, Default)]
pub struct TimeoutSupervisor;

impl TimeoutSupervisor {
    /// Create a supervisor.
    pub fn new() -> Self {
        Self
    }

    /// Run `request` on `driver`, giving up after `timeout`.
    ///
    /// The deadline starts when this method is called and is stored on the
    /// request so drivers can check it without the token.
    pub async fn supervise(
        &self,
        driver: Arc<dyn Driver>,
        mut request: ExecutionRequest,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let cancel_token = new_cancel_token();
        let started = Instant::now();
        // A timeout past the clock's range means no deadline at all.
        let deadline = started.checked_add(timeout);
        request.deadline = deadline;

        debug!(
            closure_id = %request.closure_id,
            generation = request.generation,
            driver_type = driver.driver_type(),
            timeout_ms = timeout.as_millis() as u64,
            "Supervising closure execution"
        );

        let outcome = tokio::select! {
            biased;

            result = driver.run(&request, cancel_token.clone()) => {
                ExecutionOutcome::from_driver_result(result)
            }

            _ = expire_at(deadline) => {
                cancel_token.store(true, Ordering::SeqCst);
                warn!(
                    closure_id = %request.closure_id,
                    generation = request.generation,
                    timeout_secs = timeout.as_secs_f64(),
                    "Closure deadline exceeded, interrupting driver"
                );
                ExecutionOutcome::DeadlineExceeded
            }
        };

        info!(
            closure_id = %request.closure_id,
            generation = request.generation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            outcome = outcome.label(),
            "Closure execution ended"
        );
        outcome
    }
}

async fn expire_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
