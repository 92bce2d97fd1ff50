// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that cancels overdue STARTED closures.
//!
//! The supervisor cancels its own executions on time. A closure can still be
//! left STARTED when no supervisor is watching it, for example after a restart
//! with a file-backed store, or when an external executor never reported back
//! through `PATCH /closures/{id}`. The monitor periodically lists STARTED
//! closures and cancels every generation older than its description's timeout
//! plus a grace margin. Executions tracked by this process are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use closures_core::{ClosureRecord, ClosureStore, CoreError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::executor::InFlight;

/// Maximum number of STARTED closures examined per sweep.
const SWEEP_BATCH_SIZE: i64 = 500;

/// Configuration for the timeout monitor.
#[derive(Debug, Clone)]
pub struct TimeoutMonitorConfig {
    /// How often to look for overdue closures.
    pub poll_interval: Duration,
    /// Extra time past the timeout before a closure counts as overdue.
    pub timeout_grace: Duration,
}

impl Default for TimeoutMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout_grace: Duration::from_secs(5),
        }
    }
}

/// Background worker that cancels overdue closures.
pub struct TimeoutMonitor {
    store: ClosureStore,
    in_flight: InFlight,
    config: TimeoutMonitorConfig,
    shutdown: Arc<Notify>,
}

impl TimeoutMonitor {
    /// Create a new timeout monitor.
    pub fn new(store: ClosureStore, in_flight: InFlight, config: TimeoutMonitorConfig) -> Self {
        Self {
            store,
            in_flight,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the monitor loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            timeout_grace_secs = self.config.timeout_grace.as_secs_f64(),
            "Timeout monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Timeout monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Failed to sweep overdue closures");
                    }
                }
            }
        }

        info!("Timeout monitor stopped");
    }

    /// Cancel every overdue closure not tracked by this process.
    ///
    /// Returns the number of closures cancelled.
    pub async fn sweep(&self) -> closures_core::Result<usize> {
        let now = Utc::now();
        let started = self.store.list_started(SWEEP_BATCH_SIZE).await?;
        if started.is_empty() {
            debug!("No started closures");
            return Ok(0);
        }

        let mut timeouts: HashMap<String, Duration> = HashMap::new();
        let mut cancelled = 0;

        for record in started {
            if self.in_flight.contains(&record.id, record.execution_generation) {
                continue;
            }

            let timeout = match timeouts.get(&record.description_ref) {
                Some(timeout) => *timeout,
                None => {
                    let description = self.store.get_description(&record.description_ref).await?;
                    let timeout = description.resource_constraints.timeout();
                    timeouts.insert(record.description_ref.clone(), timeout);
                    timeout
                }
            };

            if !is_overdue(&record, timeout.saturating_add(self.config.timeout_grace), now) {
                continue;
            }

            match self
                .store
                .cancel_on_timeout(&record.id, record.execution_generation)
                .await
            {
                Ok(_) => {
                    warn!(
                        closure_id = %record.id,
                        generation = record.execution_generation,
                        "Cancelled overdue closure"
                    );
                    cancelled += 1;
                }
                Err(CoreError::StaleTransition { .. }) => {
                    debug!(closure_id = %record.id, "Closure settled before the sweep reached it");
                }
                Err(e) => {
                    error!(closure_id = %record.id, error = %e, "Failed to cancel overdue closure");
                }
            }
        }

        if cancelled > 0 {
            info!(cancelled, "Timeout sweep finished");
        }
        Ok(cancelled)
    }
}

fn is_overdue(record: &ClosureRecord, allowed: Duration, now: DateTime<Utc>) -> bool {
    let Some(started_at) = record.started_at else {
        return false;
    };
    chrono::Duration::from_std(allowed)
        .ok()
        .and_then(|allowed| started_at.checked_add_signed(allowed))
        .is_some_and(|expiry| expiry < now)
}
