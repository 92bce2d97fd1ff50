// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution coordinator.
//!
//! Glues the registry, the supervisor and the closure store together:
//!
//! 1. Resolve the description's driver. Unknown runtimes and inputs named
//!    after a driver binding are rejected here, before the record is touched.
//! 2. `start` the closure in the store, opening a new generation.
//! 3. Spawn a task that waits for a concurrency permit, runs the supervised
//!    invocation and applies `complete`, `fail` or `cancel_on_timeout` for
//!    that generation.
//!
//! `execute` returns as soon as step 2 is done. Script outcomes never surface
//! as errors of `execute`; they are only visible on the closure record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use closures_core::{Bindings, ClosureRecord, ClosureStore, CoreError};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::driver::{Driver, ExecutionRequest, reserved_input_name};
use crate::error::Result;
use crate::registry::DriverRegistry;
use crate::supervisor::{ExecutionOutcome, TimeoutSupervisor};

/// Default number of simultaneous driver invocations.
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 32;

/// Generations currently being executed by this process, by closure id.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashMap<String, i64>>>,
}

impl InFlight {
    fn insert(&self, closure_id: &str, generation: i64) {
        self.lock().insert(closure_id.to_string(), generation);
    }

    fn remove(&self, closure_id: &str, generation: i64) {
        let mut inner = self.lock();
        if inner.get(closure_id) == Some(&generation) {
            inner.remove(closure_id);
        }
    }

    /// Whether this process is executing `generation` of `closure_id`.
    pub fn contains(&self, closure_id: &str, generation: i64) -> bool {
        self.lock().get(closure_id) == Some(&generation)
    }

    /// Number of executions in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track `generation` until the returned guard is dropped.
    fn track(&self, closure_id: &str, generation: i64) -> InFlightGuard {
        self.insert(closure_id, generation);
        InFlightGuard {
            in_flight: self.clone(),
            closure_id: closure_id.to_string(),
            generation,
        }
    }
}

/// Removes its entry from [`InFlight`] on drop, including when the
/// execution task unwinds.
struct InFlightGuard {
    in_flight: InFlight,
    closure_id: String,
    generation: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.closure_id, self.generation);
    }
}

/// Coordinates closure executions.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    store: ClosureStore,
    registry: Arc<DriverRegistry>,
    supervisor: TimeoutSupervisor,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
}

impl ExecutionCoordinator {
    /// Create a coordinator with the default concurrency limit.
    pub fn new(store: ClosureStore, registry: Arc<DriverRegistry>) -> Self {
        Self::with_max_concurrent(store, registry, DEFAULT_MAX_CONCURRENT_EXECUTIONS)
    }

    /// Create a coordinator running at most `max_concurrent` invocations at once.
    pub fn with_max_concurrent(
        store: ClosureStore,
        registry: Arc<DriverRegistry>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            registry,
            supervisor: TimeoutSupervisor::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: InFlight::default(),
        }
    }

    /// The closure store.
    pub fn store(&self) -> &ClosureStore {
        &self.store
    }

    /// The driver registry.
    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Executions currently running in this process.
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Start executing a closure.
    ///
    /// `inputs` replaces the stored inputs when given. Returns the record as it
    /// stands once the new generation is STARTED; the outcome lands on the
    /// record later.
    pub async fn execute(
        &self,
        closure_id: &str,
        inputs: Option<Bindings>,
    ) -> Result<ClosureRecord> {
        let record = self.store.get(closure_id).await?;
        let description = self.store.get_description(&record.description_ref).await?;
        let driver = self.registry.resolve(&description.runtime_id)?;

        let effective_inputs = inputs.as_ref().unwrap_or(&record.inputs);
        if let Some(name) = reserved_input_name(effective_inputs) {
            return Err(CoreError::invalid(
                format!("inputs.{}", name),
                "name is bound by the runtime",
            )
            .into());
        }

        let generation = self.store.start(closure_id, inputs).await?;
        let guard = self.in_flight.track(closure_id, generation);
        let record = self.store.get(closure_id).await?;

        let request = ExecutionRequest::new(
            closure_id,
            generation,
            description.source,
            record.inputs.clone(),
            description.output_names,
        )
        .with_memory_limit(description.resource_constraints.memory_limit_bytes());
        let timeout = description.resource_constraints.timeout();

        let span = info_span!(
            "closure_execution",
            closure_id = %closure_id,
            generation,
            runtime_id = %description.runtime_id
        );
        let this = self.clone();
        tokio::spawn(
            async move {
                this.run_execution(driver, request, timeout).await;
                drop(guard);
            }
            .instrument(span),
        );

        Ok(record)
    }

    async fn run_execution(
        &self,
        driver: Arc<dyn Driver>,
        request: ExecutionRequest,
        timeout: std::time::Duration,
    ) {
        let closure_id = request.closure_id.clone();
        let generation = request.generation;

        let outcome = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                debug!("Execution permit acquired");
                self.supervisor.supervise(driver, request, timeout).await
            }
            Err(_) => ExecutionOutcome::Failed("Executor is shutting down".to_string()),
        };

        self.record_outcome(&closure_id, generation, outcome).await;
    }

    /// Apply an outcome to the store under the generation guard.
    async fn record_outcome(&self, closure_id: &str, generation: i64, outcome: ExecutionOutcome) {
        let label = outcome.label();
        let result = match outcome {
            ExecutionOutcome::Finished(outputs) => {
                match self.store.complete(closure_id, generation, outputs).await {
                    Err(CoreError::InvalidArgument { message, .. }) => {
                        self.store
                            .fail(closure_id, generation, format!("Invalid outputs: {}", message))
                            .await
                    }
                    other => other,
                }
            }
            ExecutionOutcome::Failed(message) => {
                self.store.fail(closure_id, generation, message).await
            }
            ExecutionOutcome::DeadlineExceeded => {
                self.store.cancel_on_timeout(closure_id, generation).await
            }
        };

        match result {
            Ok(record) => info!(state = %record.state, "Closure outcome recorded"),
            Err(e) if e.is_rejection() => {
                warn!(outcome = label, error = %e, "Closure outcome discarded")
            }
            Err(e) => error!(outcome = label, error = %e, "Failed to record closure outcome"),
        }
    }

    /// Stop admitting new invocations. Queued executions are failed.
    pub fn close(&self) {
        self.permits.close();
    }
}
