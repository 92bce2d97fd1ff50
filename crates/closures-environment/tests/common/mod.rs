// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for closures-environment integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use closures_core::{
    Bindings, ClosureDescription, ClosureRecord, ClosureStore, NewClosure, NewClosureDescription,
    ResourceConstraints,
};
use closures_environment::driver::{JsDriver, MockDriver};
use closures_environment::executor::ExecutionCoordinator;
use closures_environment::registry::DriverRegistry;
use serde_json::Value;

/// Registry with the embedded JS driver under `js` and a mock under `mock`.
pub fn registry() -> Arc<DriverRegistry> {
    Arc::new(
        DriverRegistry::new()
            .with_driver("js", Arc::new(JsDriver::new()))
            .with_driver("mock", Arc::new(MockDriver::new())),
    )
}

/// Coordinator over a fresh in-memory store.
pub fn coordinator() -> ExecutionCoordinator {
    ExecutionCoordinator::new(ClosureStore::in_memory(), registry())
}

/// Convert a `json!` object into bindings.
pub fn bindings(value: Value) -> Bindings {
    value.as_object().cloned().expect("expected a JSON object")
}

/// A description request with the given timeout.
pub fn description(
    runtime_id: &str,
    source: &str,
    output_names: &[&str],
    timeout_seconds: u64,
) -> NewClosureDescription {
    NewClosureDescription {
        name: "test closure".to_string(),
        description: None,
        source: source.to_string(),
        runtime_id: runtime_id.to_string(),
        output_names: output_names.iter().map(|s| s.to_string()).collect(),
        resource_constraints: ResourceConstraints {
            timeout_seconds,
            ram_mb: None,
        },
    }
}

/// Create a description and a closure referencing it.
pub async fn create_closure(
    store: &ClosureStore,
    request: NewClosureDescription,
) -> (ClosureDescription, ClosureRecord) {
    let description = store
        .create_description(request)
        .await
        .expect("Failed to create description");
    let closure = store
        .create(NewClosure {
            description_ref: Some(description.id.clone()),
            inputs: Bindings::new(),
        })
        .await
        .expect("Failed to create closure");
    (description, closure)
}

/// Poll until the closure leaves STARTED, failing after `limit`.
pub async fn wait_for_terminal(store: &ClosureStore, id: &str, limit: Duration) -> ClosureRecord {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let record = store.get(id).await.expect("closure disappeared");
        if record.state.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "closure {} still {} after {:?}",
            id,
            record.state,
            limit
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Create, execute and wait for a JS closure with a single `result` output.
pub async fn run_js(source: &str, inputs: Value) -> ClosureRecord {
    let coordinator = coordinator();
    let store = coordinator.store().clone();
    let (_, closure) = create_closure(&store, description("js", source, &["result"], 5)).await;

    coordinator
        .execute(&closure.id, Some(bindings(inputs)))
        .await
        .expect("Failed to execute closure");
    wait_for_terminal(&store, &closure.id, Duration::from_secs(10)).await
}
