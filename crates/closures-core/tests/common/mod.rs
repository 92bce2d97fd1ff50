// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for closures-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use closures_core::persistence::{MemoryPersistence, SqlitePersistence};
use closures_core::{
    Bindings, ClosureDescription, ClosureRecord, ClosureStore, NewClosure, NewClosureDescription,
    ResourceConstraints,
};
use serde_json::Value;

/// Both backends, labelled for assertion messages.
pub async fn stores() -> Vec<(&'static str, ClosureStore)> {
    let sqlite = SqlitePersistence::in_memory()
        .await
        .expect("Failed to open in-memory SQLite");
    vec![
        ("memory", ClosureStore::new(Arc::new(MemoryPersistence::new()))),
        ("sqlite", ClosureStore::new(Arc::new(sqlite))),
    ]
}

/// Convert a `json!` object into bindings.
pub fn bindings(value: Value) -> Bindings {
    value.as_object().cloned().expect("expected a JSON object")
}

/// A description with the given outputs and a short timeout.
pub fn description_request(
    runtime_id: &str,
    source: &str,
    output_names: &[&str],
) -> NewClosureDescription {
    NewClosureDescription {
        name: "test closure".to_string(),
        description: None,
        source: source.to_string(),
        runtime_id: runtime_id.to_string(),
        output_names: output_names.iter().map(|s| s.to_string()).collect(),
        resource_constraints: ResourceConstraints {
            timeout_seconds: 2,
            ram_mb: None,
        },
    }
}

/// Create a description plus one closure referencing it.
pub async fn create_closure(
    store: &ClosureStore,
    output_names: &[&str],
) -> (ClosureDescription, ClosureRecord) {
    let description = store
        .create_description(description_request(
            "js",
            "result = inputs.a + 1",
            output_names,
        ))
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
