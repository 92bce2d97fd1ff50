// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the external interpreter drivers.
//!
//! Each test is skipped when its interpreter is not on `PATH`.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use closures_environment::driver::{
    Driver, DriverError, ExecutionRequest, ProcessDriver, new_cancel_token,
};
use closures_environment::supervisor::{ExecutionOutcome, TimeoutSupervisor};
use common::bindings;
use serde_json::{Value, json};

/// Helper macro to skip tests if an interpreter is missing.
macro_rules! skip_if_missing {
    ($binary:expr) => {
        if std::process::Command::new($binary)
            .arg("--version")
            .output()
            .is_err()
        {
            eprintln!("Skipping test: {} not found", $binary);
            return;
        }
    };
}

fn request(source: &str, inputs: Value, outputs: &[&str]) -> ExecutionRequest {
    ExecutionRequest::new(
        "c-process",
        1,
        source,
        bindings(inputs),
        outputs.iter().map(|s| s.to_string()).collect(),
    )
}

#[tokio::test]
async fn test_node_increments_number() {
    skip_if_missing!("node");

    let outputs = ProcessDriver::nodejs()
        .run(
            &request(
                "result = inputs.a + 1; print('hello ' + a);",
                json!({"a": 3}),
                &["result", "other"],
            ),
            new_cancel_token(),
        )
        .await
        .unwrap();

    assert_eq!(Value::Object(outputs), json!({"result": 4, "other": null}));
}

#[tokio::test]
async fn test_node_object_mutation() {
    skip_if_missing!("node");

    let outputs = ProcessDriver::nodejs()
        .run(
            &request(
                "a.intTest += 1; a.strTest += '_changed'; result = a;",
                json!({"a": {"intTest": 1, "strTest": "s"}}),
                &["result"],
            ),
            new_cancel_token(),
        )
        .await
        .unwrap();

    assert_eq!(outputs["result"], json!({"intTest": 2, "strTest": "s_changed"}));
}

#[tokio::test]
async fn test_node_reference_error() {
    skip_if_missing!("node");

    let err = ProcessDriver::nodejs()
        .run(&request("print(invalid);", json!({}), &["result"]), new_cancel_token())
        .await
        .unwrap_err();

    match err {
        DriverError::Script(message) => {
            assert!(message.starts_with("ReferenceError"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_node_busy_loop_is_killed() {
    skip_if_missing!("node");

    let started = Instant::now();
    let outcome = TimeoutSupervisor::new()
        .supervise(
            Arc::new(ProcessDriver::nodejs()),
            request("while (true) {}", json!({}), &["result"]),
            Duration::from_millis(500),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_python_runs_script() {
    skip_if_missing!("python3");

    let outputs = ProcessDriver::python()
        .run(
            &request(
                "print('working')\nresult = [x * 2 for x in inputs['a']]",
                json!({"a": [1, 2, 3]}),
                &["result"],
            ),
            new_cancel_token(),
        )
        .await
        .unwrap();

    assert_eq!(outputs["result"], json!([2, 4, 6]));
}

#[tokio::test]
async fn test_python_exception() {
    skip_if_missing!("python3");

    let err = ProcessDriver::python()
        .run(
            &request("raise ValueError('boom')", json!({}), &["result"]),
            new_cancel_token(),
        )
        .await
        .unwrap_err();

    match err {
        DriverError::Script(message) => assert_eq!(message, "ValueError: boom"),
        other => panic!("unexpected error: {:?}", other),
    }
}
