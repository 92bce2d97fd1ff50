// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closures Environment - Closure Execution
//!
//! This crate runs closures: small user scripts bound to named inputs that
//! produce named outputs. It resolves a script runtime for each description,
//! runs the script under a wall-clock deadline and records exactly one outcome
//! per execution generation in `closures-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                 │
//! │                   (HTTP API, external executors)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  closures-environment (This Crate)                       │
//! │                         Port 8080                                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Execution  │  │   Driver    │  │   Timeout   │  │   Timeout   │     │
//! │  │ Coordinator │  │  Registry   │  │ Supervisor  │  │   Monitor   │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                 │
//!           │                 ▼
//!           │       ┌───────────────────────────────────────────┐
//!           │       │  Drivers: QuickJS (in-process),           │
//!           │       │  node / python3 (child process)           │
//!           │       └───────────────────────────────────────────┘
//!           ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     closures-core (memory / SQLite)                    │
//! │                 (Descriptions, Closures, Generations)                 │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution Flow
//!
//! 1. `POST /closures/{id}/execute` resolves the description's runtime id.
//!    Unknown runtimes are rejected and the closure is left untouched.
//! 2. The closure moves to STARTED under a new generation and the request
//!    returns `202 Accepted`.
//! 3. A background task runs the script under the description's timeout and
//!    records FINISHED, FAILED or CANCELLED for that generation.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CLOSURES_DATABASE_PATH` | No | - | SQLite file; in-memory store when unset |
//! | `CLOSURES_HTTP_HOST` | No | `0.0.0.0` | HTTP bind host |
//! | `CLOSURES_HTTP_PORT` | No | `8080` | HTTP bind port |
//! | `CLOSURES_MAX_CONCURRENT_EXECUTIONS` | No | `32` | Simultaneous driver invocations |
//! | `CLOSURES_SWEEP_INTERVAL_SECS` | No | `5` | Timeout monitor poll interval |
//! | `CLOSURES_TIMEOUT_GRACE_SECS` | No | `5` | Margin before the monitor cancels |
//! | `CLOSURES_NODE_BINARY` | No | `node` | Executable for `nodejs` |
//! | `CLOSURES_PYTHON_BINARY` | No | `python3` | Executable for `python` |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`driver`]: Script runtimes and the value codec
//! - [`error`]: Error types for Environment operations
//! - [`executor`]: Execution coordination
//! - [`registry`]: Runtime id to driver mapping
//! - [`runtime`]: Embeddable runtime
//! - [`server`]: HTTP API
//! - [`supervisor`]: Deadline enforcement
//! - [`timeout_monitor`]: Sweep for overdue closures

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Script runtimes behind a common contract.
pub mod driver;

/// Error types for Environment operations.
pub mod error;

/// Execution coordination.
pub mod executor;

/// Runtime id to driver mapping.
pub mod registry;

/// Embeddable runtime.
pub mod runtime;

/// HTTP API.
pub mod server;

/// Wall-clock deadline enforcement for driver invocations.
pub mod supervisor;

/// Background worker for cancelling overdue closures.
pub mod timeout_monitor;

pub use error::{Error, Result};
pub use executor::ExecutionCoordinator;
pub use registry::DriverRegistry;
pub use runtime::EnvironmentRuntime;
pub use supervisor::{ExecutionOutcome, TimeoutSupervisor};
