// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closures Core - Closure Task Store
//!
//! This crate owns the lifecycle record of every closure execution attempt. It admits
//! new executions, serializes state transitions per closure and rejects stale or
//! duplicate terminal transitions, so that exactly one outcome is recorded per
//! execution generation.
//!
//! Script execution lives in `closures-environment`; this crate never runs user code.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                 │
//! │                     (HTTP API, embedding apps)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      closures-environment                                │
//! │     (Driver Registry, Timeout Supervisor, Execution Coordinator)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    │ create / start / complete / fail / cancel
//!                                    ▼
//! ┌───────────────────────┐
//! │    closures-core      │
//! │  (This Crate)         │
//! │  ClosureStore         │
//! └───────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────┐
//! │  Memory  |  SQLite    │
//! └───────────────────────┘
//! ```
//!
//! # Closure State Machine
//!
//! ```text
//!                     ┌─────────┐
//!                     │ CREATED │
//!                     └────┬────┘
//!                          │ start (generation stays 1)
//!                          ▼
//!                     ┌─────────┐
//!          ┌──────────│ STARTED │──────────┐
//!          │          └────┬────┘          │
//!          │               │               │
//!     complete           fail      cancel_on_timeout
//!          │               │               │
//!          ▼               ▼               ▼
//!     ┌──────────┐   ┌──────────┐   ┌───────────┐
//!     │ FINISHED │   │  FAILED  │   │ CANCELLED │
//!     └────┬─────┘   └────┬─────┘   └─────┬─────┘
//!          │               │               │
//!          └───────────────┼───────────────┘
//!                          │ start (generation + 1)
//!                          ▼
//!                     ┌─────────┐
//!                     │ STARTED │
//!                     └─────────┘
//! ```
//!
//! Every terminal transition carries the generation it belongs to. A transition
//! whose generation differs from the record's, or which arrives after the record
//! left STARTED, fails with [`CoreError::StaleTransition`] and leaves the record
//! untouched.
//!
//! ## State Descriptions
//!
//! | State | Description |
//! |-------|-------------|
//! | `CREATED` | Instance created, never executed |
//! | `STARTED` | An execution attempt is in flight |
//! | `FINISHED` | Script completed, `outputs` holds the declared output names |
//! | `FAILED` | Script raised an error, `errorMessage` is set |
//! | `CANCELLED` | The deadline elapsed before the script returned |
//!
//! # Modules
//!
//! - [`error`]: Error type with stable error codes
//! - [`types`]: Closure descriptions and closure records
//! - [`state`]: Closure states and transition rules
//! - [`persistence`]: Storage trait plus memory and SQLite backends
//! - [`migrations`]: Embedded SQLite migrations
//! - [`store`]: Validation and generation-guarded transitions over a backend

#![deny(missing_docs)]

/// Error types with stable error codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Persistence trait and backends (memory, SQLite).
pub mod persistence;

/// Closure lifecycle states and transition rules.
pub mod state;

/// The closure store facade used by the execution environment.
pub mod store;

/// Closure description and closure record types.
pub mod types;

pub use error::{CoreError, Result};
pub use state::ClosureState;
pub use store::ClosureStore;
pub use types::{
    Bindings, ClosureDescription, ClosureRecord, DEFAULT_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS,
    NewClosure, NewClosureDescription, ResourceConstraints, TerminalTransition,
};
