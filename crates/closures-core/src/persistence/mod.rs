// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for closures-core.
//!
//! Backends store records and apply guarded updates. Validation and error
//! reporting live in [`ClosureStore`](crate::store::ClosureStore).

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::types::{Bindings, ClosureDescription, ClosureRecord, TerminalTransition};

/// Storage backend for descriptions and closure records.
///
/// The two guarded methods, [`start_closure_if_idle`](Self::start_closure_if_idle) and
/// [`finish_closure_if_started`](Self::finish_closure_if_started), must be atomic per
/// closure: under concurrent calls for the same closure at most one observes the
/// guard as satisfied.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a new description. Descriptions are never updated.
    async fn insert_description(&self, description: &ClosureDescription) -> Result<(), CoreError>;

    /// Fetch a description by id.
    async fn get_description(&self, id: &str) -> Result<Option<ClosureDescription>, CoreError>;

    /// Insert a new closure record.
    async fn insert_closure(&self, record: &ClosureRecord) -> Result<(), CoreError>;

    /// Fetch a closure record by id.
    async fn get_closure(&self, id: &str) -> Result<Option<ClosureRecord>, CoreError>;

    /// Move a closure to STARTED if it is CREATED or terminal.
    ///
    /// From CREATED the generation is kept, from a terminal state it is incremented.
    /// Inputs are replaced, outputs and error message cleared. Returns the generation
    /// now in flight, or `None` if the record is missing or already STARTED.
    async fn start_closure_if_idle(
        &self,
        id: &str,
        inputs: &Bindings,
        started_at: DateTime<Utc>,
    ) -> Result<Option<i64>, CoreError>;

    /// Apply a terminal transition if the closure is STARTED at `generation`.
    ///
    /// Returns the record as written by this update, or `None` if the guard did not
    /// hold. The returned record is never a later generation's.
    async fn finish_closure_if_started(
        &self,
        id: &str,
        generation: i64,
        transition: &TerminalTransition,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<ClosureRecord>, CoreError>;

    /// List STARTED closures, oldest start first.
    async fn list_started_closures(&self, limit: i64) -> Result<Vec<ClosureRecord>, CoreError>;

    /// Check that the backend is reachable.
    async fn health_check_db(&self) -> Result<(), CoreError>;
}

/// Apply a terminal transition to an in-memory record.
pub(crate) fn apply_transition(
    record: &mut ClosureRecord,
    transition: &TerminalTransition,
    finished_at: DateTime<Utc>,
) {
    record.state = transition.target_state();
    record.finished_at = Some(finished_at);
    match transition {
        TerminalTransition::Finished { outputs } => {
            record.outputs = outputs.clone();
            record.error_message = None;
        }
        TerminalTransition::Failed { error_message } => {
            record.outputs = Bindings::new();
            record.error_message = Some(error_message.clone());
        }
        TerminalTransition::Cancelled => {
            record.outputs = Bindings::new();
            record.error_message = None;
        }
    }
}
