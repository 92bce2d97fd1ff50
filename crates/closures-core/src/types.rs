// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closure descriptions and closure records.
//!
//! All types serialize with camelCase field names, matching the HTTP API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::ClosureState;

/// Default deadline for a closure run.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Largest accepted deadline: one day.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

/// Named JSON values: closure inputs and outputs.
pub type Bindings = Map<String, Value>;

/// Resource limits applied to every execution of a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraints {
    /// Wall-clock deadline in seconds, in `1..=MAX_TIMEOUT_SECONDS`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Interpreter memory limit in megabytes.
    #[serde(rename = "ramMB", default, skip_serializing_if = "Option::is_none")]
    pub ram_mb: Option<u64>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            ram_mb: None,
        }
    }
}

impl ResourceConstraints {
    /// Deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Memory limit in bytes, if any.
    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.ram_mb
            .and_then(|mb| usize::try_from(mb).ok())
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

/// Client request to create a closure description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClosureDescription {
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Script text.
    #[serde(default)]
    pub source: String,
    /// Identifier of the driver that runs `source`.
    #[serde(default)]
    pub runtime_id: String,
    /// Names read back from the script scope after execution.
    #[serde(default)]
    pub output_names: Vec<String>,
    /// Resource limits.
    #[serde(default, alias = "resources")]
    pub resource_constraints: ResourceConstraints,
}

/// Immutable script template referenced by closure instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureDescription {
    /// Store-assigned identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Script text.
    pub source: String,
    /// Identifier of the driver that runs `source`.
    pub runtime_id: String,
    /// Names read back from the script scope after execution.
    pub output_names: Vec<String>,
    /// Resource limits.
    pub resource_constraints: ResourceConstraints,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Client request to create a closure instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClosure {
    /// Identifier of an existing [`ClosureDescription`].
    #[serde(default, alias = "descriptionLink")]
    pub description_ref: Option<String>,
    /// Initial inputs; `execute` may replace them.
    #[serde(default)]
    pub inputs: Bindings,
}

/// One closure instance and the state of its latest execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRecord {
    /// Store-assigned identifier.
    pub id: String,
    /// The description this closure runs.
    pub description_ref: String,
    /// Inputs of the current generation.
    pub inputs: Bindings,
    /// Declared outputs; non-empty only when FINISHED.
    pub outputs: Bindings,
    /// Lifecycle state.
    pub state: ClosureState,
    /// Script error; set only when FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Execution attempt counter.
    pub execution_generation: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start of the current generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time of the current generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Terminal outcome applied to a STARTED closure.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalTransition {
    /// STARTED -> FINISHED with the normalized outputs.
    Finished {
        /// One entry per declared output name.
        outputs: Bindings,
    },
    /// STARTED -> FAILED.
    Failed {
        /// Interpreter error message.
        error_message: String,
    },
    /// STARTED -> CANCELLED after the deadline elapsed.
    Cancelled,
}

impl TerminalTransition {
    /// The state this transition lands in.
    pub fn target_state(&self) -> ClosureState {
        match self {
            Self::Finished { .. } => ClosureState::Finished,
            Self::Failed { .. } => ClosureState::Failed,
            Self::Cancelled => ClosureState::Cancelled,
        }
    }
}
