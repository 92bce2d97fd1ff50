// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closure lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a closure record.
///
/// Within one execution generation a closure moves `CREATED -> STARTED -> terminal`.
/// Re-execution opens a new generation and is the only way out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClosureState {
    /// Created, never executed.
    Created,
    /// An execution attempt is in flight.
    Started,
    /// Completed with outputs (terminal).
    Finished,
    /// Script error (terminal).
    Failed,
    /// Deadline elapsed (terminal).
    Cancelled,
}

impl ClosureState {
    /// Uppercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Lowercase name used in the database.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// FINISHED, FAILED and CANCELLED are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Whether a new execution may start from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Created) || self.is_terminal()
    }

    /// Whether `next` is reachable from this state within the same generation.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match self {
            Self::Created => matches!(next, Self::Started),
            Self::Started => next.is_terminal(),
            Self::Finished | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for ClosureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClosureState {
    type Err = String;

    /// Accepts both the wire and the database spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "started" => Ok(Self::Started),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown closure state '{}'", other)),
        }
    }
}
