// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::CoreError;
use crate::state::ClosureState;
use crate::types::{Bindings, ClosureDescription, ClosureRecord, TerminalTransition};

use super::{Persistence, apply_transition};

/// Process-local backend.
///
/// Each closure record sits behind its own mutex; the map lock is only held to
/// look a record up, so transitions on different closures never contend.
#[derive(Default)]
pub struct MemoryPersistence {
    descriptions: RwLock<HashMap<String, ClosureDescription>>,
    closures: RwLock<HashMap<String, Arc<Mutex<ClosureRecord>>>>,
}

impl MemoryPersistence {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: &str) -> Option<Arc<Mutex<ClosureRecord>>> {
        self.closures.read().await.get(id).cloned()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn insert_description(&self, description: &ClosureDescription) -> Result<(), CoreError> {
        let mut descriptions = self.descriptions.write().await;
        if descriptions.contains_key(&description.id) {
            return Err(CoreError::DatabaseError {
                operation: "insert_description".to_string(),
                details: format!("duplicate id '{}'", description.id),
            });
        }
        descriptions.insert(description.id.clone(), description.clone());
        Ok(())
    }

    async fn get_description(&self, id: &str) -> Result<Option<ClosureDescription>, CoreError> {
        Ok(self.descriptions.read().await.get(id).cloned())
    }

    async fn insert_closure(&self, record: &ClosureRecord) -> Result<(), CoreError> {
        let mut closures = self.closures.write().await;
        if closures.contains_key(&record.id) {
            return Err(CoreError::DatabaseError {
                operation: "insert_closure".to_string(),
                details: format!("duplicate id '{}'", record.id),
            });
        }
        closures.insert(record.id.clone(), Arc::new(Mutex::new(record.clone())));
        Ok(())
    }

    async fn get_closure(&self, id: &str) -> Result<Option<ClosureRecord>, CoreError> {
        match self.record(id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn start_closure_if_idle(
        &self,
        id: &str,
        inputs: &Bindings,
        started_at: DateTime<Utc>,
    ) -> Result<Option<i64>, CoreError> {
        let Some(record) = self.record(id).await else {
            return Ok(None);
        };
        let mut record = record.lock().await;
        if !record.state.can_start() {
            return Ok(None);
        }

        if record.state.is_terminal() {
            record.execution_generation += 1;
        }
        record.state = ClosureState::Started;
        record.inputs = inputs.clone();
        record.outputs = Bindings::new();
        record.error_message = None;
        record.started_at = Some(started_at);
        record.finished_at = None;

        Ok(Some(record.execution_generation))
    }

    async fn finish_closure_if_started(
        &self,
        id: &str,
        generation: i64,
        transition: &TerminalTransition,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<ClosureRecord>, CoreError> {
        let Some(record) = self.record(id).await else {
            return Ok(None);
        };
        let mut record = record.lock().await;
        if record.state != ClosureState::Started || record.execution_generation != generation {
            return Ok(None);
        }

        apply_transition(&mut record, transition, finished_at);
        Ok(Some(record.clone()))
    }

    async fn list_started_closures(&self, limit: i64) -> Result<Vec<ClosureRecord>, CoreError> {
        let handles: Vec<_> = self.closures.read().await.values().cloned().collect();

        let mut started = Vec::new();
        for handle in handles {
            let record = handle.lock().await;
            if record.state == ClosureState::Started {
                started.push(record.clone());
            }
        }
        started.sort_by_key(|r| r.started_at);
        started.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(started)
    }

    async fn health_check_db(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
