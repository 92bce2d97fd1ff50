// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The closure store.
//!
//! [`ClosureStore`] validates client input, assigns identifiers and turns the
//! backend's guarded updates into typed errors. It is the only writer of closure
//! records; the execution environment and the HTTP layer both go through it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::persistence::{MemoryPersistence, Persistence};
use crate::state::ClosureState;
use crate::types::{
    Bindings, ClosureDescription, ClosureRecord, MAX_TIMEOUT_SECONDS, NewClosure,
    NewClosureDescription, TerminalTransition,
};

/// Validating facade over a [`Persistence`] backend.
#[derive(Clone)]
pub struct ClosureStore {
    persistence: Arc<dyn Persistence>,
}

impl std::fmt::Debug for ClosureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureStore")
            .field("persistence", &"<dyn Persistence>")
            .finish()
    }
}

impl ClosureStore {
    /// Create a store over the given backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Create a store backed by [`MemoryPersistence`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::new()))
    }

    /// The underlying backend.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    // ========================================================================
    // Descriptions
    // ========================================================================

    /// Validate and store a new description.
    pub async fn create_description(
        &self,
        request: NewClosureDescription,
    ) -> Result<ClosureDescription> {
        validate_description(&request)?;

        let description = ClosureDescription {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            source: request.source,
            runtime_id: request.runtime_id,
            output_names: request.output_names,
            resource_constraints: request.resource_constraints,
            created_at: Utc::now(),
        };
        self.persistence.insert_description(&description).await?;

        info!(
            description_id = %description.id,
            runtime_id = %description.runtime_id,
            timeout_seconds = description.resource_constraints.timeout_seconds,
            "Closure description created"
        );
        Ok(description)
    }

    /// Fetch a description.
    pub async fn get_description(&self, id: &str) -> Result<ClosureDescription> {
        self.persistence
            .get_description(id)
            .await?
            .ok_or_else(|| CoreError::DescriptionNotFound {
                description_id: id.to_string(),
            })
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Create a closure in CREATED state.
    ///
    /// Fails with [`CoreError::InvalidArgument`] if `descriptionRef` is missing or
    /// does not name a stored description; nothing is stored in that case.
    pub async fn create(&self, request: NewClosure) -> Result<ClosureRecord> {
        let description_ref = match request.description_ref.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => return Err(CoreError::invalid("descriptionRef", "is required")),
        };

        if self
            .persistence
            .get_description(&description_ref)
            .await?
            .is_none()
        {
            return Err(CoreError::invalid(
                "descriptionRef",
                format!("closure description '{}' does not exist", description_ref),
            ));
        }

        let record = ClosureRecord {
            id: Uuid::new_v4().to_string(),
            description_ref,
            inputs: request.inputs,
            outputs: Bindings::new(),
            state: ClosureState::Created,
            error_message: None,
            execution_generation: 1,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.persistence.insert_closure(&record).await?;

        info!(
            closure_id = %record.id,
            description_id = %record.description_ref,
            "Closure created"
        );
        Ok(record)
    }

    /// Fetch a closure record.
    pub async fn get(&self, id: &str) -> Result<ClosureRecord> {
        self.persistence
            .get_closure(id)
            .await?
            .ok_or_else(|| CoreError::ClosureNotFound {
                closure_id: id.to_string(),
            })
    }

    /// List STARTED closures, oldest first.
    pub async fn list_started(&self, limit: i64) -> Result<Vec<ClosureRecord>> {
        self.persistence.list_started_closures(limit).await
    }

    /// Check backend connectivity.
    pub async fn health_check(&self) -> Result<()> {
        self.persistence.health_check_db().await
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Open a new execution generation and move the closure to STARTED.
    ///
    /// `inputs` replaces the stored inputs; `None` keeps them. Returns the
    /// generation now in flight. Fails with [`CoreError::Conflict`] if an
    /// execution is already in flight.
    pub async fn start(&self, id: &str, inputs: Option<Bindings>) -> Result<i64> {
        let current = self.get(id).await?;
        let inputs = inputs.unwrap_or(current.inputs);

        match self
            .persistence
            .start_closure_if_idle(id, &inputs, Utc::now())
            .await?
        {
            Some(generation) => {
                info!(closure_id = %id, generation, "Closure started");
                Ok(generation)
            }
            None => {
                let current = self.get(id).await?;
                warn!(
                    closure_id = %id,
                    generation = current.execution_generation,
                    state = %current.state,
                    "Closure start rejected: execution already in flight"
                );
                Err(CoreError::Conflict {
                    closure_id: id.to_string(),
                    generation: current.execution_generation,
                })
            }
        }
    }

    /// STARTED -> FINISHED for `generation`.
    ///
    /// Outputs are normalized to exactly the description's declared names; a
    /// declared name missing from `outputs` is stored as null, an undeclared key
    /// is an [`CoreError::InvalidArgument`].
    pub async fn complete(
        &self,
        id: &str,
        generation: i64,
        outputs: Bindings,
    ) -> Result<ClosureRecord> {
        let record = self.get(id).await?;
        let description = self.get_description(&record.description_ref).await?;
        let outputs = normalize_outputs(&description.output_names, outputs)?;

        self.transition(id, generation, TerminalTransition::Finished { outputs })
            .await
    }

    /// STARTED -> FAILED for `generation`.
    pub async fn fail(
        &self,
        id: &str,
        generation: i64,
        error_message: impl Into<String>,
    ) -> Result<ClosureRecord> {
        let error_message = error_message.into();
        if error_message.trim().is_empty() {
            return Err(CoreError::invalid("errorMessage", "must not be empty"));
        }

        self.transition(id, generation, TerminalTransition::Failed { error_message })
            .await
    }

    /// STARTED -> CANCELLED for `generation` after its deadline elapsed.
    pub async fn cancel_on_timeout(&self, id: &str, generation: i64) -> Result<ClosureRecord> {
        self.transition(id, generation, TerminalTransition::Cancelled)
            .await
    }

    /// Apply any terminal transition under the generation guard.
    pub async fn transition(
        &self,
        id: &str,
        generation: i64,
        transition: TerminalTransition,
    ) -> Result<ClosureRecord> {
        let target = transition.target_state();
        let applied = self
            .persistence
            .finish_closure_if_started(id, generation, &transition, Utc::now())
            .await?;

        let Some(record) = applied else {
            let current = self.get(id).await?;
            debug!(
                closure_id = %id,
                generation,
                current_generation = current.execution_generation,
                current_state = %current.state,
                target = %target,
                "Stale closure transition rejected"
            );
            return Err(CoreError::StaleTransition {
                closure_id: id.to_string(),
                attempted_generation: generation,
                current_generation: current.execution_generation,
                current_state: current.state,
            });
        };

        info!(closure_id = %id, generation, state = %target, "Closure transitioned");
        Ok(record)
    }
}

fn validate_description(request: &NewClosureDescription) -> Result<()> {
    if request.name.trim().is_empty() {
        return Err(CoreError::invalid("name", "must not be empty"));
    }
    if request.source.trim().is_empty() {
        return Err(CoreError::invalid("source", "must not be empty"));
    }
    if request.runtime_id.trim().is_empty() {
        return Err(CoreError::invalid("runtimeId", "must not be empty"));
    }

    let constraints = &request.resource_constraints;
    if constraints.timeout_seconds == 0 {
        return Err(CoreError::invalid(
            "resourceConstraints.timeoutSeconds",
            "must be greater than 0",
        ));
    }
    if constraints.timeout_seconds > MAX_TIMEOUT_SECONDS {
        return Err(CoreError::invalid(
            "resourceConstraints.timeoutSeconds",
            format!("must be at most {}", MAX_TIMEOUT_SECONDS),
        ));
    }
    if constraints.ram_mb == Some(0) {
        return Err(CoreError::invalid(
            "resourceConstraints.ramMB",
            "must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for name in &request.output_names {
        if name.trim().is_empty() {
            return Err(CoreError::invalid("outputNames", "names must not be empty"));
        }
        if !seen.insert(name.as_str()) {
            return Err(CoreError::invalid(
                "outputNames",
                format!("duplicate output name '{}'", name),
            ));
        }
    }

    Ok(())
}

fn normalize_outputs(declared: &[String], mut outputs: Bindings) -> Result<Bindings> {
    if let Some(extra) = outputs.keys().find(|k| !declared.contains(k)) {
        return Err(CoreError::invalid(
            "outputs",
            format!("'{}' is not a declared output name", extra),
        ));
    }

    Ok(declared
        .iter()
        .map(|name| {
            let value = outputs.remove(name).unwrap_or(serde_json::Value::Null);
            (name.clone(), value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> NewClosureDescription {
        NewClosureDescription {
            name: "inc".to_string(),
            source: "result = inputs.a + 1".to_string(),
            runtime_id: "js".to_string(),
            output_names: vec!["result".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_description_rejects_missing_runtime() {
        let mut req = request();
        req.runtime_id = "  ".to_string();
        let err = validate_description(&req).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(err.to_string().contains("runtimeId"));
    }

    #[test]
    fn test_validate_description_rejects_zero_timeout() {
        let mut req = request();
        req.resource_constraints.timeout_seconds = 0;
        assert!(validate_description(&req).is_err());
    }

    #[test]
    fn test_validate_description_rejects_unbounded_timeout() {
        let mut req = request();
        req.resource_constraints.timeout_seconds = u64::MAX;
        let err = validate_description(&req).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(err.to_string().contains("timeoutSeconds"));

        req.resource_constraints.timeout_seconds = MAX_TIMEOUT_SECONDS;
        assert!(validate_description(&req).is_ok());
    }

    #[test]
    fn test_validate_description_rejects_duplicate_outputs() {
        let mut req = request();
        req.output_names = vec!["a".to_string(), "a".to_string()];
        let err = validate_description(&req).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_normalize_outputs_fills_missing_with_null() {
        let declared = vec!["a".to_string(), "b".to_string()];
        let outputs = json!({"a": 1}).as_object().cloned().unwrap();

        let normalized = normalize_outputs(&declared, outputs).unwrap();
        assert_eq!(serde_json::Value::Object(normalized), json!({"a": 1, "b": null}));
    }

    #[test]
    fn test_normalize_outputs_rejects_undeclared() {
        let declared = vec!["a".to_string()];
        let outputs = json!({"a": 1, "z": 2}).as_object().cloned().unwrap();
        assert!(normalize_outputs(&declared, outputs).is_err());
    }

    #[tokio::test]
    async fn test_start_unknown_closure() {
        let store = ClosureStore::in_memory();
        let err = store.start("nope", None).await.unwrap_err();
        assert_eq!(err.error_code(), "CLOSURE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_start_keeps_inputs_when_none_given() {
        let store = ClosureStore::in_memory();
        let description = store.create_description(request()).await.unwrap();
        let closure = store
            .create(NewClosure {
                description_ref: Some(description.id),
                inputs: json!({"a": 3}).as_object().cloned().unwrap(),
            })
            .await
            .unwrap();

        store.start(&closure.id, None).await.unwrap();
        let record = store.get(&closure.id).await.unwrap();
        assert_eq!(record.inputs["a"], json!(3));
        assert_eq!(record.state, ClosureState::Started);
    }
}
