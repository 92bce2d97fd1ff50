// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! Guarded transitions are single conditional `UPDATE` statements, so SQLite's
//! write serialization decides the winner and `rows_affected` reports it.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;
use crate::migrations::SQLITE as MIGRATOR;
use crate::state::ClosureState;
use crate::types::{
    Bindings, ClosureDescription, ClosureRecord, ResourceConstraints, TerminalTransition,
};

use super::Persistence;

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DescriptionRow {
    id: String,
    name: String,
    description: Option<String>,
    source: String,
    runtime_id: String,
    output_names: String,
    timeout_seconds: i64,
    ram_mb: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DescriptionRow> for ClosureDescription {
    type Error = CoreError;

    fn try_from(row: DescriptionRow) -> Result<Self, Self::Error> {
        Ok(ClosureDescription {
            id: row.id,
            name: row.name,
            description: row.description,
            source: row.source,
            runtime_id: row.runtime_id,
            output_names: serde_json::from_str(&row.output_names)?,
            resource_constraints: ResourceConstraints {
                timeout_seconds: u64::try_from(row.timeout_seconds).unwrap_or_default(),
                ram_mb: row.ram_mb.and_then(|mb| u64::try_from(mb).ok()),
            },
            created_at: row.created_at,
        })
    }
}

/// SQLite integers are signed; reject values that would not round-trip.
fn to_column(field: &str, value: u64) -> Result<i64, CoreError> {
    i64::try_from(value).map_err(|_| {
        CoreError::invalid(
            format!("resourceConstraints.{}", field),
            "does not fit a 64-bit signed integer",
        )
    })
}

#[derive(sqlx::FromRow)]
struct ClosureRow {
    id: String,
    description_ref: String,
    inputs: String,
    outputs: String,
    state: String,
    error_message: Option<String>,
    generation: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<ClosureRow> for ClosureRecord {
    type Error = CoreError;

    fn try_from(row: ClosureRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<ClosureState>()
            .map_err(|details| CoreError::DatabaseError {
                operation: "decode_state".to_string(),
                details,
            })?;

        Ok(ClosureRecord {
            id: row.id,
            description_ref: row.description_ref,
            inputs: serde_json::from_str(&row.inputs)?,
            outputs: serde_json::from_str(&row.outputs)?,
            state,
            error_message: row.error_message,
            execution_generation: row.generation,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/closures.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Create a private in-memory database.
    ///
    /// The pool holds a single connection that is never recycled, since every
    /// connection to `sqlite::memory:` opens a separate database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), CoreError> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_description(&self, description: &ClosureDescription) -> Result<(), CoreError> {
        let output_names = serde_json::to_string(&description.output_names)?;
        let constraints = &description.resource_constraints;

        sqlx::query(
            r#"
            INSERT INTO closure_descriptions
                (id, name, description, source, runtime_id, output_names,
                 timeout_seconds, ram_mb, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&description.id)
        .bind(&description.name)
        .bind(&description.description)
        .bind(&description.source)
        .bind(&description.runtime_id)
        .bind(output_names)
        .bind(to_column("timeoutSeconds", constraints.timeout_seconds)?)
        .bind(constraints.ram_mb.map(|mb| to_column("ramMB", mb)).transpose()?)
        .bind(description.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_description(&self, id: &str) -> Result<Option<ClosureDescription>, CoreError> {
        let row = sqlx::query_as::<_, DescriptionRow>(
            r#"
            SELECT id, name, description, source, runtime_id, output_names,
                   timeout_seconds, ram_mb, created_at
            FROM closure_descriptions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClosureDescription::try_from).transpose()
    }

    async fn insert_closure(&self, record: &ClosureRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO closures
                (id, description_ref, inputs, outputs, state, error_message,
                 generation, created_at, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.description_ref)
        .bind(serde_json::to_string(&record.inputs)?)
        .bind(serde_json::to_string(&record.outputs)?)
        .bind(record.state.as_db_str())
        .bind(&record.error_message)
        .bind(record.execution_generation)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_closure(&self, id: &str) -> Result<Option<ClosureRecord>, CoreError> {
        let row = sqlx::query_as::<_, ClosureRow>(
            r#"
            SELECT id, description_ref, inputs, outputs, state, error_message,
                   generation, created_at, started_at, finished_at
            FROM closures
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClosureRecord::try_from).transpose()
    }

    async fn start_closure_if_idle(
        &self,
        id: &str,
        inputs: &Bindings,
        started_at: DateTime<Utc>,
    ) -> Result<Option<i64>, CoreError> {
        // SET expressions see the pre-update row, so the CASE reads the old state.
        let generation = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE closures
            SET generation = CASE WHEN state = 'created' THEN generation ELSE generation + 1 END,
                state = 'started',
                inputs = ?1,
                outputs = '{}',
                error_message = NULL,
                started_at = ?2,
                finished_at = NULL
            WHERE id = ?3
              AND state <> 'started'
            RETURNING generation
            "#,
        )
        .bind(serde_json::to_string(inputs)?)
        .bind(started_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(generation)
    }

    async fn finish_closure_if_started(
        &self,
        id: &str,
        generation: i64,
        transition: &TerminalTransition,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<ClosureRecord>, CoreError> {
        let (outputs, error_message) = match transition {
            TerminalTransition::Finished { outputs } => (serde_json::to_string(outputs)?, None),
            TerminalTransition::Failed { error_message } => {
                ("{}".to_string(), Some(error_message.as_str()))
            }
            TerminalTransition::Cancelled => ("{}".to_string(), None),
        };

        let row = sqlx::query_as::<_, ClosureRow>(
            r#"
            UPDATE closures
            SET state = ?1,
                outputs = ?2,
                error_message = ?3,
                finished_at = ?4
            WHERE id = ?5
              AND generation = ?6
              AND state = 'started'
            RETURNING id, description_ref, inputs, outputs, state, error_message,
                      generation, created_at, started_at, finished_at
            "#,
        )
        .bind(transition.target_state().as_db_str())
        .bind(outputs)
        .bind(error_message)
        .bind(finished_at)
        .bind(id)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClosureRecord::try_from).transpose()
    }

    async fn list_started_closures(&self, limit: i64) -> Result<Vec<ClosureRecord>, CoreError> {
        let rows = sqlx::query_as::<_, ClosureRow>(
            r#"
            SELECT id, description_ref, inputs, outputs, state, error_message,
                   generation, created_at, started_at, finished_at
            FROM closures
            WHERE state = 'started'
            ORDER BY started_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ClosureRecord::try_from).collect()
    }

    async fn health_check_db(&self) -> Result<(), CoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
