// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed run log.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::debug;

use super::{RunLog, validate_run_id};
use crate::error::CoreError;
use crate::migrations;
use crate::run::{Operation, Run};

/// PostgreSQL-backed run log.
#[derive(Clone)]
pub struct PostgresRunLog {
    pool: PgPool,
}

impl PostgresRunLog {
    /// Create a run log from an existing, already migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        migrations::run_postgres(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RunLog for PostgresRunLog {
    async fn create_or_get_run(&self, run_id: &str) -> Result<Run, CoreError> {
        validate_run_id(run_id)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, operations)
            VALUES ($1, '[]'::jsonb)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        debug!(run_id = %run_id, "Run created or loaded");

        self.get_run(run_id)
            .await?
            .ok_or_else(|| CoreError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn persist_run(&self, run: &Run) -> Result<(), CoreError> {
        validate_run_id(&run.run_id)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, operations, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (run_id) DO UPDATE
            SET operations = EXCLUDED.operations, updated_at = NOW()
            "#,
        )
        .bind(&run.run_id)
        .bind(Json(&run.operations))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::PersistFailed {
            run_id: run.run_id.clone(),
            reason: e.to_string(),
        })?;

        debug!(run_id = %run.run_id, operations = run.operations.len(), "Run persisted");
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError> {
        let operations: Option<Json<Vec<Operation>>> =
            sqlx::query_scalar("SELECT operations FROM runs WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(operations.map(|Json(operations)| Run {
            run_id: run_id.to_string(),
            operations,
        }))
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
