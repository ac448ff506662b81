// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed run log.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use super::{RunLog, validate_run_id};
use crate::error::CoreError;
use crate::migrations;
use crate::run::{Operation, Run};

/// SQLite-backed run log.
#[derive(Clone)]
pub struct SqliteRunLog {
    pool: SqlitePool,
}

impl SqliteRunLog {
    /// Create a run log from an existing, already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a run log from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// the embedded migrations.
    ///
    /// ```ignore
    /// let run_log = SqliteRunLog::from_path(".data/runs.db").await?;
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

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_operations(run_id: &str, raw: &str) -> Result<Vec<Operation>, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::SerializationError {
        context: format!("operations of run '{}'", run_id),
        details: e.to_string(),
    })
}

#[async_trait]
impl RunLog for SqliteRunLog {
    async fn create_or_get_run(&self, run_id: &str) -> Result<Run, CoreError> {
        validate_run_id(run_id)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, operations)
            VALUES (?, '[]')
            ON CONFLICT(run_id) DO NOTHING
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
        let operations = serde_json::to_string(&run.operations)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, operations, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(run_id) DO UPDATE
            SET operations = excluded.operations, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&run.run_id)
        .bind(operations)
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
        let raw: Option<String> =
            sqlx::query_scalar("SELECT operations FROM runs WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        raw.map(|raw| {
            Ok(Run {
                run_id: run_id.to_string(),
                operations: decode_operations(run_id, &raw)?,
            })
        })
        .transpose()
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::StopResult;
    use serde_json::json;

    async fn temp_log() -> (SqliteRunLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = SqliteRunLog::from_path(dir.path().join("nested/runs.db"))
            .await
            .unwrap();
        (log, dir)
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let (log, _dir) = temp_log().await;

        let first = log.create_or_get_run("run-1").await.unwrap();
        let second = log.create_or_get_run("run-1").await.unwrap();

        assert!(first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let (log, _dir) = temp_log().await;

        let mut run = Run::new("run-2");
        run.push(Operation::Start {
            kwargs: json!({"x": 1}),
        });
        run.push(Operation::Save {
            id: 1,
            value: json!({"nested": [1, 2, 3]}),
        });
        log.persist_run(&run).await.unwrap();

        run.push(Operation::Stop {
            result: StopResult::Ok(json!(null)),
        });
        log.persist_run(&run).await.unwrap();

        let stored = log.create_or_get_run("run-2").await.unwrap();
        assert_eq!(stored, run);
    }

    #[tokio::test]
    async fn test_get_run_missing() {
        let (log, _dir) = temp_log().await;
        assert!(log.get_run("nope").await.unwrap().is_none());
        log.health_check().await.unwrap();
    }
}
