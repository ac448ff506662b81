// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run log interfaces and backends.
//!
//! The run log is the only durable state of the engine. A run is read once when
//! an execution attempt starts and rewritten as a whole after each attempt
//! reports back.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryRunLog;
pub use self::postgres::PostgresRunLog;
pub use self::sqlite::SqliteRunLog;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::run::Run;

/// Storage contract for run logs.
///
/// Implementations must allow concurrent `persist_run` calls for distinct run
/// ids. A failed `persist_run` must leave the previously stored log intact.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Return the stored run, or register and return an empty one.
    async fn create_or_get_run(&self, run_id: &str) -> Result<Run, CoreError>;

    /// Atomically replace the stored log for `run.run_id`.
    async fn persist_run(&self, run: &Run) -> Result<(), CoreError>;

    /// Return the stored run without creating it.
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError>;

    /// Check backend connectivity.
    async fn health_check(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

pub(crate) fn validate_run_id(run_id: &str) -> Result<(), CoreError> {
    if run_id.trim().is_empty() {
        return Err(CoreError::ValidationError {
            field: "run_id".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
