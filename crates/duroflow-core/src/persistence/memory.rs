// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory run log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RunLog, validate_run_id};
use crate::error::CoreError;
use crate::run::Run;

/// Run log held in process memory. Contents are lost with the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunLog {
    runs: Arc<Mutex<HashMap<String, Run>>>,
}

impl MemoryRunLog {
    /// Create an empty run log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Whether no runs are stored.
    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn create_or_get_run(&self, run_id: &str) -> Result<Run, CoreError> {
        validate_run_id(run_id)?;
        let mut runs = self.runs.lock().await;
        Ok(runs
            .entry(run_id.to_string())
            .or_insert_with(|| Run::new(run_id))
            .clone())
    }

    async fn persist_run(&self, run: &Run) -> Result<(), CoreError> {
        validate_run_id(&run.run_id)?;
        self.runs
            .lock()
            .await
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError> {
        Ok(self.runs.lock().await.get(run_id).cloned())
    }
}
