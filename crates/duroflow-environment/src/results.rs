// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result types surfaced to callers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use duroflow_core::Run;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::WorkerOutcome;

/// Whether an attempt returned or threw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    /// The workflow returned a value.
    Success,
    /// The workflow threw.
    Fail,
}

/// Outcome of one execution attempt, before interrupt classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Returned or thrown.
    pub kind: ResultKind,
    /// Returned value, or the thrown payload when there is one.
    pub result: Value,
    /// Thrown message.
    pub exception: Option<String>,
    /// The run as recorded by the attempt.
    pub run: Run,
}

impl WorkflowResult {
    /// Build from a worker's `START` report.
    pub fn from_outcome(outcome: WorkerOutcome, run: Run) -> Self {
        match outcome {
            WorkerOutcome::Returned(value) => Self {
                kind: ResultKind::Success,
                result: value,
                exception: None,
                run,
            },
            WorkerOutcome::Thrown(thrown) => Self {
                kind: ResultKind::Fail,
                result: thrown.value.unwrap_or(Value::Null),
                exception: Some(thrown.message),
                run,
            },
        }
    }
}

/// Terminal status of a run as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// Returned a value.
    Completed,
    /// Threw a genuine failure.
    CompletedWithError,
    /// Stopped explicitly.
    Aborted,
    /// No terminal result is known.
    Unknown,
}

/// Status and value of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultValue {
    /// Terminal status.
    pub status: ResultStatus,
    /// Returned value, failure message, or `null` when aborted.
    pub value: Value,
}

/// Externally queryable summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWorkflowResult {
    /// Run id.
    pub run_id: String,
    /// When the first attempt of the run was spawned.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: Option<DateTime<Utc>>,
    /// Status and value.
    pub result: QueryResultValue,
}

impl QueryWorkflowResult {
    /// Summary of a run that returned or threw.
    pub fn finished(run_id: &str, started_at: DateTime<Utc>, result: &WorkflowResult) -> Self {
        let (status, value) = match result.kind {
            ResultKind::Success => (ResultStatus::Completed, result.result.clone()),
            ResultKind::Fail => (
                ResultStatus::CompletedWithError,
                result
                    .exception
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
        };
        Self {
            run_id: run_id.to_string(),
            started_at,
            ended_at: Some(Utc::now()),
            result: QueryResultValue { status, value },
        }
    }

    /// Summary of a stopped run.
    pub fn aborted(run_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at,
            ended_at: Some(Utc::now()),
            result: QueryResultValue {
                status: ResultStatus::Aborted,
                value: Value::Null,
            },
        }
    }
}

/// A live worker as reported by resource queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningInstance {
    /// Run id.
    pub run_id: String,
    /// When the current worker was spawned.
    pub started_at: DateTime<Utc>,
}

/// Live workers of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesReport {
    /// Number of live workers.
    pub count: usize,
    /// Workflow name.
    pub workflow: String,
    /// The live workers.
    pub running: Vec<RunningInstance>,
}

/// In-memory history of finished runs, grouped by workflow name.
#[derive(Debug, Default)]
pub struct ResultCache {
    by_workflow: HashMap<String, Vec<QueryWorkflowResult>>,
    run_workflow: HashMap<String, String>,
}

impl ResultCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result for `workflow_name`.
    pub fn push(&mut self, workflow_name: &str, result: QueryWorkflowResult) {
        self.run_workflow
            .insert(result.run_id.clone(), workflow_name.to_string());
        self.by_workflow
            .entry(workflow_name.to_string())
            .or_default()
            .push(result);
    }

    /// All results recorded for `workflow_name`, oldest first.
    pub fn for_workflow(&self, workflow_name: &str) -> Vec<QueryWorkflowResult> {
        self.by_workflow
            .get(workflow_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `run_id` has a terminal result.
    pub fn contains(&self, run_id: &str) -> bool {
        self.run_workflow.contains_key(run_id)
    }

    /// Latest terminal status of `run_id`.
    pub fn status_of(&self, run_id: &str) -> ResultStatus {
        self.run_workflow
            .get(run_id)
            .and_then(|workflow| self.by_workflow.get(workflow))
            .and_then(|results| results.iter().rev().find(|r| r.run_id == run_id))
            .map(|r| r.result.status)
            .unwrap_or(ResultStatus::Unknown)
    }
}
