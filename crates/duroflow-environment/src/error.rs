// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for duroflow-environment.

use thiserror::Error;

/// Environment errors.
///
/// Only synchronous input problems surface here. Failures of workflow code,
/// of workers and of persistence after a request was accepted are logged by
/// the manager instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Run log operation failed.
    #[error("Core error: {0}")]
    Core(#[from] duroflow_core::CoreError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Module resolution failed.
    #[error("Resolve error: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    /// No workflow is registered under this name.
    #[error("Workflow not registered: {0}")]
    WorkflowNotRegistered(String),

    /// No live worker exists for this run.
    #[error("No worker for run: {0}")]
    WorkerNotFound(String),

    /// Run was not found in the run log.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// The worker limit was reached.
    #[error("Worker capacity exhausted ({0} workers)")]
    CapacityExhausted(usize),

    /// The manager loop is not running.
    #[error("Worker manager is not running")]
    ManagerUnavailable,

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
