// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for duroflow-environment.
//!
//! [`EngineRuntime`] wires a run log, a workflow loader and a module resolver
//! into a running worker manager and hands out the [`Dispatcher`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use duroflow_core::persistence::MemoryRunLog;
//! use duroflow_environment::dispatcher::WorkflowDefinition;
//! use duroflow_environment::runtime::EngineRuntime;
//! use duroflow_sdk::{WorkflowRegistry, workflow_fn};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = WorkflowRegistry::new()
//!         .with_workflow("orders", "sync", workflow_fn(|_ctx, kwargs| async move { Ok(kwargs) }));
//!
//!     let runtime = EngineRuntime::builder()
//!         .run_log(Arc::new(MemoryRunLog::new()))
//!         .loader(Arc::new(registry))
//!         .workflow(WorkflowDefinition::inline("sync", "orders"))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let run_id = runtime.dispatcher().start("sync", serde_json::json!({}), None).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use duroflow_core::RunLog;
use duroflow_sdk::WorkflowLoader;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::{Dispatcher, WorkflowDefinition};
use crate::manager::{ManagerConfig, WorkerManager};
use crate::relaunch::{DEFAULT_RELAUNCH_DELAY, RelaunchPolicy};
use crate::resolver::{ModuleResolver, StaticModuleResolver};

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    run_log: Option<Arc<dyn RunLog>>,
    loader: Option<Arc<dyn WorkflowLoader>>,
    resolver: Option<Arc<dyn ModuleResolver>>,
    workflows: Vec<WorkflowDefinition>,
    relaunch_delay: Duration,
    stop_grace_period: Duration,
    max_workers: usize,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            run_log: None,
            loader: None,
            resolver: None,
            workflows: Vec::new(),
            relaunch_delay: DEFAULT_RELAUNCH_DELAY,
            stop_grace_period: Duration::from_secs(5),
            max_workers: 32,
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run log (required).
    pub fn run_log(mut self, run_log: Arc<dyn RunLog>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Set the workflow loader (required).
    pub fn loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the module resolver.
    ///
    /// Default: [`StaticModuleResolver`]
    pub fn resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a workflow definition.
    pub fn workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows.push(definition);
        self
    }

    /// Set the delay between an interrupt and the relaunch.
    ///
    /// Default: 3 seconds
    pub fn relaunch_delay(mut self, delay: Duration) -> Self {
        self.relaunch_delay = delay;
        self
    }

    /// Set how long a stopping worker may take to acknowledge.
    ///
    /// Default: 5 seconds
    pub fn stop_grace_period(mut self, period: Duration) -> Self {
        self.stop_grace_period = period;
        self
    }

    /// Set the maximum number of live workers.
    ///
    /// Default: 32
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Apply timing and capacity settings from a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.relaunch_delay(config.relaunch_delay)
            .stop_grace_period(config.stop_grace_period)
            .max_workers(config.max_workers)
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let run_log = self
            .run_log
            .ok_or_else(|| anyhow::anyhow!("run_log is required"))?;
        let loader = self
            .loader
            .ok_or_else(|| anyhow::anyhow!("loader is required"))?;
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be positive");
        }

        Ok(EngineRuntimeConfig {
            run_log,
            loader,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(StaticModuleResolver)),
            workflows: self.workflows,
            manager: ManagerConfig {
                policy: RelaunchPolicy {
                    delay: self.relaunch_delay,
                    stop_grace_period: self.stop_grace_period,
                },
                max_workers: self.max_workers,
            },
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    run_log: Arc<dyn RunLog>,
    loader: Arc<dyn WorkflowLoader>,
    resolver: Arc<dyn ModuleResolver>,
    workflows: Vec<WorkflowDefinition>,
    manager: ManagerConfig,
}

impl EngineRuntimeConfig {
    /// Check the run log and start the worker manager.
    pub async fn start(self) -> Result<EngineRuntime> {
        self.run_log.health_check().await?;

        let shutdown = CancellationToken::new();
        let manager = WorkerManager::new(self.run_log.clone(), self.loader, self.manager);
        let (handle, manager_task) = manager.start(shutdown.clone());

        let dispatcher = Dispatcher::new(handle, self.resolver, self.workflows);
        info!(workflows = ?dispatcher.workflow_names(), "Engine runtime started");

        Ok(EngineRuntime {
            dispatcher,
            shutdown,
            manager_task: Some(manager_task),
        })
    }
}

/// A running engine.
pub struct EngineRuntime {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    manager_task: Option<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Create a new builder.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The dispatcher for external requests.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Whether the manager task is still running.
    pub fn is_running(&self) -> bool {
        self.manager_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Destroy every worker and stop the manager.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down engine runtime");
        self.shutdown.cancel();

        if let Some(task) = self.manager_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Worker manager task failed");
        }

        info!("Engine runtime stopped");
        Ok(())
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("dispatcher", &self.dispatcher)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duroflow_core::persistence::MemoryRunLog;
    use duroflow_sdk::WorkflowRegistry;

    #[test]
    fn test_build_requires_run_log_and_loader() {
        let err = EngineRuntime::builder()
            .loader(Arc::new(WorkflowRegistry::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("run_log"));

        let err = EngineRuntime::builder()
            .run_log(Arc::new(MemoryRunLog::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("loader"));
    }

    #[test]
    fn test_build_rejects_zero_capacity() {
        let result = EngineRuntime::builder()
            .run_log(Arc::new(MemoryRunLog::new()))
            .loader(Arc::new(WorkflowRegistry::new()))
            .max_workers(0)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = EngineRuntime::builder()
            .run_log(Arc::new(MemoryRunLog::new()))
            .loader(Arc::new(WorkflowRegistry::new()))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(runtime.is_running());
        runtime.shutdown().await.unwrap();
    }
}
