// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for duroflow-environment tests.
//!
//! Provides TestContext for running the engine over an in-memory run log
//! with short relaunch and stop timings.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use duroflow_core::RunLog;
use duroflow_core::persistence::MemoryRunLog;
use duroflow_environment::Dispatcher;
use duroflow_environment::dispatcher::WorkflowDefinition;
use duroflow_environment::results::{QueryWorkflowResult, ResultStatus};
use duroflow_environment::runtime::{EngineRuntime, EngineRuntimeBuilder};
use duroflow_sdk::{Run, WorkflowRegistry};

/// Module every test workflow is registered under.
pub const TEST_MODULE: &str = "tests/workflows.wf";

/// Relaunch delay used by tests.
pub const RELAUNCH_DELAY: Duration = Duration::from_millis(30);

/// Stop grace period used by tests.
pub const STOP_GRACE: Duration = Duration::from_millis(200);

/// How long helpers wait for an expected state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder with test timings and the given workflows registered under [`TEST_MODULE`].
pub fn builder(registry: WorkflowRegistry, run_log: Arc<dyn RunLog>) -> EngineRuntimeBuilder {
    let names: Vec<String> = registry_names(&registry);
    let mut builder = EngineRuntime::builder()
        .run_log(run_log)
        .loader(Arc::new(registry))
        .relaunch_delay(RELAUNCH_DELAY)
        .stop_grace_period(STOP_GRACE);
    for name in names {
        builder = builder.workflow(WorkflowDefinition::inline(name, TEST_MODULE));
    }
    builder
}

fn registry_names(registry: &WorkflowRegistry) -> Vec<String> {
    registry.workflow_names(TEST_MODULE)
}

/// Test context: a running engine over an in-memory run log.
pub struct TestContext {
    pub runtime: EngineRuntime,
    pub run_log: Arc<MemoryRunLog>,
}

impl TestContext {
    /// Start an engine with `registry`.
    pub async fn new(registry: WorkflowRegistry) -> Self {
        Self::with_builder(registry, |b| b).await
    }

    /// Start an engine with `registry`, adjusting the builder first.
    pub async fn with_builder(
        registry: WorkflowRegistry,
        adjust: impl FnOnce(EngineRuntimeBuilder) -> EngineRuntimeBuilder,
    ) -> Self {
        let run_log = Arc::new(MemoryRunLog::new());
        let runtime = adjust(builder(registry, run_log.clone()))
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");
        Self { runtime, run_log }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.runtime.dispatcher()
    }

    /// Persisted run, or an empty one.
    pub async fn persisted(&self, run_id: &str) -> Run {
        self.run_log
            .get_run(run_id)
            .await
            .expect("Failed to read run")
            .unwrap_or_else(|| Run::new(run_id))
    }

    /// Wait until `run_id` has a terminal result and return it.
    pub async fn wait_for_result(&self, workflow: &str, run_id: &str) -> QueryWorkflowResult {
        let dispatcher = self.dispatcher();
        wait_for(|| async {
            dispatcher
                .results(workflow)
                .await
                .expect("Failed to query results")
                .into_iter()
                .find(|r| r.run_id == run_id)
        })
        .await
        .unwrap_or_else(|| panic!("Run {} did not finish in time", run_id))
    }

    /// Wait until no worker of `workflow` is alive.
    pub async fn wait_for_idle(&self, workflow: &str) {
        let dispatcher = self.dispatcher();
        wait_for(|| async {
            let report = dispatcher
                .resources(workflow)
                .await
                .expect("Failed to query resources");
            (report.count == 0).then_some(())
        })
        .await
        .expect("Workers did not exit in time");
    }

    /// Current terminal status of `run_id`.
    pub async fn status(&self, run_id: &str) -> ResultStatus {
        self.dispatcher()
            .status(run_id)
            .await
            .expect("Failed to query status")
    }

    pub async fn shutdown(self) {
        self.runtime
            .shutdown()
            .await
            .expect("Failed to shut down runtime");
    }
}

/// Poll `probe` until it yields a value or [`WAIT_TIMEOUT`] elapses.
pub async fn wait_for<T, F, Fut>(mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
