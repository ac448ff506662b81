// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime dispatcher.
//!
//! Maps external operations onto the worker manager. Every operation returns
//! once the manager accepted it; workflow outcomes are observed through
//! [`Dispatcher::results`] and [`Dispatcher::status`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manager::{ManagerHandle, StartRequest};
use crate::resolver::{ArtifactDescriptor, ModuleResolver};
use crate::results::{QueryWorkflowResult, ResourcesReport, ResultStatus};

/// A workflow the dispatcher can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow name.
    pub name: String,
    /// Module holding the workflow.
    pub entry_point: ArtifactDescriptor,
    /// Artifacts the module depends on.
    #[serde(default)]
    pub dependencies: Vec<ArtifactDescriptor>,
}

impl WorkflowDefinition {
    /// Definition for a workflow registered in-process under `module`.
    pub fn inline(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_point: ArtifactDescriptor::inline(module),
            dependencies: Vec::new(),
        }
    }
}

/// Request accepted by [`Dispatcher::handle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DispatchRequest {
    /// Start or resume a run.
    Start {
        /// Workflow name.
        workflow: String,
        /// Invocation arguments.
        #[serde(default)]
        kwargs: Value,
        /// Run id to start or resume.
        #[serde(default)]
        run_id: Option<String>,
    },
    /// Stop a run.
    Stop {
        /// Run id.
        run_id: String,
    },
    /// Deliver a signal.
    Event {
        /// Run id.
        run_id: String,
        /// Signal name.
        event_name: String,
        /// Signal payload.
        #[serde(default)]
        payload: Value,
    },
    /// Finished runs of a workflow.
    Results {
        /// Workflow name.
        workflow: String,
    },
    /// Live runs of a workflow.
    Resources {
        /// Workflow name.
        workflow: String,
    },
}

/// Response of [`Dispatcher::handle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DispatchResponse {
    /// Run accepted.
    Start {
        /// Run id.
        run_id: String,
    },
    /// Stop accepted.
    Stop {
        /// Run id.
        run_id: String,
    },
    /// Signal accepted.
    Event {
        /// Run id.
        run_id: String,
    },
    /// Finished runs.
    Results {
        /// Results in completion order.
        results: Vec<QueryWorkflowResult>,
    },
    /// Live runs.
    Resources {
        /// Report.
        #[serde(flatten)]
        report: ResourcesReport,
    },
}

/// Entry point for external requests.
pub struct Dispatcher {
    manager: ManagerHandle,
    resolver: Arc<dyn ModuleResolver>,
    workflows: HashMap<String, WorkflowDefinition>,
}

impl Dispatcher {
    /// Create a dispatcher over `workflows`.
    pub fn new(
        manager: ManagerHandle,
        resolver: Arc<dyn ModuleResolver>,
        workflows: impl IntoIterator<Item = WorkflowDefinition>,
    ) -> Self {
        Self {
            manager,
            resolver,
            workflows: workflows
                .into_iter()
                .map(|definition| (definition.name.clone(), definition))
                .collect(),
        }
    }

    /// The manager handle.
    pub fn manager(&self) -> &ManagerHandle {
        &self.manager
    }

    /// Registered workflow names.
    pub fn workflow_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start a run, or resume `run_id` from its persisted log.
    pub async fn start(
        &self,
        workflow: &str,
        kwargs: Value,
        run_id: Option<String>,
    ) -> Result<String> {
        let definition = self
            .workflows
            .get(workflow)
            .ok_or_else(|| Error::WorkflowNotRegistered(workflow.to_string()))?;

        let module_path = self
            .resolver
            .resolve(&definition.entry_point, &definition.dependencies)
            .await?;

        let run_id = self
            .manager
            .trigger_start(StartRequest {
                workflow_name: definition.name.clone(),
                run_id,
                module_path,
                run: None,
                kwargs,
            })
            .await?;

        debug!(run_id = %run_id, workflow = %workflow, "Start accepted");
        Ok(run_id)
    }

    /// Stop a run. Returns the run id.
    pub async fn stop(&self, run_id: &str) -> Result<String> {
        self.manager.trigger_stop(run_id).await
    }

    /// Deliver a signal to a run.
    ///
    /// Without a live worker the signal is appended to the persisted run and
    /// replayed when the run is next started.
    pub async fn event(&self, run_id: &str, event_name: &str, payload: Value) -> Result<()> {
        self.manager.signal(run_id, event_name, payload).await?;
        debug!(run_id = %run_id, event_name = %event_name, "Signal accepted");
        Ok(())
    }

    /// Finished runs of `workflow`.
    pub async fn results(&self, workflow: &str) -> Result<Vec<QueryWorkflowResult>> {
        self.manager.results(workflow).await
    }

    /// Live runs of `workflow`.
    pub async fn resources(&self, workflow: &str) -> Result<ResourcesReport> {
        self.manager.allocated_resources(workflow).await
    }

    /// Terminal status of a run.
    pub async fn status(&self, run_id: &str) -> Result<ResultStatus> {
        self.manager.status(run_id).await
    }

    /// Dispatch a tagged request.
    pub async fn handle(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        match request {
            DispatchRequest::Start {
                workflow,
                kwargs,
                run_id,
            } => {
                let run_id = self.start(&workflow, kwargs, run_id).await?;
                Ok(DispatchResponse::Start { run_id })
            }
            DispatchRequest::Stop { run_id } => {
                let run_id = self.stop(&run_id).await?;
                Ok(DispatchResponse::Stop { run_id })
            }
            DispatchRequest::Event {
                run_id,
                event_name,
                payload,
            } => {
                self.event(&run_id, &event_name, payload).await?;
                Ok(DispatchResponse::Event { run_id })
            }
            DispatchRequest::Results { workflow } => Ok(DispatchResponse::Results {
                results: self.results(&workflow).await?,
            }),
            DispatchRequest::Resources { workflow } => Ok(DispatchResponse::Resources {
                report: self.resources(&workflow).await?,
            }),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workflows", &self.workflow_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_request_wire_shape() {
        let request: DispatchRequest = serde_json::from_value(json!({
            "kind": "start",
            "workflow": "orders",
            "kwargs": {"x": 1}
        }))
        .unwrap();
        assert_eq!(
            request,
            DispatchRequest::Start {
                workflow: "orders".to_string(),
                kwargs: json!({"x": 1}),
                run_id: None,
            }
        );

        let request: DispatchRequest = serde_json::from_value(json!({
            "kind": "event",
            "run_id": "r1",
            "event_name": "ping"
        }))
        .unwrap();
        assert!(matches!(
            request,
            DispatchRequest::Event { payload: Value::Null, .. }
        ));
    }

    #[test]
    fn test_dispatch_request_rejects_unknown_kind() {
        assert!(serde_json::from_value::<DispatchRequest>(json!({"kind": "pause"})).is_err());
    }

    #[test]
    fn test_workflow_definition_inline() {
        let definition = WorkflowDefinition::inline("orders", "workflows/orders.wf");
        assert_eq!(definition.entry_point.relative_path, "workflows/orders.wf");
        assert!(definition.dependencies.is_empty());
    }
}
