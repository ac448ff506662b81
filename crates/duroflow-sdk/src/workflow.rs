// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow entry points.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::WorkflowError;

/// A durable workflow.
///
/// `run` may be invoked many times for the same run id: once per execution
/// attempt. Everything with side effects must go through the context so that
/// later attempts replay instead of repeating it.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Execute the workflow body.
    async fn run(&self, ctx: ExecutionContext, kwargs: Value) -> Result<Value, WorkflowError>;
}

/// Adapter turning an async closure into a [`Workflow`].
pub struct FnWorkflow<F> {
    f: F,
}

impl<F> FnWorkflow<F> {
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Workflow for FnWorkflow<F>
where
    F: Fn(ExecutionContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    async fn run(&self, ctx: ExecutionContext, kwargs: Value) -> Result<Value, WorkflowError> {
        (self.f)(ctx, kwargs).await
    }
}

/// Build a shareable workflow from an async closure.
///
/// ```ignore
/// let add_one = workflow_fn(|ctx, kwargs| async move {
///     let x = kwargs["x"].as_i64().unwrap_or_default();
///     let y: i64 = ctx.save(|| async move { Ok(x + 1) }).await?;
///     Ok(serde_json::json!(y))
/// });
/// ```
pub fn workflow_fn<F, Fut>(f: F) -> Arc<dyn Workflow>
where
    F: Fn(ExecutionContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    Arc::new(FnWorkflow::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duroflow_core::Run;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_workflow_runs_closure() {
        let workflow = workflow_fn(|ctx, kwargs| async move {
            let x = kwargs["x"].as_i64().unwrap_or_default();
            let y: i64 = ctx.save(|| async move { Ok(x + 1) }).await?;
            Ok(json!(y))
        });

        let ctx = ExecutionContext::new(Run::new("r"), json!({"x": 1}));
        let result = workflow.run(ctx.clone(), json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!(2));
        assert_eq!(ctx.run().await.save_count(), 1);
    }
}
