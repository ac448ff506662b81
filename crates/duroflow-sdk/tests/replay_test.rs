// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-attempt replay tests driving a workflow the way a worker does.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use duroflow_sdk::{
    ExecutionContext, InterruptKind, Operation, Run, Workflow, WorkflowError, workflow_fn,
};
use serde_json::{Value, json};

/// One execution attempt: build a context over `run`, start it if needed,
/// invoke the workflow and return its outcome with the updated run.
async fn attempt(
    workflow: &Arc<dyn Workflow>,
    run: Run,
    kwargs: Value,
) -> (Result<Value, WorkflowError>, Run) {
    let needs_start = !run.has_started();
    let ctx = ExecutionContext::new(run, kwargs.clone());
    if needs_start {
        ctx.start().await;
    }
    let outcome = workflow.run(ctx.clone(), kwargs).await;
    (outcome, ctx.run().await)
}

fn counting_workflow(executed: Arc<AtomicUsize>) -> Arc<dyn Workflow> {
    workflow_fn(move |ctx, kwargs| {
        let executed = executed.clone();
        async move {
            let base = kwargs["base"].as_i64().unwrap_or_default();
            let a: i64 = ctx
                .save(|| async {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(base + 1)
                })
                .await?;
            let signal: Value = ctx.wait_for_event("approve").await?;
            let b: i64 = ctx
                .save(|| async {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(a + signal["by"].as_i64().unwrap_or_default())
                })
                .await?;
            Ok(json!(b))
        }
    })
}

#[tokio::test]
async fn test_interrupt_then_resume_after_signal() {
    let executed = Arc::new(AtomicUsize::new(0));
    let workflow = counting_workflow(executed.clone());
    let kwargs = json!({"base": 10});

    let (outcome, run) = attempt(&workflow, Run::new("r-1"), kwargs.clone()).await;
    let err = outcome.unwrap_err();
    assert_eq!(err.interrupt().unwrap().kind, InterruptKind::WaitReceiveEvent);
    assert_eq!(run.save_count(), 1);

    // a relaunch without the signal suspends again without re-running step 1
    let (outcome, run) = attempt(&workflow, run, kwargs.clone()).await;
    assert!(outcome.unwrap_err().is_interrupt());
    assert_eq!(executed.load(Ordering::SeqCst), 1);

    let mut run = run;
    run.push(Operation::Send {
        event_name: "approve".to_string(),
        payload: json!({"by": 5}),
    });

    let (outcome, run) = attempt(&workflow, run, kwargs).await;
    assert_eq!(outcome.unwrap(), json!(16));
    assert_eq!(executed.load(Ordering::SeqCst), 2);

    // one Start, gap-free save ids
    let starts = run
        .operations
        .iter()
        .filter(|op| matches!(op, Operation::Start { .. }))
        .count();
    assert_eq!(starts, 1);
    let ids: Vec<u64> = run.saves().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_genuine_failure_is_not_interrupt() {
    let workflow = workflow_fn(|ctx, _kwargs| async move {
        ctx.save(|| async { Ok(1) }).await?;
        Err(WorkflowError::new("boom"))
    });

    let (outcome, run) = attempt(&workflow, Run::new("r-2"), json!({})).await;
    let err = outcome.unwrap_err();
    assert!(!err.is_interrupt());
    assert_eq!(err.message, "boom");
    assert_eq!(run.save_count(), 1);
}
