// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker: the isolated execution unit hosting one attempt of one run.
//!
//! A worker is a tokio task that owns its execution context and talks to the
//! manager only through two channels of JSON messages. It keeps serving
//! `STOP` and `SEND` after the workflow future has finished, until it is
//! stopped or aborted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use duroflow_core::StopResult;
use duroflow_sdk::{ExecutionContext, WorkflowError, WorkflowLoader};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{ThrownValue, WorkerOutcome, WorkerRequest, WorkerResponse, message_type};

type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>>;

/// Channels and task handle of a spawned worker.
pub struct WorkerHandle {
    /// Requests to the worker.
    pub requests: mpsc::UnboundedSender<Value>,
    /// Messages posted by the worker.
    pub responses: mpsc::UnboundedReceiver<Value>,
    /// The worker task.
    pub task: JoinHandle<()>,
}

/// Spawn a worker for `run_id`. It idles until it receives `START`.
pub fn spawn(run_id: impl Into<String>, loader: Arc<dyn WorkflowLoader>) -> WorkerHandle {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let worker = Worker {
        run_id: run_id.into(),
        loader,
        responses: response_tx,
        context: None,
    };
    let task = tokio::spawn(worker.run(request_rx));

    WorkerHandle {
        requests: request_tx,
        responses: response_rx,
        task,
    }
}

struct Worker {
    run_id: String,
    loader: Arc<dyn WorkflowLoader>,
    responses: mpsc::UnboundedSender<Value>,
    context: Option<ExecutionContext>,
}

enum Control {
    Continue,
    Exit,
}

impl Worker {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Value>) {
        let mut running: Option<WorkflowFuture> = None;

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        debug!(run_id = %self.run_id, "Request channel closed, worker exiting");
                        break;
                    };
                    if let Control::Exit = self.handle_request(request, &mut running).await {
                        break;
                    }
                }
                outcome = drive(&mut running) => {
                    running = None;
                    self.report_outcome(outcome).await;
                }
            }
        }
    }

    async fn handle_request(
        &mut self,
        request: Value,
        running: &mut Option<WorkflowFuture>,
    ) -> Control {
        let request = match WorkerRequest::decode(request.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    run_id = %self.run_id,
                    message_type = message_type(&request),
                    error = %e,
                    "Unrecognized request"
                );
                self.post(WorkerResponse::Error {
                    message: format!(
                        "unrecognized request of type '{}': {}",
                        message_type(&request),
                        e
                    ),
                });
                return Control::Continue;
            }
        };

        match request {
            WorkerRequest::Start {
                workflow_name,
                module_path,
                run,
                kwargs,
            } => {
                if self.context.is_some() {
                    self.post(WorkerResponse::Error {
                        message: "worker already started".to_string(),
                    });
                    return Control::Continue;
                }

                let needs_start = !run.has_started();
                let ctx = ExecutionContext::new(run, kwargs.clone());
                if needs_start {
                    ctx.start().await;
                }
                self.context = Some(ctx.clone());

                match self.loader.load(&module_path, &workflow_name) {
                    Ok(workflow) => {
                        info!(
                            run_id = %self.run_id,
                            workflow = %workflow_name,
                            module_path = %module_path,
                            "Workflow started"
                        );
                        *running = Some(Box::pin(async move { workflow.run(ctx, kwargs).await }));
                    }
                    Err(e) => {
                        warn!(run_id = %self.run_id, error = %e, "Failed to load workflow");
                        let thrown = ThrownValue {
                            message: e.to_string(),
                            value: None,
                        };
                        self.post(WorkerResponse::Start {
                            result: WorkerOutcome::Thrown(thrown),
                            run: ctx.run().await,
                        });
                    }
                }
                Control::Continue
            }
            WorkerRequest::Stop => {
                let Some(ctx) = &self.context else {
                    self.post(WorkerResponse::Error {
                        message: "STOP received before START".to_string(),
                    });
                    return Control::Continue;
                };
                ctx.stop(StopResult::Ok(Value::Null)).await;
                let run = ctx.run().await;
                info!(run_id = %self.run_id, "Workflow stopped");
                self.post(WorkerResponse::Stop { run });
                Control::Exit
            }
            WorkerRequest::Send {
                event_name,
                payload,
            } => {
                let Some(ctx) = &self.context else {
                    self.post(WorkerResponse::Error {
                        message: "SEND received before START".to_string(),
                    });
                    return Control::Continue;
                };
                ctx.event(event_name.clone(), payload.clone()).await;
                let run = ctx.run().await;
                debug!(run_id = %self.run_id, event_name = %event_name, "Signal recorded");
                self.post(WorkerResponse::Send {
                    event_name,
                    payload,
                    run,
                });
                Control::Continue
            }
        }
    }

    async fn report_outcome(&self, outcome: Result<Value, WorkflowError>) {
        let Some(ctx) = &self.context else {
            return;
        };
        debug!(run_id = %self.run_id, ok = outcome.is_ok(), "Workflow future completed");
        self.post(WorkerResponse::Start {
            result: outcome.into(),
            run: ctx.run().await,
        });
    }

    fn post(&self, response: WorkerResponse) {
        if self.responses.send(response.encode()).is_err() {
            debug!(run_id = %self.run_id, "Manager no longer listening");
        }
    }
}

async fn drive(running: &mut Option<WorkflowFuture>) -> Result<Value, WorkflowError> {
    match running.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duroflow_core::{Operation, Run};
    use duroflow_sdk::{WorkflowRegistry, workflow_fn};
    use serde_json::json;
    use std::time::Duration;

    fn loader() -> Arc<dyn WorkflowLoader> {
        Arc::new(
            WorkflowRegistry::new()
                .with_workflow(
                    "mod",
                    "add_one",
                    workflow_fn(|ctx, kwargs| async move {
                        let x = kwargs["x"].as_i64().unwrap_or_default();
                        let y: i64 = ctx.save(|| async move { Ok(x + 1) }).await?;
                        Ok(json!(y))
                    }),
                )
                .with_workflow(
                    "mod",
                    "forever",
                    workflow_fn(|_ctx, _kwargs| async move {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Value::Null)
                    }),
                ),
        )
    }

    fn start(workflow: &str, run: Run, kwargs: Value) -> Value {
        WorkerRequest::Start {
            workflow_name: workflow.to_string(),
            module_path: "mod".to_string(),
            run,
            kwargs,
        }
        .encode()
    }

    async fn next(handle: &mut WorkerHandle) -> WorkerResponse {
        let raw = tokio::time::timeout(Duration::from_secs(5), handle.responses.recv())
            .await
            .expect("timed out waiting for worker")
            .expect("worker channel closed");
        WorkerResponse::decode(raw).unwrap()
    }

    #[tokio::test]
    async fn test_start_reports_returned_value() {
        let mut handle = spawn("r-1", loader());
        handle
            .requests
            .send(start("add_one", Run::new("r-1"), json!({"x": 1})))
            .unwrap();

        match next(&mut handle).await {
            WorkerResponse::Start { result, run } => {
                assert_eq!(result, WorkerOutcome::Returned(json!(2)));
                assert_eq!(run.start_kwargs(), Some(&json!({"x": 1})));
                assert_eq!(run.saved_value(1), Some(&json!(2)));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relaunch_does_not_append_second_start() {
        let mut run = Run::new("r-2");
        run.push(Operation::Start {
            kwargs: json!({"x": 1}),
        });
        let mut handle = spawn("r-2", loader());
        handle
            .requests
            .send(start("add_one", run, json!({"x": 1})))
            .unwrap();

        let WorkerResponse::Start { run, .. } = next(&mut handle).await else {
            panic!("expected START");
        };
        let starts = run
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::Start { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_send_and_stop_while_running() {
        let mut handle = spawn("r-3", loader());
        handle
            .requests
            .send(start("forever", Run::new("r-3"), json!({})))
            .unwrap();
        handle
            .requests
            .send(
                WorkerRequest::Send {
                    event_name: "ping".to_string(),
                    payload: json!({"n": 1}),
                }
                .encode(),
            )
            .unwrap();

        let WorkerResponse::Send { run, .. } = next(&mut handle).await else {
            panic!("expected SEND echo");
        };
        assert_eq!(run.events("ping").count(), 1);

        handle.requests.send(WorkerRequest::Stop.encode()).unwrap();
        let WorkerResponse::Stop { run } = next(&mut handle).await else {
            panic!("expected STOP");
        };
        assert!(run.is_stopped());

        // the worker exits after acknowledging the stop
        tokio::time::timeout(Duration::from_secs(5), handle.task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_message_type_yields_error() {
        let mut handle = spawn("r-4", loader());
        handle.requests.send(json!({"type": "PAUSE"})).unwrap();

        let WorkerResponse::Error { message } = next(&mut handle).await else {
            panic!("expected ERROR");
        };
        assert!(message.contains("PAUSE"));
    }

    #[tokio::test]
    async fn test_missing_workflow_reported_as_thrown() {
        let mut handle = spawn("r-5", loader());
        handle
            .requests
            .send(start("nope", Run::new("r-5"), json!({})))
            .unwrap();

        let WorkerResponse::Start { result, .. } = next(&mut handle).await else {
            panic!("expected START");
        };
        assert!(matches!(result, WorkerOutcome::Thrown(_)));
    }
}
