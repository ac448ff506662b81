// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution context injected into workflow code.
//!
//! The context records every side-effecting step of a run and replays the
//! recorded results on later execution attempts. It performs no I/O: the run
//! it builds up is handed back to the worker, which reports it to the manager
//! for persistence.
//!
//! # Replay
//!
//! Each call to [`ExecutionContext::save`] gets the next sequential id. If the
//! run the context was built from already holds a `Save` with that id, the
//! recorded value is returned and the step is not executed again. A failing
//! step records nothing and does not consume its id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duroflow_core::{Interrupt, InterruptKind, Operation, Run, StopResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::WorkflowError;

/// Per-run handle used by workflow code to record and replay effects.
///
/// Cloning is cheap; all clones share the same run.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

struct Inner {
    run_id: String,
    kwargs: Value,
    /// Saves present when the context was built.
    recorded: HashMap<u64, Value>,
    state: Mutex<State>,
    /// Serializes steps so ids are appended in call order.
    steps: Mutex<()>,
}

struct State {
    run: Run,
    next_save_id: u64,
    event_cursors: HashMap<String, usize>,
}

impl ExecutionContext {
    /// Build a context over `run` for an invocation with `kwargs`.
    pub fn new(run: Run, kwargs: Value) -> Self {
        let recorded = run
            .saves()
            .map(|(id, value)| (id, value.clone()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                run_id: run.run_id.clone(),
                kwargs,
                recorded,
                state: Mutex::new(State {
                    run,
                    next_save_id: 1,
                    event_cursors: HashMap::new(),
                }),
                steps: Mutex::new(()),
            }),
        }
    }

    /// The run id.
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Keyword arguments of this invocation.
    pub fn kwargs(&self) -> &Value {
        &self.inner.kwargs
    }

    /// Record the invocation. The worker calls this once, before user code,
    /// and only when the run has no `Start` yet.
    pub async fn start(&self) {
        let mut state = self.inner.state.lock().await;
        state.run.push(Operation::Start {
            kwargs: self.inner.kwargs.clone(),
        });
    }

    /// Run `step` at most once across all execution attempts of this run.
    ///
    /// On replay the recorded value is deserialized and returned without
    /// invoking `step`.
    pub async fn save<T, F, Fut>(&self, step: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let _step = self.inner.steps.lock().await;
        let id = self.inner.state.lock().await.next_save_id;

        if let Some(recorded) = self.inner.recorded.get(&id) {
            let value = serde_json::from_value(recorded.clone()).map_err(|e| {
                WorkflowError::new(format!(
                    "recorded value of step {} does not match the workflow: {}",
                    id, e
                ))
            })?;
            self.inner.state.lock().await.next_save_id = id + 1;
            debug!(run_id = %self.inner.run_id, save_id = id, "Replayed recorded step");
            return Ok(value);
        }

        let value = step().await?;
        let encoded = serde_json::to_value(&value)?;

        let mut state = self.inner.state.lock().await;
        state.run.push(Operation::Save { id, value: encoded });
        state.next_save_id = id + 1;
        debug!(run_id = %self.inner.run_id, save_id = id, "Recorded step");
        Ok(value)
    }

    /// Record a named signal.
    pub async fn event(&self, event_name: impl Into<String>, payload: Value) {
        let mut state = self.inner.state.lock().await;
        state.run.push(Operation::Send {
            event_name: event_name.into(),
            payload,
        });
    }

    /// Record an explicit termination.
    pub async fn stop(&self, result: StopResult) {
        let mut state = self.inner.state.lock().await;
        state.run.push(Operation::Stop { result });
    }

    /// Snapshot of the run as recorded so far.
    pub async fn run(&self) -> Run {
        self.inner.state.lock().await.run.clone()
    }

    /// Id the next `save` call will use.
    pub async fn next_save_id(&self) -> u64 {
        self.inner.state.lock().await.next_save_id
    }

    /// All payloads delivered under `event_name` so far.
    pub async fn received(&self, event_name: &str) -> Vec<Value> {
        self.inner
            .state
            .lock()
            .await
            .run
            .events(event_name)
            .cloned()
            .collect()
    }

    /// Durable sleep.
    ///
    /// The wake-up instant is recorded as a step, so relaunched attempts see
    /// the original deadline. Raises a `SLEEP` interrupt until it has passed.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        let wake_at: DateTime<Utc> = self
            .save(|| async move {
                let duration = chrono::Duration::from_std(duration)
                    .map_err(|e| WorkflowError::new(format!("invalid sleep duration: {}", e)))?;
                Ok::<_, WorkflowError>(Utc::now() + duration)
            })
            .await?;

        if Utc::now() < wake_at {
            return Err(Interrupt::new(InterruptKind::Sleep)
                .with_detail(wake_at.to_rfc3339())
                .into());
        }
        Ok(())
    }

    /// Wait for the next signal named `event_name`.
    ///
    /// The Nth call for a name returns the Nth delivered payload with that
    /// name. Raises `WAIT_RECEIVE_EVENT` when it has not been delivered yet.
    pub async fn wait_for_event<T>(&self, event_name: &str) -> Result<T, WorkflowError>
    where
        T: DeserializeOwned,
    {
        self.next_event(event_name, InterruptKind::WaitReceiveEvent)
            .await
    }

    /// Wait for the next signal named `event_name` and run `handler` on it as
    /// a recorded step. Raises `WAIT_HANDLE_EVENT` while the signal is missing.
    pub async fn handle_event<P, T, F, Fut>(
        &self,
        event_name: &str,
        handler: F,
    ) -> Result<T, WorkflowError>
    where
        P: DeserializeOwned,
        T: Serialize + DeserializeOwned,
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let payload: P = self
            .next_event(event_name, InterruptKind::WaitHandleEvent)
            .await?;
        self.save(move || handler(payload)).await
    }

    /// Unwrap `value`, raising `WAIT_ENSURE_VALUE` when it is absent.
    pub fn ensure_value<T>(&self, name: &str, value: Option<T>) -> Result<T, WorkflowError> {
        value.ok_or_else(|| {
            Interrupt::new(InterruptKind::WaitEnsureValue)
                .with_detail(name)
                .into()
        })
    }

    async fn next_event<T>(&self, event_name: &str, kind: InterruptKind) -> Result<T, WorkflowError>
    where
        T: DeserializeOwned,
    {
        let mut state = self.inner.state.lock().await;
        let cursor = state.event_cursors.get(event_name).copied().unwrap_or(0);
        let payload = state.run.events(event_name).nth(cursor).cloned();

        match payload {
            Some(payload) => {
                state
                    .event_cursors
                    .insert(event_name.to_string(), cursor + 1);
                Ok(serde_json::from_value(payload)?)
            }
            None => {
                debug!(run_id = %self.inner.run_id, event_name, kind = %kind, "Signal not delivered yet");
                Err(Interrupt::new(kind).with_detail(event_name).into())
            }
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.inner.run_id)
            .field("recorded", &self.inner.recorded.len())
            .finish()
    }
}
