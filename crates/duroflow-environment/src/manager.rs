// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker lifecycle manager.
//!
//! A single task owns the registry of live workers, the result history and
//! every create/destroy/persist decision. Callers talk to it through a
//! cloneable [`ManagerHandle`]; workers talk to it through per-worker
//! forwarders that tag each message with the worker id.
//!
//! # Per-run lifecycle
//!
//! ```text
//!   absent ──start──► Running ──returned/failed──► finished (result recorded)
//!                       │  ▲
//!             interrupt │  │ relaunch (new worker id, same run id)
//!                       ▼  │
//!                  RelaunchPending
//!
//!   Running/RelaunchPending ──stop──► Stopping ──ack or grace timeout──► aborted
//! ```
//!
//! At most one worker exists per run id. Messages from a worker that has been
//! replaced are dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duroflow_core::{Operation, Run, RunLog, StopResult};
use duroflow_sdk::WorkflowLoader;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{WorkerRequest, WorkerResponse, message_type};
use crate::relaunch::{self, Disposition, RelaunchPolicy};
use crate::results::{
    QueryWorkflowResult, ResourcesReport, ResultCache, ResultStatus, RunningInstance,
    WorkflowResult,
};
use crate::worker;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Relaunch and stop timing.
    pub policy: RelaunchPolicy,
    /// Maximum number of live workers.
    pub max_workers: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            policy: RelaunchPolicy::default(),
            max_workers: 32,
        }
    }
}

/// Parameters of [`ManagerHandle::trigger_start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Workflow to run.
    pub workflow_name: String,
    /// Run id; a new one is allocated when absent.
    pub run_id: Option<String>,
    /// Resolved module path.
    pub module_path: String,
    /// Existing run to resume. When absent, a given `run_id` is loaded from
    /// the run log and a new run starts empty.
    pub run: Option<Run>,
    /// Invocation arguments. Ignored when the run already has a `Start`.
    pub kwargs: Value,
}

/// Lifecycle state of a live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// The workflow is executing.
    Running,
    /// The workflow interrupted; a relaunch is scheduled.
    RelaunchPending,
    /// `STOP` was sent and not acknowledged yet.
    Stopping,
}

/// Bookkeeping for one live worker.
#[derive(Debug)]
pub struct WorkerRecord {
    /// Workflow name.
    pub workflow_name: String,
    /// Run id.
    pub run_id: String,
    /// Generation of the worker; changes on every relaunch.
    pub worker_id: Uuid,
    /// Resolved module path.
    pub module_path: String,
    /// When this worker was spawned.
    pub started_at: DateTime<Utc>,
    /// When the first worker of this run was spawned.
    pub run_started_at: DateTime<Utc>,
    /// Number of relaunches so far.
    pub relaunches: u32,
    /// Lifecycle state.
    pub state: WorkerState,
    kwargs: Value,
    last_run: Run,
    requests: mpsc::UnboundedSender<Value>,
    abort: AbortHandle,
}

impl WorkerRecord {
    fn post(&self, request: WorkerRequest) {
        if self.requests.send(request.encode()).is_err() {
            warn!(run_id = %self.run_id, worker_id = %self.worker_id, "Worker is gone, request dropped");
        }
    }
}

struct SpawnSpec {
    workflow_name: String,
    run_id: String,
    module_path: String,
    run: Run,
    kwargs: Value,
    run_started_at: DateTime<Utc>,
    relaunches: u32,
}

enum Command {
    Start {
        request: StartRequest,
        reply: oneshot::Sender<Result<String>>,
    },
    Stop {
        run_id: String,
        reply: oneshot::Sender<String>,
    },
    Trigger {
        kind: String,
        run_id: String,
        data: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Signal {
        run_id: String,
        event_name: String,
        payload: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Destroy {
        run_id: String,
        reply: oneshot::Sender<bool>,
    },
    DestroyAll {
        reply: oneshot::Sender<usize>,
    },
    Resources {
        workflow_name: String,
        reply: oneshot::Sender<ResourcesReport>,
    },
    Results {
        workflow_name: String,
        reply: oneshot::Sender<Vec<QueryWorkflowResult>>,
    },
    Status {
        run_id: String,
        reply: oneshot::Sender<ResultStatus>,
    },
}

enum Event {
    Message {
        run_id: String,
        worker_id: Uuid,
        message: Value,
    },
    TransportFailure {
        run_id: String,
        worker_id: Uuid,
        error: String,
    },
    RelaunchDue {
        run_id: String,
        worker_id: Uuid,
    },
    StopDeadline {
        run_id: String,
        worker_id: Uuid,
    },
}

/// Cloneable handle to the manager task.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
}

impl ManagerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::ManagerUnavailable)?;
        response.await.map_err(|_| Error::ManagerUnavailable)
    }

    /// Spawn a worker for a run. Returns the run id without spawning when the
    /// run already has a live worker or a recorded result.
    pub async fn trigger_start(&self, request: StartRequest) -> Result<String> {
        self.request(|reply| Command::Start { request, reply })
            .await?
    }

    /// Ask the run's worker to stop. Unknown run ids are logged and echoed.
    pub async fn trigger_stop(&self, run_id: impl Into<String>) -> Result<String> {
        let run_id = run_id.into();
        self.request(|reply| Command::Stop { run_id, reply }).await
    }

    /// Post a message of type `kind` with body `data` to the run's worker.
    pub async fn trigger(
        &self,
        kind: impl Into<String>,
        run_id: impl Into<String>,
        data: Value,
    ) -> Result<()> {
        let kind = kind.into();
        let run_id = run_id.into();
        self.request(|reply| Command::Trigger {
            kind,
            run_id,
            data,
            reply,
        })
        .await?
    }

    /// Deliver a named signal to the run's worker.
    pub async fn send_event(
        &self,
        run_id: impl Into<String>,
        event_name: impl Into<String>,
        payload: Value,
    ) -> Result<()> {
        let mut data = Map::new();
        data.insert("event_name".to_string(), Value::String(event_name.into()));
        data.insert("payload".to_string(), payload);
        self.trigger("SEND", run_id, Value::Object(data)).await
    }

    /// Deliver a named signal to a run, live or idle.
    ///
    /// Without a live worker the signal is appended to the persisted run, so
    /// it is replayed when the run is next started. Fails with
    /// [`Error::RunNotFound`] when the run log has no such run.
    pub async fn signal(
        &self,
        run_id: impl Into<String>,
        event_name: impl Into<String>,
        payload: Value,
    ) -> Result<()> {
        let run_id = run_id.into();
        let event_name = event_name.into();
        self.request(|reply| Command::Signal {
            run_id,
            event_name,
            payload,
            reply,
        })
        .await?
    }

    /// Terminate and deregister the run's worker. Returns whether one existed.
    pub async fn destroy_worker(&self, run_id: impl Into<String>) -> Result<bool> {
        let run_id = run_id.into();
        self.request(|reply| Command::Destroy { run_id, reply })
            .await
    }

    /// Terminate and deregister every worker. Returns how many existed.
    pub async fn destroy_all_workers(&self) -> Result<usize> {
        self.request(|reply| Command::DestroyAll { reply }).await
    }

    /// Live workers of a workflow.
    pub async fn allocated_resources(
        &self,
        workflow_name: impl Into<String>,
    ) -> Result<ResourcesReport> {
        let workflow_name = workflow_name.into();
        self.request(|reply| Command::Resources {
            workflow_name,
            reply,
        })
        .await
    }

    /// Finished runs of a workflow.
    pub async fn results(
        &self,
        workflow_name: impl Into<String>,
    ) -> Result<Vec<QueryWorkflowResult>> {
        let workflow_name = workflow_name.into();
        self.request(|reply| Command::Results {
            workflow_name,
            reply,
        })
        .await
    }

    /// Terminal status of a run, `UNKNOWN` when none is recorded.
    pub async fn status(&self, run_id: impl Into<String>) -> Result<ResultStatus> {
        let run_id = run_id.into();
        self.request(|reply| Command::Status { run_id, reply })
            .await
    }
}

/// The manager task state.
pub struct WorkerManager {
    run_log: Arc<dyn RunLog>,
    loader: Arc<dyn WorkflowLoader>,
    config: ManagerConfig,
    workers: HashMap<String, WorkerRecord>,
    by_workflow: HashMap<String, BTreeSet<String>>,
    results: ResultCache,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
}

impl WorkerManager {
    /// Create a manager.
    pub fn new(
        run_log: Arc<dyn RunLog>,
        loader: Arc<dyn WorkflowLoader>,
        config: ManagerConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            run_log,
            loader,
            config,
            workers: HashMap::new(),
            by_workflow: HashMap::new(),
            results: ResultCache::new(),
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the manager task. Cancelling `shutdown` destroys every worker and
    /// ends the task.
    pub fn start(mut self, shutdown: CancellationToken) -> (ManagerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(1024);
        self.shutdown = shutdown;
        let task = tokio::spawn(self.run(commands_rx));
        (
            ManagerHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            relaunch_delay_ms = self.config.policy.delay.as_millis() as u64,
            max_workers = self.config.max_workers,
            "Worker manager started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    let destroyed = self.destroy_all_workers();
                    info!(destroyed, "Worker manager shutting down");
                    break;
                }
                Some(command) = commands.recv() => self.handle_command(command).await,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => {
                let result = self.trigger_start(request).await;
                let _ = reply.send(result);
            }
            Command::Stop { run_id, reply } => {
                self.trigger_stop(&run_id);
                let _ = reply.send(run_id);
            }
            Command::Trigger {
                kind,
                run_id,
                data,
                reply,
            } => {
                let result = self.trigger(&kind, &run_id, data).await;
                let _ = reply.send(result);
            }
            Command::Signal {
                run_id,
                event_name,
                payload,
                reply,
            } => {
                let result = self.signal(&run_id, event_name, payload).await;
                let _ = reply.send(result);
            }
            Command::Destroy { run_id, reply } => {
                let _ = reply.send(self.destroy_worker(&run_id));
            }
            Command::DestroyAll { reply } => {
                let _ = reply.send(self.destroy_all_workers());
            }
            Command::Resources {
                workflow_name,
                reply,
            } => {
                let _ = reply.send(self.allocated_resources(&workflow_name));
            }
            Command::Results {
                workflow_name,
                reply,
            } => {
                let _ = reply.send(self.results.for_workflow(&workflow_name));
            }
            Command::Status { run_id, reply } => {
                let _ = reply.send(self.results.status_of(&run_id));
            }
        }
    }

    async fn trigger_start(&mut self, request: StartRequest) -> Result<String> {
        let explicit_id = request.run_id.is_some();
        let run_id = request
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.workers.contains_key(&run_id) {
            debug!(run_id = %run_id, "Run already has a live worker");
            return Ok(run_id);
        }
        if self.results.contains(&run_id) {
            debug!(run_id = %run_id, "Run already finished");
            return Ok(run_id);
        }
        if self.workers.len() >= self.config.max_workers {
            warn!(
                run_id = %run_id,
                max_workers = self.config.max_workers,
                "Worker capacity exhausted"
            );
            return Err(Error::CapacityExhausted(self.config.max_workers));
        }

        let run = match request.run {
            Some(run) => run,
            None if explicit_id => self.run_log.create_or_get_run(&run_id).await?,
            None => Run::new(&run_id),
        };
        if run.run_id != run_id {
            return Err(Error::InvalidRequest(format!(
                "run '{}' does not belong to run id '{}'",
                run.run_id, run_id
            )));
        }
        if run.is_stopped() {
            info!(run_id = %run_id, workflow = %request.workflow_name, "Run was stopped, not resuming");
            self.results.push(
                &request.workflow_name,
                QueryWorkflowResult::aborted(&run_id, Utc::now()),
            );
            return Ok(run_id);
        }
        let kwargs = run.start_kwargs().cloned().unwrap_or(request.kwargs);

        info!(
            run_id = %run_id,
            workflow = %request.workflow_name,
            resumed = run.has_started(),
            "Starting run"
        );

        self.spawn_worker(SpawnSpec {
            workflow_name: request.workflow_name,
            run_id: run_id.clone(),
            module_path: request.module_path,
            run,
            kwargs,
            run_started_at: Utc::now(),
            relaunches: 0,
        });

        Ok(run_id)
    }

    fn trigger_stop(&mut self, run_id: &str) {
        let grace = self.config.policy.stop_grace_period;
        let Some(record) = self.workers.get_mut(run_id) else {
            warn!(run_id = %run_id, "Stop requested for run without a live worker");
            return;
        };
        if record.state == WorkerState::Stopping {
            debug!(run_id = %run_id, "Stop already in progress");
            return;
        }

        record.state = WorkerState::Stopping;
        record.post(WorkerRequest::Stop);
        let worker_id = record.worker_id;
        info!(run_id = %run_id, worker_id = %worker_id, "Stopping run");

        self.schedule(
            Event::StopDeadline {
                run_id: run_id.to_string(),
                worker_id,
            },
            grace,
        );
    }

    async fn trigger(&mut self, kind: &str, run_id: &str, data: Value) -> Result<()> {
        let mut message = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(Error::InvalidRequest(
                    "message body must be an object".to_string(),
                ));
            }
        };
        message.insert("type".to_string(), Value::String(kind.to_string()));
        let request = WorkerRequest::decode(Value::Object(message))
            .map_err(|e| Error::InvalidRequest(format!("invalid {} message: {}", kind, e)))?;

        let Some(record) = self.workers.get_mut(run_id) else {
            return Err(Error::WorkerNotFound(run_id.to_string()));
        };

        match request {
            WorkerRequest::Start { .. } => Err(Error::InvalidRequest(
                "START is only sent when a worker is spawned".to_string(),
            )),
            WorkerRequest::Stop => {
                self.trigger_stop(run_id);
                Ok(())
            }
            WorkerRequest::Send {
                event_name,
                payload,
            } if record.state == WorkerState::RelaunchPending => {
                // The worker is about to be replaced; record the signal so the
                // next worker replays it.
                record.last_run.push(Operation::Send {
                    event_name: event_name.clone(),
                    payload,
                });
                let run = record.last_run.clone();
                debug!(run_id = %run_id, event_name = %event_name, "Signal recorded for pending relaunch");
                self.persist(&run).await;
                Ok(())
            }
            request => {
                record.post(request);
                Ok(())
            }
        }
    }

    async fn signal(&mut self, run_id: &str, event_name: String, payload: Value) -> Result<()> {
        if self.workers.contains_key(run_id) {
            let mut data = Map::new();
            data.insert("event_name".to_string(), Value::String(event_name));
            data.insert("payload".to_string(), payload);
            return self.trigger("SEND", run_id, Value::Object(data)).await;
        }

        let mut run = self
            .run_log
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        run.push(Operation::Send {
            event_name: event_name.clone(),
            payload,
        });
        self.run_log.persist_run(&run).await?;

        info!(run_id = %run_id, event_name = %event_name, "Signal recorded for idle run");
        Ok(())
    }

    fn destroy_worker(&mut self, run_id: &str) -> bool {
        match self.remove_worker(run_id) {
            Some(record) => {
                record.abort.abort();
                debug!(run_id = %run_id, worker_id = %record.worker_id, "Worker destroyed");
                true
            }
            None => {
                debug!(run_id = %run_id, "Destroy requested for unknown worker");
                false
            }
        }
    }

    fn destroy_all_workers(&mut self) -> usize {
        let run_ids: Vec<String> = self.workers.keys().cloned().collect();
        run_ids
            .iter()
            .filter(|run_id| self.destroy_worker(run_id))
            .count()
    }

    fn allocated_resources(&self, workflow_name: &str) -> ResourcesReport {
        let mut running: Vec<RunningInstance> = self
            .by_workflow
            .get(workflow_name)
            .into_iter()
            .flatten()
            .filter_map(|run_id| self.workers.get(run_id))
            .map(|record| RunningInstance {
                run_id: record.run_id.clone(),
                started_at: record.started_at,
            })
            .collect();
        running.sort_by_key(|instance| instance.started_at);

        ResourcesReport {
            count: running.len(),
            workflow: workflow_name.to_string(),
            running,
        }
    }

    // ========================================================================
    // Worker events
    // ========================================================================

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message {
                run_id,
                worker_id,
                message,
            } => self.on_message(&run_id, worker_id, message).await,
            Event::TransportFailure {
                run_id,
                worker_id,
                error,
            } => self.on_transport_failure(&run_id, worker_id, &error),
            Event::RelaunchDue { run_id, worker_id } => self.relaunch(&run_id, worker_id).await,
            Event::StopDeadline { run_id, worker_id } => {
                self.on_stop_deadline(&run_id, worker_id).await
            }
        }
    }

    fn is_current(&self, run_id: &str, worker_id: Uuid) -> bool {
        self.workers
            .get(run_id)
            .is_some_and(|record| record.worker_id == worker_id)
    }

    async fn on_message(&mut self, run_id: &str, worker_id: Uuid, message: Value) {
        if !self.is_current(run_id, worker_id) {
            debug!(run_id = %run_id, worker_id = %worker_id, "Dropping message from retired worker");
            return;
        }

        let response = match WorkerResponse::decode(message.clone()) {
            Ok(response) => response,
            Err(e) => {
                error!(
                    run_id = %run_id,
                    worker_id = %worker_id,
                    message_type = message_type(&message),
                    error = %e,
                    "Unrecognized worker message"
                );
                return;
            }
        };

        match response {
            WorkerResponse::Start { result, run } => {
                let result = WorkflowResult::from_outcome(result, run);
                self.on_start_result(run_id, result).await;
            }
            WorkerResponse::Stop { run } => self.on_stop_result(run_id, run).await,
            WorkerResponse::Send {
                event_name, run, ..
            } => {
                let Some(record) = self.workers.get_mut(run_id) else {
                    return;
                };
                if !merge_reported(&mut record.last_run, &run) {
                    debug!(run_id = %run_id, event_name = %event_name, "Signal already recorded");
                    return;
                }
                let merged = record.last_run.clone();
                debug!(run_id = %run_id, event_name = %event_name, "Persisting delivered signal");
                self.persist(&merged).await;
            }
            WorkerResponse::Error { message } => {
                warn!(run_id = %run_id, worker_id = %worker_id, message = %message, "Worker rejected a request");
            }
        }
    }

    async fn on_start_result(&mut self, run_id: &str, result: WorkflowResult) {
        if let Some(record) = self.workers.get_mut(run_id) {
            record.last_run = result.run.clone();
        }
        self.persist(&result.run).await;

        match relaunch::classify(&result) {
            Disposition::Relaunch(interrupt) => {
                let delay = self.config.policy.delay;
                let Some(record) = self.workers.get_mut(run_id) else {
                    return;
                };
                if record.state == WorkerState::Stopping {
                    debug!(run_id = %run_id, "Interrupted while stopping, awaiting stop acknowledgement");
                    return;
                }
                record.state = WorkerState::RelaunchPending;
                let worker_id = record.worker_id;
                info!(
                    run_id = %run_id,
                    kind = %interrupt.kind,
                    detail = interrupt.detail.as_deref().unwrap_or(""),
                    delay_ms = delay.as_millis() as u64,
                    "Run suspended, relaunch scheduled"
                );
                self.schedule(
                    Event::RelaunchDue {
                        run_id: run_id.to_string(),
                        worker_id,
                    },
                    delay,
                );
            }
            Disposition::Finalize(status) => {
                let Some(record) = self.remove_worker(run_id) else {
                    return;
                };
                record.abort.abort();
                info!(
                    run_id = %run_id,
                    status = ?status,
                    relaunches = record.relaunches,
                    exception = result.exception.as_deref().unwrap_or(""),
                    "Run finished"
                );
                let summary = QueryWorkflowResult::finished(run_id, record.run_started_at, &result);
                self.results.push(&record.workflow_name, summary);
            }
        }
    }

    async fn on_stop_result(&mut self, run_id: &str, run: Run) {
        let Some(mut record) = self.remove_worker(run_id) else {
            return;
        };
        merge_reported(&mut record.last_run, &run);
        self.persist(&record.last_run).await;
        record.abort.abort();
        info!(run_id = %run_id, "Run aborted");
        self.results.push(
            &record.workflow_name,
            QueryWorkflowResult::aborted(run_id, record.run_started_at),
        );
    }

    async fn on_stop_deadline(&mut self, run_id: &str, worker_id: Uuid) {
        let stopping = self
            .workers
            .get(run_id)
            .is_some_and(|r| r.worker_id == worker_id && r.state == WorkerState::Stopping);
        if !stopping {
            return;
        }
        let Some(record) = self.remove_worker(run_id) else {
            return;
        };
        record.abort.abort();
        warn!(run_id = %run_id, worker_id = %worker_id, "Worker did not acknowledge stop, terminated");

        let mut run = record.last_run;
        if !run.has_started() {
            run.push(Operation::Start {
                kwargs: record.kwargs,
            });
        }
        if !run.is_stopped() {
            run.push(Operation::Stop {
                result: StopResult::Ok(Value::Null),
            });
        }
        self.persist(&run).await;
        self.results.push(
            &record.workflow_name,
            QueryWorkflowResult::aborted(run_id, record.run_started_at),
        );
    }

    fn on_transport_failure(&mut self, run_id: &str, worker_id: Uuid, error: &str) {
        if !self.is_current(run_id, worker_id) {
            debug!(run_id = %run_id, worker_id = %worker_id, "Ignoring failure of retired worker");
            return;
        }
        // The last persisted state stands; no result is recorded.
        error!(run_id = %run_id, worker_id = %worker_id, error = %error, "Worker crashed");
        self.remove_worker(run_id);
    }

    async fn relaunch(&mut self, run_id: &str, worker_id: Uuid) {
        let pending = self.workers.get(run_id).is_some_and(|r| {
            r.worker_id == worker_id && r.state == WorkerState::RelaunchPending
        });
        if !pending {
            debug!(run_id = %run_id, worker_id = %worker_id, "Relaunch no longer needed");
            return;
        }
        let Some(record) = self.remove_worker(run_id) else {
            return;
        };
        record.abort.abort();

        let run = match self.run_log.create_or_get_run(run_id).await {
            Ok(run) if run.operations.len() >= record.last_run.operations.len() => run,
            Ok(_) => {
                warn!(run_id = %run_id, "Run log is behind the last reported run, relaunching from memory");
                record.last_run
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to load run, relaunching from memory");
                record.last_run
            }
        };
        let kwargs = run.start_kwargs().cloned().unwrap_or(Value::Null);
        let relaunches = record.relaunches + 1;

        info!(run_id = %run_id, relaunches, "Relaunching run");
        self.spawn_worker(SpawnSpec {
            workflow_name: record.workflow_name,
            run_id: run_id.to_string(),
            module_path: record.module_path,
            run,
            kwargs,
            run_started_at: record.run_started_at,
            relaunches,
        });
    }

    // ========================================================================
    // Registry
    // ========================================================================

    fn spawn_worker(&mut self, spec: SpawnSpec) {
        let worker_id = Uuid::new_v4();
        let handle = worker::spawn(spec.run_id.clone(), self.loader.clone());

        let record = WorkerRecord {
            workflow_name: spec.workflow_name.clone(),
            run_id: spec.run_id.clone(),
            worker_id,
            module_path: spec.module_path.clone(),
            started_at: Utc::now(),
            run_started_at: spec.run_started_at,
            relaunches: spec.relaunches,
            state: WorkerState::Running,
            kwargs: spec.kwargs.clone(),
            last_run: spec.run.clone(),
            requests: handle.requests,
            abort: handle.task.abort_handle(),
        };

        record.post(WorkerRequest::Start {
            workflow_name: spec.workflow_name,
            module_path: spec.module_path,
            run: spec.run,
            kwargs: spec.kwargs,
        });
        self.listen(&spec.run_id, worker_id, handle.responses, handle.task);

        debug!(run_id = %spec.run_id, worker_id = %worker_id, "Worker spawned");
        self.by_workflow
            .entry(record.workflow_name.clone())
            .or_default()
            .insert(record.run_id.clone());
        self.workers.insert(spec.run_id, record);
    }

    /// Forward everything the worker posts into the manager loop, then report
    /// how the worker ended.
    fn listen(
        &self,
        run_id: &str,
        worker_id: Uuid,
        mut responses: mpsc::UnboundedReceiver<Value>,
        task: JoinHandle<()>,
    ) {
        let events = self.events_tx.clone();
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            while let Some(message) = responses.recv().await {
                let event = Event::Message {
                    run_id: run_id.clone(),
                    worker_id,
                    message,
                };
                if events.send(event).is_err() {
                    return;
                }
            }

            match task.await {
                Ok(()) => debug!(run_id = %run_id, worker_id = %worker_id, "Worker exited"),
                Err(e) if e.is_cancelled() => {
                    debug!(run_id = %run_id, worker_id = %worker_id, "Worker terminated")
                }
                Err(e) => {
                    let _ = events.send(Event::TransportFailure {
                        run_id,
                        worker_id,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    fn remove_worker(&mut self, run_id: &str) -> Option<WorkerRecord> {
        let record = self.workers.remove(run_id)?;
        if let Some(runs) = self.by_workflow.get_mut(&record.workflow_name) {
            runs.remove(run_id);
            if runs.is_empty() {
                self.by_workflow.remove(&record.workflow_name);
            }
        }
        Some(record)
    }

    fn schedule(&self, event: Event, delay: Duration) {
        let events = self.events_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(event);
                }
            }
        });
    }

    async fn persist(&self, run: &Run) {
        if let Err(e) = self.run_log.persist_run(run).await {
            error!(
                run_id = %run.run_id,
                error = %e,
                code = e.error_code(),
                "Failed to persist run"
            );
        }
    }
}

/// Fold a run reported by a worker into the manager's copy.
///
/// While a run is relaunch-pending the manager appends signals itself, so a
/// late echo from the worker can lack them. Operations past the common prefix
/// of the two runs are appended to `known`. Returns whether `known` changed.
fn merge_reported(known: &mut Run, reported: &Run) -> bool {
    let common = known
        .operations
        .iter()
        .zip(&reported.operations)
        .take_while(|(a, b)| a == b)
        .count();
    let tail = &reported.operations[common..];
    if tail.is_empty() {
        return false;
    }
    known.operations.extend_from_slice(tail);
    true
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("run_log", &"...")
            .field("workers", &self.workers.len())
            .field("config", &self.config)
            .finish()
    }
}
