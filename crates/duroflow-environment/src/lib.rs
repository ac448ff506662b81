// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duroflow Environment - Worker Lifecycle and Dispatch
//!
//! This crate hosts workflow runs. Each execution attempt of a run lives in
//! its own worker task; when the workflow suspends, the worker is torn down
//! and a new one replays the persisted run later.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     External request layer                        │
//! └──────────────────────────────────────────────────────────────────┘
//!                                │ DispatchRequest
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Dispatcher ── ModuleResolver (static / content-verified fs)      │
//! └──────────────────────────────────────────────────────────────────┘
//!                                │ ManagerHandle (commands)
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  WorkerManager task: registry, results, relaunch timers           │
//! └──────────────────────────────────────────────────────────────────┘
//!         │ START / STOP / SEND                  ▲ tagged responses
//!         ▼                                      │
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  Worker (run A, attempt N)   │ ... │  Worker (run B, attempt M)   │
//! │  ExecutionContext + workflow │     │                              │
//! └──────────────────────────────┘     └──────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  RunLog (memory / SQLite / PostgreSQL)                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `start` | Start a run, or resume one by id |
//! | `stop` | Stop a run; it is recorded as `ABORTED` |
//! | `event` | Deliver a named signal to a run |
//! | `results` | Finished runs of a workflow |
//! | `resources` | Live runs of a workflow |
//! | `status` | Terminal status of a run |
//!
//! # Run outcomes
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `COMPLETED` | The workflow returned a value |
//! | `COMPLETED_WITH_ERROR` | The workflow failed with something other than an interrupt |
//! | `ABORTED` | The run was stopped |
//! | `UNKNOWN` | No terminal result is recorded |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables read by the
//! binary.

#![deny(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod relaunch;
pub mod resolver;
pub mod results;
pub mod runtime;
pub mod worker;

pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher, WorkflowDefinition};
pub use error::{Error, Result};
pub use runtime::EngineRuntime;
