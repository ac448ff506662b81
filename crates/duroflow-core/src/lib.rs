// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duroflow Core - Run Log Data Model
//!
//! This crate holds everything that outlives a single execution attempt of a
//! workflow: the [`Run`] operation log, the [`Interrupt`] control-flow signal and
//! the [`RunLog`](persistence::RunLog) storage contract with its backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       duroflow-environment                               │
//! │          (Dispatcher, Worker Lifecycle Manager, Relaunch)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │ persist_run / create_or_get_run            │ spawns
//!           ▼                                              ▼
//! ┌───────────────────────┐                    ┌─────────────────────────────┐
//! │    duroflow-core      │◄───── Run ─────────│          Workers            │
//! │  (This Crate)         │                    │   (using duroflow-sdk)      │
//! │  Run / Operation      │                    │                             │
//! └───────────────────────┘                    └─────────────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────┐
//! │ Memory/SQLite/Postgres│
//! └───────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `START` | Workflow invoked with its keyword arguments |
//! | `SAVE` | Result of a side-effecting step, keyed by a sequential id |
//! | `SEND` | A named signal delivered to (or emitted by) the run |
//! | `STOP` | Explicit termination with an ok or error result |
//!
//! Replaying a prefix of the log against the same workflow code reproduces the
//! same sequence of step results: a recorded `SAVE` is returned instead of being
//! recomputed.
//!
//! # Interrupts
//!
//! Suspension is requested by failing with an error whose message starts with
//! [`interrupt::INTERRUPT_PREFIX`]. Only messages carrying the prefix and one of
//! the known [`InterruptKind`]s are interrupts; everything else is a failure.

#![deny(missing_docs)]

pub mod error;
pub mod interrupt;
pub mod migrations;
pub mod persistence;
pub mod run;

pub use error::{CoreError, Result};
pub use interrupt::{Interrupt, InterruptKind};
pub use persistence::RunLog;
pub use run::{Operation, Run, StopResult};
