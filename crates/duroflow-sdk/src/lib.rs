// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duroflow SDK - writing durable workflows.
//!
//! Workflow code receives an [`ExecutionContext`] and routes every side effect
//! through it. Execution attempts may be torn down at any suspension point and
//! relaunched later; the context replays what was already recorded.
//!
//! # Features
//!
//! - **Recorded steps**: [`ExecutionContext::save`] runs a step once per run
//! - **Durable sleep**: [`ExecutionContext::sleep`] survives relaunches
//! - **Signals**: [`ExecutionContext::wait_for_event`] and
//!   [`ExecutionContext::handle_event`] consume delivered signals in order
//! - **Loading**: [`WorkflowRegistry`] maps module paths to workflow code
//!
//! # Quick Start
//!
//! ```ignore
//! use duroflow_sdk::{WorkflowRegistry, workflow_fn};
//! use serde_json::json;
//!
//! let registry = WorkflowRegistry::new().with_workflow(
//!     "workflows/orders.wf",
//!     "place_order",
//!     workflow_fn(|ctx, kwargs| async move {
//!         let order_id: String = ctx.save(|| async { Ok(create_order().await?) }).await?;
//!         let payment: serde_json::Value = ctx.wait_for_event("payment").await?;
//!         ctx.save(|| async { Ok(ship(&order_id, &payment).await?) }).await?;
//!         Ok(json!({ "order_id": order_id }))
//!     }),
//! );
//! ```
//!
//! Errors raised by the context's waiting primitives are interrupts: returning
//! them with `?` suspends the run instead of failing it.

#![deny(missing_docs)]

pub mod context;
pub mod error;
pub mod registry;
pub mod workflow;

pub use context::ExecutionContext;
pub use error::{LoadError, WorkflowError};
pub use registry::{WorkflowLoader, WorkflowRegistry};
pub use workflow::{FnWorkflow, Workflow, workflow_fn};

pub use duroflow_core::{Interrupt, InterruptKind, Operation, Run, StopResult};
