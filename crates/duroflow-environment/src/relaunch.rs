// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interrupt classification and relaunch policy.
//!
//! After every attempt the manager persists the run, then asks [`classify`]
//! what to do with the worker:
//!
//! ```text
//!   thrown message decodes as Interrupt ──► Relaunch (after delay, same run id)
//!   returned value                      ──► Finalize(COMPLETED)
//!   any other thrown value              ──► Finalize(COMPLETED_WITH_ERROR)
//! ```

use std::time::Duration;

use duroflow_core::Interrupt;

use crate::results::{ResultKind, ResultStatus, WorkflowResult};

/// Default delay between an interrupt and the relaunch of its run.
pub const DEFAULT_RELAUNCH_DELAY: Duration = Duration::from_millis(3000);

/// What to do after an attempt finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Suspend and relaunch the run.
    Relaunch(Interrupt),
    /// The run is finished.
    Finalize(ResultStatus),
}

/// Classify an attempt's outcome.
pub fn classify(result: &WorkflowResult) -> Disposition {
    match result.kind {
        ResultKind::Success => Disposition::Finalize(ResultStatus::Completed),
        ResultKind::Fail => match result.exception.as_deref().and_then(Interrupt::decode) {
            Some(interrupt) => Disposition::Relaunch(interrupt),
            None => Disposition::Finalize(ResultStatus::CompletedWithError),
        },
    }
}

/// Timing of relaunches and stops.
#[derive(Debug, Clone)]
pub struct RelaunchPolicy {
    /// Delay between an interrupt and the relaunch.
    pub delay: Duration,
    /// How long a stopping worker may take to acknowledge `STOP`.
    pub stop_grace_period: Duration,
}

impl Default for RelaunchPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RELAUNCH_DELAY,
            stop_grace_period: Duration::from_secs(5),
        }
    }
}
