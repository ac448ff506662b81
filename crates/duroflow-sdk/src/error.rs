// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for duroflow-sdk.

use duroflow_core::Interrupt;
use serde_json::Value;
use thiserror::Error;

/// The value a workflow "throws".
///
/// Interrupts travel as a `WorkflowError` whose message carries the reserved
/// interrupt prefix; every other message is a genuine failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct WorkflowError {
    /// Error message.
    pub message: String,
    /// Optional structured payload attached to the error.
    pub value: Option<Value>,
}

impl WorkflowError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Decode the interrupt carried by this error, if any.
    pub fn interrupt(&self) -> Option<Interrupt> {
        Interrupt::decode(&self.message)
    }

    /// Whether this error is an interrupt rather than a failure.
    pub fn is_interrupt(&self) -> bool {
        self.interrupt().is_some()
    }
}

impl From<Interrupt> for WorkflowError {
    fn from(interrupt: Interrupt) -> Self {
        Self::new(interrupt.encode())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization error: {}", err))
    }
}

/// Errors raised while loading workflow code.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// No module is registered under the given path.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The module does not export the requested workflow.
    #[error("Workflow '{workflow}' not found in module '{module}'")]
    WorkflowNotFound {
        /// Module path that was searched.
        module: String,
        /// Requested workflow name.
        workflow: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use duroflow_core::InterruptKind;

    #[test]
    fn test_interrupt_round_trip_through_error() {
        let err: WorkflowError = Interrupt::new(InterruptKind::Sleep).into();
        assert!(err.is_interrupt());
        assert_eq!(err.interrupt().unwrap().kind, InterruptKind::Sleep);
    }

    #[test]
    fn test_plain_error_is_not_interrupt() {
        let err = WorkflowError::new("boom").with_value(serde_json::json!({"code": 7}));
        assert!(!err.is_interrupt());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.value, Some(serde_json::json!({"code": 7})));
    }
}
