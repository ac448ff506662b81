// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages exchanged between the manager and workers.
//!
//! Messages cross the worker boundary as `serde_json::Value`, so both sides
//! only ever hold copies. Every message carries a `type` tag:
//!
//! | Type | Manager → Worker | Worker → Manager |
//! |------|------------------|------------------|
//! | `START` | load and run the workflow | the workflow finished |
//! | `STOP` | stop the run and exit | the run with its `Stop` |
//! | `SEND` | deliver a signal | the run with its `Send` |
//! | `ERROR` | - | request could not be handled |

use duroflow_core::Run;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use duroflow_sdk::WorkflowError;

/// Request posted to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Load the workflow and run it against `run`.
    Start {
        /// Workflow to load from the module.
        workflow_name: String,
        /// Resolved module path.
        module_path: String,
        /// Run to build the execution context from.
        run: Run,
        /// Invocation arguments.
        kwargs: Value,
    },
    /// Record a stop and terminate.
    Stop,
    /// Deliver a named signal.
    Send {
        /// Signal name.
        event_name: String,
        /// Signal payload.
        payload: Value,
    },
}

/// What the workflow future produced.
///
/// Thrown values are not classified here; the manager decides whether a
/// thrown message is an interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutcome {
    /// The workflow returned a value.
    Returned(Value),
    /// The workflow threw.
    Thrown(ThrownValue),
}

/// A thrown workflow error, as it crosses the worker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrownValue {
    /// Error message. Interrupts are recognized by its prefix.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl From<WorkflowError> for ThrownValue {
    fn from(err: WorkflowError) -> Self {
        Self {
            message: err.message,
            value: err.value,
        }
    }
}

impl From<Result<Value, WorkflowError>> for WorkerOutcome {
    fn from(result: Result<Value, WorkflowError>) -> Self {
        match result {
            Ok(value) => Self::Returned(value),
            Err(err) => Self::Thrown(err.into()),
        }
    }
}

/// Message posted by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    /// The workflow future completed.
    Start {
        /// Returned or thrown value.
        result: WorkerOutcome,
        /// The run as recorded by this attempt.
        run: Run,
    },
    /// The run was stopped; the worker is exiting.
    Stop {
        /// The run including its `Stop`.
        run: Run,
    },
    /// A signal was recorded.
    Send {
        /// Signal name.
        event_name: String,
        /// Signal payload.
        payload: Value,
        /// The run including the `Send`.
        run: Run,
    },
    /// A request could not be handled.
    Error {
        /// What went wrong.
        message: String,
    },
}

macro_rules! impl_wire {
    ($ty:ty) => {
        impl $ty {
            /// Encode for posting.
            pub fn encode(&self) -> Value {
                // Only string keys and JSON values inside, cannot fail.
                serde_json::to_value(self).unwrap_or(Value::Null)
            }

            /// Decode a posted message.
            pub fn decode(message: Value) -> Result<Self, serde_json::Error> {
                serde_json::from_value(message)
            }
        }
    };
}

impl_wire!(WorkerRequest);
impl_wire!(WorkerResponse);

/// The `type` tag of a raw message, for logging undecodable input.
pub fn message_type(message: &Value) -> &str {
    message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = WorkerRequest::Send {
            event_name: "ping".to_string(),
            payload: json!({"n": 1}),
        };
        assert_eq!(
            request.encode(),
            json!({"type": "SEND", "event_name": "ping", "payload": {"n": 1}})
        );
        assert_eq!(WorkerRequest::Stop.encode(), json!({"type": "STOP"}));
    }

    #[test]
    fn test_start_response_wire_shape() {
        let response = WorkerResponse::Start {
            result: WorkerOutcome::Thrown(ThrownValue {
                message: "boom".to_string(),
                value: None,
            }),
            run: Run::new("r"),
        };
        assert_eq!(
            response.encode(),
            json!({
                "type": "START",
                "result": {"thrown": {"message": "boom"}},
                "run": {"run_id": "r", "operations": []}
            })
        );
        assert_eq!(WorkerResponse::decode(response.encode()).unwrap(), response);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(WorkerRequest::decode(json!({"type": "PAUSE"})).is_err());
        assert!(WorkerResponse::decode(json!({"kind": "START"})).is_err());
        assert_eq!(message_type(&json!({"type": "PAUSE"})), "PAUSE");
        assert_eq!(message_type(&json!(42)), "<missing>");
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome: WorkerOutcome = Ok::<_, WorkflowError>(json!(2)).into();
        assert_eq!(outcome, WorkerOutcome::Returned(json!(2)));

        let outcome: WorkerOutcome =
            Err::<Value, _>(WorkflowError::new("boom").with_value(json!(1))).into();
        assert_eq!(
            outcome,
            WorkerOutcome::Thrown(ThrownValue {
                message: "boom".to_string(),
                value: Some(json!(1)),
            })
        );
    }
}
