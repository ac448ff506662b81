// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run and operation log types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result recorded by an explicit stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopResult {
    /// The run was stopped with a value.
    Ok(Value),
    /// The run was stopped with an error value.
    Err(Value),
}

/// A single recorded fact in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// The workflow was invoked with these keyword arguments.
    Start {
        /// Invocation arguments.
        kwargs: Value,
    },
    /// A side-effecting step completed with `value`.
    Save {
        /// Sequential step id, starting at 1.
        id: u64,
        /// The step's result.
        value: Value,
    },
    /// The run was explicitly terminated.
    Stop {
        /// The stop outcome.
        result: StopResult,
    },
    /// A named signal was delivered to the run.
    Send {
        /// Signal name.
        event_name: String,
        /// Signal payload.
        payload: Value,
    },
}

/// The persisted, ordered operation log of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: String,
    /// Operations in the order they were recorded.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Run {
    /// Create an empty run.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            operations: Vec::new(),
        }
    }

    /// Append an operation.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Keyword arguments of the first `Start`.
    pub fn start_kwargs(&self) -> Option<&Value> {
        self.operations.iter().find_map(|op| match op {
            Operation::Start { kwargs } => Some(kwargs),
            _ => None,
        })
    }

    /// Whether a `Start` has been recorded.
    pub fn has_started(&self) -> bool {
        self.start_kwargs().is_some()
    }

    /// Whether a `Stop` has been recorded.
    pub fn is_stopped(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::Stop { .. }))
    }

    /// Iterate over recorded saves as `(id, value)`.
    pub fn saves(&self) -> impl Iterator<Item = (u64, &Value)> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Save { id, value } => Some((*id, value)),
            _ => None,
        })
    }

    /// Number of recorded saves.
    pub fn save_count(&self) -> usize {
        self.saves().count()
    }

    /// Value recorded for save `id`.
    pub fn saved_value(&self, id: u64) -> Option<&Value> {
        self.saves()
            .find_map(|(save_id, value)| (save_id == id).then_some(value))
    }

    /// Highest save id recorded, 0 when there are none.
    pub fn last_save_id(&self) -> u64 {
        self.saves().map(|(id, _)| id).max().unwrap_or(0)
    }

    /// Payloads of every `Send` named `event_name`, in delivery order.
    pub fn events<'a>(&'a self, event_name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.operations.iter().filter_map(move |op| match op {
            Operation::Send {
                event_name: name,
                payload,
            } if name == event_name => Some(payload),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run() -> Run {
        let mut run = Run::new("run-1");
        run.push(Operation::Start {
            kwargs: json!({"x": 1}),
        });
        run.push(Operation::Save {
            id: 1,
            value: json!("a"),
        });
        run.push(Operation::Send {
            event_name: "ping".to_string(),
            payload: json!({"n": 1}),
        });
        run.push(Operation::Save {
            id: 2,
            value: json!("b"),
        });
        run
    }

    #[test]
    fn test_start_kwargs_uses_first_start() {
        let mut run = sample_run();
        run.push(Operation::Start {
            kwargs: json!({"x": 99}),
        });
        assert_eq!(run.start_kwargs(), Some(&json!({"x": 1})));
        assert!(run.has_started());
        assert!(!Run::new("empty").has_started());
    }

    #[test]
    fn test_save_lookup() {
        let run = sample_run();
        assert_eq!(run.save_count(), 2);
        assert_eq!(run.saved_value(2), Some(&json!("b")));
        assert_eq!(run.saved_value(3), None);
        assert_eq!(run.last_save_id(), 2);
        assert_eq!(Run::new("empty").last_save_id(), 0);
    }

    #[test]
    fn test_events_filters_by_name() {
        let mut run = sample_run();
        run.push(Operation::Send {
            event_name: "other".to_string(),
            payload: json!(null),
        });
        run.push(Operation::Send {
            event_name: "ping".to_string(),
            payload: json!({"n": 2}),
        });

        let pings: Vec<_> = run.events("ping").cloned().collect();
        assert_eq!(pings, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_stop_detection() {
        let mut run = sample_run();
        assert!(!run.is_stopped());
        run.push(Operation::Stop {
            result: StopResult::Ok(Value::Null),
        });
        assert!(run.is_stopped());
    }

    #[test]
    fn test_operation_wire_shape() {
        let op = Operation::Save {
            id: 3,
            value: json!(42),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"type": "SAVE", "id": 3, "value": 42})
        );

        let op = Operation::Stop {
            result: StopResult::Err(json!("cancelled")),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"type": "STOP", "result": {"Err": "cancelled"}})
        );

        let parsed: Operation = serde_json::from_value(
            json!({"type": "SEND", "event_name": "ping", "payload": {"n": 1}}),
        )
        .unwrap();
        assert_eq!(
            parsed,
            Operation::Send {
                event_name: "ping".to_string(),
                payload: json!({"n": 1}),
            }
        );
    }

    #[test]
    fn test_run_deserializes_without_operations() {
        let run: Run = serde_json::from_value(json!({"run_id": "r"})).unwrap();
        assert!(run.is_empty());
    }
}
