// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interrupt signals.
//!
//! An interrupt is raised by workflow code to request suspension and a later
//! relaunch. It crosses the worker boundary as an error message, so the kind
//! travels as data: `__interrupt__:<KIND>[:<detail>]`. Decoding is the only
//! place that decides whether a thrown message is an interrupt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved prefix marking an error message as an interrupt.
pub const INTERRUPT_PREFIX: &str = "__interrupt__:";

/// The reason a workflow asked to be suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptKind {
    /// Durable sleep until a recorded wake-up time.
    Sleep,
    /// Waiting for a named signal to be delivered.
    WaitReceiveEvent,
    /// Waiting for a named signal whose handler must run.
    WaitHandleEvent,
    /// Waiting for a value to become available.
    WaitEnsureValue,
}

impl InterruptKind {
    /// All kinds.
    pub const ALL: [InterruptKind; 4] = [
        InterruptKind::Sleep,
        InterruptKind::WaitReceiveEvent,
        InterruptKind::WaitHandleEvent,
        InterruptKind::WaitEnsureValue,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sleep => "SLEEP",
            Self::WaitReceiveEvent => "WAIT_RECEIVE_EVENT",
            Self::WaitHandleEvent => "WAIT_HANDLE_EVENT",
            Self::WaitEnsureValue => "WAIT_ENSURE_VALUE",
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterruptKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// A control-flow signal requesting suspension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    /// Why the workflow is suspending.
    pub kind: InterruptKind,
    /// Optional free-form detail (event name, wake-up time, ...).
    pub detail: Option<String>,
}

impl Interrupt {
    /// Create an interrupt without detail.
    pub fn new(kind: InterruptKind) -> Self {
        Self { kind, detail: None }
    }

    /// Attach a detail string.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Encode as a thrown error message.
    pub fn encode(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}{}:{}", INTERRUPT_PREFIX, self.kind, detail),
            None => format!("{}{}", INTERRUPT_PREFIX, self.kind),
        }
    }

    /// Decode a thrown error message.
    ///
    /// Returns `None` unless the message starts with [`INTERRUPT_PREFIX`]
    /// followed by a known kind.
    pub fn decode(message: &str) -> Option<Self> {
        let rest = message.strip_prefix(INTERRUPT_PREFIX)?;
        let (kind, detail) = match rest.split_once(':') {
            Some((kind, detail)) => (kind, Some(detail.to_string())),
            None => (rest, None),
        };
        let kind = kind.parse().ok()?;
        Some(Self { kind, detail })
    }

    /// Whether `message` encodes an interrupt.
    pub fn is_interrupt(message: &str) -> bool {
        Self::decode(message).is_some()
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
