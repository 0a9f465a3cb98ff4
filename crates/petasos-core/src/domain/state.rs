//! Execution state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a fulfillment attempt on its owning node.
///
/// State transitions:
/// - Unregistered -> Registered -> Active -> Finished
/// - Registered | Active -> Failed
/// - Registered | Active -> Cancelled
///
/// Finished, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Unregistered,
    Registered,
    Active,
    Finished,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Finished | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Is `self -> next` a legal forward step?
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Unregistered, Registered)
                | (Registered, Active)
                | (Active, Finished)
                | (Registered | Active, Failed)
                | (Registered | Active, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Execution command carried by a job card.
///
/// `current_status` is what the holder is doing, `granted_status` is what the
/// arbiter allowed. Work may proceed only when both read `Granted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionCommand {
    Wait,
    Granted,
    Cancelled,
    Failed,
}
