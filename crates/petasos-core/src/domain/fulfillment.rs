//! Fulfillment tasks and the records a node keeps for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::card::JobCard;
use super::ids::{ActionableTaskId, FulfillmentTaskId};
use super::state::ExecutionStatus;

/// The pipeline component that performs the work (a workshop/WUP instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FulfillerComponentId(String);

impl FulfillerComponentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FulfillerComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One attempt to execute an actionable task, as handed over by the
/// execution pipeline.
///
/// The payload is opaque to the coordination layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentTask {
    pub task_id: FulfillmentTaskId,
    pub actionable_task_id: ActionableTaskId,
    pub fulfiller_component_id: FulfillerComponentId,
    #[serde(default)]
    pub job_card: Option<JobCard>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl FulfillmentTask {
    pub fn new(
        task_id: FulfillmentTaskId,
        actionable_task_id: ActionableTaskId,
        fulfiller_component_id: FulfillerComponentId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_id,
            actionable_task_id,
            fulfiller_component_id,
            job_card: None,
            payload,
        }
    }
}

/// Node-local execution record for one fulfillment task.
///
/// Single source of truth for the attempt's lifecycle on this node; state
/// changes go through `advance`, never through direct field writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentTaskRecord {
    pub task_id: FulfillmentTaskId,
    pub actionable_task_id: ActionableTaskId,
    pub execution_status: ExecutionStatus,
    pub fulfiller_component_id: FulfillerComponentId,
    pub registration_instant: DateTime<Utc>,
    pub update_instant: DateTime<Utc>,
}

impl FulfillmentTaskRecord {
    /// Build the record for a freshly registered task.
    pub fn registered(task: &FulfillmentTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.task_id,
            actionable_task_id: task.actionable_task_id,
            execution_status: ExecutionStatus::Registered,
            fulfiller_component_id: task.fulfiller_component_id.clone(),
            registration_instant: now,
            update_instant: now,
        }
    }

    /// Move to `next` if that is a legal forward step.
    ///
    /// Returns the rejected `(from, to)` pair otherwise, leaving the record
    /// untouched.
    pub fn advance(
        &mut self,
        next: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, (ExecutionStatus, ExecutionStatus)> {
        if !self.execution_status.can_transition_to(next) {
            return Err((self.execution_status, next));
        }
        self.execution_status = next;
        self.update_instant = now;
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn task() -> FulfillmentTask {
        FulfillmentTask::new(
            FulfillmentTaskId::from_ulid(Ulid::new()),
            ActionableTaskId::from_ulid(Ulid::new()),
            FulfillerComponentId::new("wup.hl7v2-ingress"),
            serde_json::json!({"segment": "MSH"}),
        )
    }

    #[test]
    fn new_record_is_registered() {
        let now = Utc::now();
        let record = FulfillmentTaskRecord::registered(&task(), now);

        assert_eq!(record.execution_status, ExecutionStatus::Registered);
        assert_eq!(record.registration_instant, now);
    }

    #[test]
    fn advance_stamps_instant() {
        let start = Utc::now();
        let mut record = FulfillmentTaskRecord::registered(&task(), start);

        let later = start + chrono::Duration::seconds(3);
        let stamped = record.advance(ExecutionStatus::Active, later).unwrap();

        assert_eq!(stamped, later);
        assert_eq!(record.update_instant, later);
        assert_eq!(record.registration_instant, start);
    }

    #[test]
    fn rejected_advance_leaves_record_untouched() {
        let mut record = FulfillmentTaskRecord::registered(&task(), Utc::now());
        record.advance(ExecutionStatus::Failed, Utc::now()).unwrap();
        let before = record.clone();

        let err = record.advance(ExecutionStatus::Active, Utc::now()).unwrap_err();

        assert_eq!(err, (ExecutionStatus::Failed, ExecutionStatus::Active));
        assert_eq!(record, before);
    }
}
