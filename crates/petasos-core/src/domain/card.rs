//! Job card: the right to execute one unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cluster::{ClusterMode, NodeAddress, SystemMode};
use super::ids::{ActionableTaskId, FulfillmentTaskId};
use super::state::ExecutionCommand;

/// Outcome of the fulfillment attempt as last seen by the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    #[default]
    Pending,
    Active,
    Finished,
    Failed,
    Cancelled,
}

/// Where the authoritative copy of the card lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceStatus {
    /// Only this node has seen the card.
    #[default]
    Local,
    /// The owning node acknowledged the card during remote arbitration.
    Synchronised,
}

/// Result of the most recent execution-privilege request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionStatus {
    Granted,
    /// Another attempt holds the grant; ask again later.
    Waiting,
    /// The arbiter could not be reached.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCard {
    /// The actionable task whose execution rights this card arbitrates.
    pub task_id: ActionableTaskId,
    pub fulfillment_task_id: FulfillmentTaskId,
    /// Node owning execution rights for `task_id`; `None` means this node.
    pub affinity_node: Option<NodeAddress>,
    pub current_status: ExecutionCommand,
    pub granted_status: ExecutionCommand,
    pub cluster_mode: ClusterMode,
    pub system_mode: SystemMode,
    pub outcome_status: OutcomeStatus,
    pub persistence_status: PersistenceStatus,
    pub acquisition: Option<AcquisitionStatus>,
    pub update_instant: DateTime<Utc>,
}

impl JobCard {
    /// Execution may proceed only once current and granted converge on `Granted`.
    pub fn may_execute(&self) -> bool {
        self.current_status == ExecutionCommand::Granted
            && self.granted_status == ExecutionCommand::Granted
    }

    pub fn holds_grant(&self) -> bool {
        self.granted_status == ExecutionCommand::Granted
    }

    pub fn grant(&mut self, now: DateTime<Utc>) {
        self.granted_status = ExecutionCommand::Granted;
        self.current_status = ExecutionCommand::Granted;
        self.acquisition = Some(AcquisitionStatus::Granted);
        self.update_instant = now;
    }

    pub fn hold(&mut self, acquisition: AcquisitionStatus, now: DateTime<Utc>) {
        self.granted_status = ExecutionCommand::Wait;
        self.current_status = ExecutionCommand::Wait;
        self.acquisition = Some(acquisition);
        self.update_instant = now;
    }

    /// Close the card after a terminal notification. Any grant is surrendered.
    pub fn close(&mut self, command: ExecutionCommand, outcome: OutcomeStatus, now: DateTime<Utc>) {
        self.current_status = command;
        self.granted_status = command;
        self.outcome_status = outcome;
        self.update_instant = now;
    }
}

/// A job card as supplied by a caller, with the defaultable fields left open.
///
/// `JobCardStore::register` fills whatever is `None` instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCardDraft {
    pub task_id: ActionableTaskId,
    pub fulfillment_task_id: FulfillmentTaskId,
    #[serde(default)]
    pub affinity_node: Option<NodeAddress>,
    #[serde(default)]
    pub current_status: Option<ExecutionCommand>,
    #[serde(default)]
    pub granted_status: Option<ExecutionCommand>,
    #[serde(default)]
    pub cluster_mode: Option<ClusterMode>,
    #[serde(default)]
    pub system_mode: Option<SystemMode>,
    #[serde(default)]
    pub outcome_status: OutcomeStatus,
    #[serde(default)]
    pub persistence_status: PersistenceStatus,
    #[serde(default)]
    pub acquisition: Option<AcquisitionStatus>,
    #[serde(default)]
    pub update_instant: Option<DateTime<Utc>>,
}

impl JobCardDraft {
    pub fn new(task_id: ActionableTaskId, fulfillment_task_id: FulfillmentTaskId) -> Self {
        Self {
            task_id,
            fulfillment_task_id,
            affinity_node: None,
            current_status: None,
            granted_status: None,
            cluster_mode: None,
            system_mode: None,
            outcome_status: OutcomeStatus::default(),
            persistence_status: PersistenceStatus::default(),
            acquisition: None,
            update_instant: None,
        }
    }

    pub fn with_affinity(mut self, node: Option<NodeAddress>) -> Self {
        self.affinity_node = node;
        self
    }

    pub fn with_modes(mut self, cluster_mode: ClusterMode, system_mode: SystemMode) -> Self {
        self.cluster_mode = Some(cluster_mode);
        self.system_mode = Some(system_mode);
        self
    }

    pub fn complete(self, now: DateTime<Utc>) -> JobCard {
        JobCard {
            task_id: self.task_id,
            fulfillment_task_id: self.fulfillment_task_id,
            affinity_node: self.affinity_node,
            current_status: self.current_status.unwrap_or(ExecutionCommand::Wait),
            granted_status: self.granted_status.unwrap_or(ExecutionCommand::Wait),
            cluster_mode: self.cluster_mode.unwrap_or(ClusterMode::Standalone),
            system_mode: self.system_mode.unwrap_or(SystemMode::Standalone),
            outcome_status: self.outcome_status,
            persistence_status: self.persistence_status,
            acquisition: self.acquisition,
            update_instant: self.update_instant.unwrap_or(now),
        }
    }
}

impl From<JobCard> for JobCardDraft {
    fn from(card: JobCard) -> Self {
        Self {
            task_id: card.task_id,
            fulfillment_task_id: card.fulfillment_task_id,
            affinity_node: card.affinity_node,
            current_status: Some(card.current_status),
            granted_status: Some(card.granted_status),
            cluster_mode: Some(card.cluster_mode),
            system_mode: Some(card.system_mode),
            outcome_status: card.outcome_status,
            persistence_status: card.persistence_status,
            acquisition: card.acquisition,
            update_instant: Some(card.update_instant),
        }
    }
}
