//! Telemetry produced by a node: audit events, metrics, subscription and
//! topology snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::cluster::{ClusterMember, NodeAddress};
use super::fulfillment::FulfillerComponentId;
use super::ids::{ActionableTaskId, FulfillmentTaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Registered,
    Started,
    Finished,
    Failed,
    Cancelled,
    Redirected,
}

/// What happened to a fulfillment task, from the point of view of its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub fulfillment_task_id: FulfillmentTaskId,
    pub actionable_task_id: ActionableTaskId,
    pub fulfiller_component_id: FulfillerComponentId,
    pub node: NodeAddress,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// Point-in-time metrics of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub component_id: String,
    pub captured_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl MetricSet {
    pub fn new(component_id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            component_id: component_id.into(),
            captured_at,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// Which topics a subscriber currently listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    pub subscriber: String,
    pub topics: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// The membership view as one node sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub reporter: NodeAddress,
    pub members: Vec<ClusterMember>,
    pub captured_at: DateTime<Utc>,
}
