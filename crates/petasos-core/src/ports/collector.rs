//! Collector and interceptor ports - the receiving side of cross-node calls.
//!
//! A node that hosts the audit/metrics collector implements
//! `TelemetryCollector`; a node that accepts redirected work implements
//! `TaskInterceptor`. `cluster::methods` adapts both into RPC handlers.

use async_trait::async_trait;

use crate::domain::{
    AuditEvent, ClusterMember, FulfillmentTask, MetricSet, SubscriptionSummary, TopologySnapshot,
};

#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    /// `false` means the collector refused the events.
    async fn log_events(&self, provider_name: &str, events: Vec<AuditEvent>) -> bool;

    async fn update_metric(&self, origin: &ClusterMember, metrics: MetricSet);

    async fn replicate_subscription_summary(
        &self,
        origin: &ClusterMember,
        summary: SubscriptionSummary,
    );

    async fn replicate_topology(&self, origin: &ClusterMember, snapshot: TopologySnapshot);
}

#[async_trait]
pub trait TaskInterceptor: Send + Sync {
    /// Take over `task`, sent by `origin`. Returns the task as now tracked
    /// here, or `None` when this node declines it.
    async fn intercept(&self, origin: &ClusterMember, task: FulfillmentTask)
    -> Option<FulfillmentTask>;
}
