//! The cross-node methods of the coordination layer.
//!
//! Each method is a marker type implementing `RemoteMethod`. Requests carry
//! the caller's own `ClusterMember` so the remote side can reply to it or
//! attribute the call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gateway::RpcGateway;
use super::registry::{CallContext, MethodHandler, RegistryError, RemoteMethod};
use crate::domain::{
    ActionableTaskId, AuditEvent, ClusterMember, FulfillmentTask, FulfillmentTaskId, JobCard,
    MetricSet, SubscriptionSummary, TopologySnapshot,
};
use crate::ports::{Clock, TaskInterceptor, TelemetryCollector};

// ---------------------------------------------------------------------------
// Execution privilege (served by the coordinator of the owning node)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeRequest {
    pub requester: ClusterMember,
    pub card: JobCard,
}

pub enum ArbitratePrivilege {}

impl RemoteMethod for ArbitratePrivilege {
    const NAME: &'static str = "petasos.privilege.arbitrate.v1";
    type Request = PrivilegeRequest;
    /// The card as decided by the owner (granted or told to wait).
    type Response = JobCard;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeRelease {
    pub requester: ClusterMember,
    pub task_id: ActionableTaskId,
    pub fulfillment_task_id: FulfillmentTaskId,
}

pub enum ReleasePrivilege {}

impl RemoteMethod for ReleasePrivilege {
    const NAME: &'static str = "petasos.privilege.release.v1";
    type Request = PrivilegeRelease;
    /// Whether a grant was actually released.
    type Response = bool;
}

// ---------------------------------------------------------------------------
// Task redirection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectRequest {
    pub origin: ClusterMember,
    pub task: FulfillmentTask,
}

pub enum RedirectFulfillmentTask {}

impl RemoteMethod for RedirectFulfillmentTask {
    const NAME: &'static str = "petasos.fulfillment.redirect.v1";
    type Request = RedirectRequest;
    type Response = Option<FulfillmentTask>;
}

// ---------------------------------------------------------------------------
// Collector methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditBatch {
    pub provider_name: String,
    pub origin: ClusterMember,
    pub events: Vec<AuditEvent>,
}

pub enum LogAuditEvents {}

impl RemoteMethod for LogAuditEvents {
    const NAME: &'static str = "petasos.audit.log_events.v1";
    type Request = AuditBatch;
    type Response = bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replicated<T> {
    pub origin: ClusterMember,
    pub body: T,
}

pub enum UpdateMetric {}

impl RemoteMethod for UpdateMetric {
    const NAME: &'static str = "petasos.metrics.update.v1";
    type Request = Replicated<MetricSet>;
    /// When the collector took the update.
    type Response = DateTime<Utc>;
}

pub enum ReplicateSubscriptionSummary {}

impl RemoteMethod for ReplicateSubscriptionSummary {
    const NAME: &'static str = "petasos.subscriptions.replicate.v1";
    type Request = Replicated<SubscriptionSummary>;
    type Response = DateTime<Utc>;
}

pub enum ReplicateTopology {}

impl RemoteMethod for ReplicateTopology {
    const NAME: &'static str = "petasos.topology.replicate.v1";
    type Request = Replicated<TopologySnapshot>;
    type Response = DateTime<Utc>;
}

/// Serves the collector methods from a `TelemetryCollector`.
#[derive(Clone)]
pub struct CollectorEndpoint {
    collector: Arc<dyn TelemetryCollector>,
    clock: Arc<dyn Clock>,
}

impl CollectorEndpoint {
    pub fn new(collector: Arc<dyn TelemetryCollector>, clock: Arc<dyn Clock>) -> Self {
        Self { collector, clock }
    }

    /// Register all four collector methods on `gateway`.
    pub fn register_on(self, gateway: &RpcGateway) -> Result<(), RegistryError> {
        gateway.register::<LogAuditEvents, _>(self.clone())?;
        gateway.register::<UpdateMetric, _>(self.clone())?;
        gateway.register::<ReplicateSubscriptionSummary, _>(self.clone())?;
        gateway.register::<ReplicateTopology, _>(self)
    }
}

#[async_trait]
impl MethodHandler<LogAuditEvents> for CollectorEndpoint {
    async fn handle(&self, _ctx: CallContext, batch: AuditBatch) -> Result<bool, String> {
        Ok(self
            .collector
            .log_events(&batch.provider_name, batch.events)
            .await)
    }
}

#[async_trait]
impl MethodHandler<UpdateMetric> for CollectorEndpoint {
    async fn handle(
        &self,
        _ctx: CallContext,
        request: Replicated<MetricSet>,
    ) -> Result<DateTime<Utc>, String> {
        self.collector
            .update_metric(&request.origin, request.body)
            .await;
        Ok(self.clock.now())
    }
}

#[async_trait]
impl MethodHandler<ReplicateSubscriptionSummary> for CollectorEndpoint {
    async fn handle(
        &self,
        _ctx: CallContext,
        request: Replicated<SubscriptionSummary>,
    ) -> Result<DateTime<Utc>, String> {
        self.collector
            .replicate_subscription_summary(&request.origin, request.body)
            .await;
        Ok(self.clock.now())
    }
}

#[async_trait]
impl MethodHandler<ReplicateTopology> for CollectorEndpoint {
    async fn handle(
        &self,
        _ctx: CallContext,
        request: Replicated<TopologySnapshot>,
    ) -> Result<DateTime<Utc>, String> {
        self.collector
            .replicate_topology(&request.origin, request.body)
            .await;
        Ok(self.clock.now())
    }
}

/// Serves `RedirectFulfillmentTask` from a `TaskInterceptor`.
pub struct InterceptorEndpoint {
    interceptor: Arc<dyn TaskInterceptor>,
}

impl InterceptorEndpoint {
    pub fn new(interceptor: Arc<dyn TaskInterceptor>) -> Self {
        Self { interceptor }
    }
}

#[async_trait]
impl MethodHandler<RedirectFulfillmentTask> for InterceptorEndpoint {
    async fn handle(
        &self,
        _ctx: CallContext,
        request: RedirectRequest,
    ) -> Result<Option<FulfillmentTask>, String> {
        Ok(self
            .interceptor
            .intercept(&request.origin, request.task)
            .await)
    }
}
