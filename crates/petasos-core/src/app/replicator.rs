//! TelemetryReplicator - pushes metrics, subscription summaries and topology
//! snapshots to a collector service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::cluster::methods::{
    ReplicateSubscriptionSummary, ReplicateTopology, Replicated, UpdateMetric,
};
use crate::cluster::{ClusterAddressBook, RemoteMethod, RpcGateway};
use crate::domain::{MetricSet, ServiceName, SubscriptionSummary, TopologySnapshot};
use crate::ports::Clock;

pub struct TelemetryReplicator {
    gateway: Arc<RpcGateway>,
    address_book: Arc<ClusterAddressBook>,
    clock: Arc<dyn Clock>,
}

impl TelemetryReplicator {
    pub fn new(
        gateway: Arc<RpcGateway>,
        address_book: Arc<ClusterAddressBook>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            address_book,
            clock,
        }
    }

    /// `Some(instant the collector took it)`, or `None` on any failure.
    pub async fn replicate_metric_set(
        &self,
        service: &ServiceName,
        metrics: MetricSet,
    ) -> Option<DateTime<Utc>> {
        self.push::<UpdateMetric, _>(service, metrics).await
    }

    pub async fn replicate_subscription_summary(
        &self,
        service: &ServiceName,
        summary: SubscriptionSummary,
    ) -> Option<DateTime<Utc>> {
        self.push::<ReplicateSubscriptionSummary, _>(service, summary)
            .await
    }

    pub async fn replicate_topology(
        &self,
        service: &ServiceName,
        snapshot: TopologySnapshot,
    ) -> Option<DateTime<Utc>> {
        self.push::<ReplicateTopology, _>(service, snapshot).await
    }

    /// The membership view of this node, as of now.
    pub fn local_topology(&self) -> TopologySnapshot {
        TopologySnapshot {
            reporter: self.gateway.local_member().address.clone(),
            members: self.address_book.members(),
            captured_at: self.clock.now(),
        }
    }

    async fn push<M, T>(&self, service: &ServiceName, body: T) -> Option<DateTime<Utc>>
    where
        M: RemoteMethod<Request = Replicated<T>, Response = DateTime<Utc>>,
    {
        let Some(target) = self.address_book.resolve_one(service) else {
            warn!(%service, method = M::NAME, "no collector member reachable");
            return None;
        };
        let request = Replicated {
            origin: self.gateway.local_member().clone(),
            body,
        };
        match self.gateway.call_default::<M>(&target, &request).await {
            Ok(accepted_at) => {
                debug!(%target, method = M::NAME, %accepted_at, "telemetry replicated");
                Some(accepted_at)
            }
            Err(err) => {
                error!(%target, method = M::NAME, error = %err, "telemetry replication failed");
                None
            }
        }
    }
}
