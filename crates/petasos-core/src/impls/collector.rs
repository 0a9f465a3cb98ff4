//! InMemoryCollector - keeps everything it is sent, for tests and the demo.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::{AuditEvent, ClusterMember, MetricSet, SubscriptionSummary, TopologySnapshot};
use crate::ports::TelemetryCollector;

#[derive(Default)]
struct Received {
    audit: Vec<(String, AuditEvent)>,
    metrics: Vec<(ClusterMember, MetricSet)>,
    subscriptions: Vec<(ClusterMember, SubscriptionSummary)>,
    topology: Vec<(ClusterMember, TopologySnapshot)>,
}

pub struct InMemoryCollector {
    received: Mutex<Received>,
    accepting: AtomicBool,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Received::default()),
            accepting: AtomicBool::new(true),
        }
    }

    /// While `false`, `log_events` refuses every batch.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// `(provider_name, event)` in arrival order.
    pub fn audit_events(&self) -> Vec<(String, AuditEvent)> {
        self.received.lock().audit.clone()
    }

    pub fn metric_updates(&self) -> Vec<(ClusterMember, MetricSet)> {
        self.received.lock().metrics.clone()
    }

    pub fn subscription_summaries(&self) -> Vec<(ClusterMember, SubscriptionSummary)> {
        self.received.lock().subscriptions.clone()
    }

    pub fn topology_snapshots(&self) -> Vec<(ClusterMember, TopologySnapshot)> {
        self.received.lock().topology.clone()
    }
}

impl Default for InMemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryCollector for InMemoryCollector {
    async fn log_events(&self, provider_name: &str, events: Vec<AuditEvent>) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(provider_name, count = events.len(), "audit batch refused");
            return false;
        }
        info!(provider_name, count = events.len(), "audit batch logged");
        self.received
            .lock()
            .audit
            .extend(events.into_iter().map(|e| (provider_name.to_string(), e)));
        true
    }

    async fn update_metric(&self, origin: &ClusterMember, metrics: MetricSet) {
        debug!(origin = %origin.address, component = %metrics.component_id, "metrics received");
        self.received.lock().metrics.push((origin.clone(), metrics));
    }

    async fn replicate_subscription_summary(
        &self,
        origin: &ClusterMember,
        summary: SubscriptionSummary,
    ) {
        debug!(origin = %origin.address, subscriber = %summary.subscriber, "subscription summary received");
        self.received
            .lock()
            .subscriptions
            .push((origin.clone(), summary));
    }

    async fn replicate_topology(&self, origin: &ClusterMember, snapshot: TopologySnapshot) {
        debug!(origin = %origin.address, members = snapshot.members.len(), "topology received");
        self.received.lock().topology.push((origin.clone(), snapshot));
    }
}
