//! NodeBuilder - wires one coordination node from its collaborators.
//!
//! # Fail-fast
//! `expect_methods` declares RPC methods this node must serve. `build` checks
//! the expected set against what was actually registered and refuses to start
//! a node that is missing any of them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::config::{ConfigError, PetasosConfig};
use super::coordinator::{CoordinatorInterceptor, FulfillmentCoordinator};
use super::drain::{AsyncEventDrain, DrainHandle};
use super::redirector::TaskRedirector;
use super::replicator::TelemetryReplicator;
use crate::cluster::methods::RedirectFulfillmentTask;
use crate::cluster::{
    ClusterAddressBook, CollectorEndpoint, InterceptorEndpoint, RegistryError, RpcGateway,
};
use crate::domain::AuditEvent;
use crate::impls::{RemoteAuditSink, TracingFallbackSink};
use crate::ports::{
    Clock, ClusterTransport, FallbackSink, IdGenerator, RpcFrame, SystemClock,
    TelemetryCollector, UlidGenerator,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no cluster transport was supplied")]
    MissingTransport,
    #[error("missing RPC methods: {0:?}. These methods were expected but not registered.")]
    MissingMethods(Vec<String>),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Usage:
/// ```ignore
/// let (transport, inbound) = cluster.join(service, address);
/// let node = NodeBuilder::new(config)
///     .transport(transport, inbound)
///     .accept_redirects()
///     .expect_methods(&["petasos.fulfillment.redirect.v1"])
///     .build()?;
/// ```
pub struct NodeBuilder {
    config: PetasosConfig,
    transport: Option<(Arc<dyn ClusterTransport>, mpsc::UnboundedReceiver<RpcFrame>)>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    audit_fallback: Option<Arc<dyn FallbackSink<AuditEvent>>>,
    collector: Option<Arc<dyn TelemetryCollector>>,
    accept_redirects: bool,
    expected_methods: Option<Vec<String>>,
}

impl NodeBuilder {
    pub fn new(config: PetasosConfig) -> Self {
        Self {
            config,
            transport: None,
            clock: Arc::new(SystemClock),
            ids: None,
            audit_fallback: None,
            collector: None,
            accept_redirects: false,
            expected_methods: None,
        }
    }

    /// The transport this node talks through and the frames addressed to it.
    pub fn transport(
        mut self,
        transport: Arc<dyn ClusterTransport>,
        inbound: mpsc::UnboundedReceiver<RpcFrame>,
    ) -> Self {
        self.transport = Some((transport, inbound));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` on the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `TracingFallbackSink`.
    pub fn audit_fallback(mut self, fallback: Arc<dyn FallbackSink<AuditEvent>>) -> Self {
        self.audit_fallback = Some(fallback);
        self
    }

    /// Host the collector methods on this node.
    pub fn collector(mut self, collector: Arc<dyn TelemetryCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Take redirected tasks into this node's coordinator.
    pub fn accept_redirects(mut self) -> Self {
        self.accept_redirects = true;
        self
    }

    pub fn expect_methods(mut self, methods: &[&str]) -> Self {
        self.expected_methods = Some(methods.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Wire everything and start the inbound dispatch loop. Must be called
    /// inside a Tokio runtime.
    pub fn build(self) -> Result<PetasosNode, BuildError> {
        self.config.validate()?;
        let (transport, inbound) = self.transport.ok_or(BuildError::MissingTransport)?;

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };
        let address_book = ClusterAddressBook::attached_to(transport.as_ref());
        let gateway = Arc::new(RpcGateway::new(
            transport,
            ids,
            self.config.rpc.call_timeout(),
        ));

        let audit_remote = Arc::new(RemoteAuditSink::new(
            Arc::clone(&gateway),
            Arc::clone(&address_book),
            self.config.collector.service_name(),
            self.config.collector.provider_name.clone(),
        ));
        let audit_fallback: Arc<dyn FallbackSink<AuditEvent>> = match self.audit_fallback {
            Some(fallback) => fallback,
            None => Arc::new(TracingFallbackSink::new("audit")),
        };
        let audit = Arc::new(AsyncEventDrain::new(
            audit_remote,
            audit_fallback,
            self.config.drain.clone(),
        ));

        let coordinator = Arc::new(FulfillmentCoordinator::new(
            &self.config.node,
            Arc::clone(&gateway),
            Arc::clone(&address_book),
            Arc::clone(&audit),
            Arc::clone(&self.clock),
        ));
        coordinator.register_endpoint()?;

        if self.accept_redirects {
            let interceptor = Arc::new(CoordinatorInterceptor::new(&coordinator));
            gateway.register::<RedirectFulfillmentTask, _>(InterceptorEndpoint::new(interceptor))?;
        }
        if let Some(collector) = self.collector {
            CollectorEndpoint::new(collector, Arc::clone(&self.clock)).register_on(&gateway)?;
        }

        if let Some(expected) = &self.expected_methods {
            let registered = gateway.registered_methods();
            let missing: Vec<String> = expected
                .iter()
                .filter(|m| !registered.iter().any(|r| *r == m.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingMethods(missing));
            }
        }

        let receiver = gateway.spawn_receiver(inbound);
        let redirector = TaskRedirector::new(Arc::clone(&gateway), Arc::clone(&address_book));
        let replicator = TelemetryReplicator::new(
            Arc::clone(&gateway),
            Arc::clone(&address_book),
            Arc::clone(&self.clock),
        );

        info!(
            service = %gateway.local_member().service_name,
            address = %gateway.local_member().address,
            methods = ?gateway.registered_methods(),
            "node built"
        );
        Ok(PetasosNode {
            config: self.config,
            gateway,
            address_book,
            coordinator,
            audit,
            redirector,
            replicator,
            receiver,
        })
    }
}

/// One fully wired coordination node.
pub struct PetasosNode {
    config: PetasosConfig,
    gateway: Arc<RpcGateway>,
    address_book: Arc<ClusterAddressBook>,
    coordinator: Arc<FulfillmentCoordinator>,
    audit: Arc<AsyncEventDrain<AuditEvent>>,
    redirector: TaskRedirector,
    replicator: TelemetryReplicator,
    receiver: JoinHandle<()>,
}

impl PetasosNode {
    pub fn config(&self) -> &PetasosConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<RpcGateway> {
        &self.gateway
    }

    pub fn address_book(&self) -> &Arc<ClusterAddressBook> {
        &self.address_book
    }

    pub fn coordinator(&self) -> &Arc<FulfillmentCoordinator> {
        &self.coordinator
    }

    pub fn audit(&self) -> &Arc<AsyncEventDrain<AuditEvent>> {
        &self.audit
    }

    pub fn redirector(&self) -> &TaskRedirector {
        &self.redirector
    }

    pub fn replicator(&self) -> &TelemetryReplicator {
        &self.replicator
    }

    /// Start the periodic audit flusher.
    pub fn start_audit_drain(&self) -> DrainHandle<AuditEvent> {
        self.audit.start()
    }

    /// Stop dispatching inbound frames.
    pub fn stop_receiving(&self) {
        self.receiver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::methods::{ArbitratePrivilege, LogAuditEvents, ReleasePrivilege};
    use crate::cluster::RemoteMethod;
    use crate::domain::{NodeAddress, ServiceName};
    use crate::impls::{InMemoryCluster, InMemoryCollector};

    fn joined(cluster: &InMemoryCluster, address: &str) -> NodeBuilder {
        let (transport, inbound) =
            cluster.join(ServiceName::new("petasos"), NodeAddress::new(address));
        NodeBuilder::new(PetasosConfig::default()).transport(transport, inbound)
    }

    #[tokio::test]
    async fn test_build_success() {
        let cluster = InMemoryCluster::new("g");
        let node = joined(&cluster, "n-1")
            .accept_redirects()
            .expect_methods(&[
                ArbitratePrivilege::NAME,
                ReleasePrivilege::NAME,
                RedirectFulfillmentTask::NAME,
            ])
            .build();

        assert!(node.is_ok());
    }

    #[tokio::test]
    async fn test_build_missing_methods() {
        let cluster = InMemoryCluster::new("g");
        let node = joined(&cluster, "n-1")
            .expect_methods(&[ArbitratePrivilege::NAME, RedirectFulfillmentTask::NAME])
            .build();

        assert!(matches!(
            node,
            Err(BuildError::MissingMethods(missing)) if missing == vec![RedirectFulfillmentTask::NAME.to_string()]
        ));
    }

    #[tokio::test]
    async fn test_build_collector_node_serves_collector_methods() {
        let cluster = InMemoryCluster::new("g");
        let node = joined(&cluster, "col-1")
            .collector(Arc::new(InMemoryCollector::new()))
            .expect_methods(&[LogAuditEvents::NAME])
            .build()
            .unwrap();

        assert_eq!(node.gateway().registered_methods().len(), 6);
    }

    #[test]
    fn test_build_without_transport() {
        let node = NodeBuilder::new(PetasosConfig::default()).build();
        assert!(matches!(node, Err(BuildError::MissingTransport)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = PetasosConfig::default();
        config.drain.capacity = 0;

        let node = NodeBuilder::new(config).build();

        assert!(matches!(node, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }
}
