//! RemoteAuditSink - delivers audit batches to the collector service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::methods::{AuditBatch, LogAuditEvents};
use crate::cluster::{ClusterAddressBook, RpcGateway};
use crate::domain::{AuditEvent, ServiceName, SinkError};
use crate::ports::RemoteSink;

pub struct RemoteAuditSink {
    gateway: Arc<RpcGateway>,
    address_book: Arc<ClusterAddressBook>,
    collector_service: ServiceName,
    provider_name: String,
}

impl RemoteAuditSink {
    pub fn new(
        gateway: Arc<RpcGateway>,
        address_book: Arc<ClusterAddressBook>,
        collector_service: ServiceName,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            address_book,
            collector_service,
            provider_name: provider_name.into(),
        }
    }
}

#[async_trait]
impl RemoteSink<AuditEvent> for RemoteAuditSink {
    async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        // The collector is resolved per batch so membership changes are
        // picked up without a restart.
        let address = self
            .address_book
            .resolve_one(&self.collector_service)
            .ok_or_else(|| SinkError::NoCollector(self.collector_service.to_string()))?;

        let batch = AuditBatch {
            provider_name: self.provider_name.clone(),
            origin: self.gateway.local_member().clone(),
            events: events.to_vec(),
        };
        if self.gateway.call_default::<LogAuditEvents>(&address, &batch).await? {
            Ok(())
        } else {
            Err(SinkError::Rejected)
        }
    }
}
