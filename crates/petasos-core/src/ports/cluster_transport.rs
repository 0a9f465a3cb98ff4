//! ClusterTransport port - group membership plus unicast frame delivery.
//!
//! The transport only moves frames between members and reports membership
//! changes. Request/response correlation, timeouts and method dispatch live in
//! `cluster::RpcGateway`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CallId, ClusterMember, NodeAddress, ServiceName, TransportError};

/// Why a remote peer could not produce a response value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", content = "detail", rename_all = "snake_case")]
pub enum RemoteFault {
    NoSuchMethod(String),
    Decode(String),
    Handler(String),
}

/// Unit of traffic between two gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcFrame {
    Request {
        call_id: CallId,
        method: String,
        /// Where the response frame must be sent.
        reply_to: NodeAddress,
        caller: ServiceName,
        payload: serde_json::Value,
    },
    Response {
        call_id: CallId,
        responder: NodeAddress,
        result: Result<serde_json::Value, RemoteFault>,
    },
}

impl RpcFrame {
    pub fn call_id(&self) -> CallId {
        match self {
            RpcFrame::Request { call_id, .. } | RpcFrame::Response { call_id, .. } => *call_id,
        }
    }
}

/// Receives membership deltas.
///
/// Called on the transport's notification path: implementations must return
/// quickly and push anything expensive onto their own workers.
pub trait MembershipListener: Send + Sync {
    fn on_membership_changed(&self, added: &[ClusterMember], removed: &[ClusterMember]);
}

#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// This node as advertised to the group.
    fn local_member(&self) -> &ClusterMember;

    /// Current members in view order.
    fn membership_view(&self) -> Vec<ClusterMember>;

    /// Register for membership changes. The current view is delivered
    /// immediately as an `added` batch.
    fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>);

    /// Deliver one frame to `to`. Fails with `Unreachable` when `to` is not a
    /// current member.
    async fn send_frame(&self, to: &NodeAddress, frame: RpcFrame) -> Result<(), TransportError>;
}
