//! InMemoryCluster - a single-process group for tests and the demo.
//!
//! # Delivery
//! - Every joined node gets an unbounded inbox.
//! - Frames are pushed into the target's inbox, so ordering between one
//!   sender and one receiver is preserved.
//! - Membership listeners are notified outside the hub lock.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{ClusterMember, NodeAddress, ServiceName, TransportError};
use crate::ports::{ClusterTransport, MembershipListener, RpcFrame};

struct Node {
    member: ClusterMember,
    inbox: mpsc::UnboundedSender<RpcFrame>,
}

#[derive(Default)]
struct HubState {
    nodes: Vec<Node>,
    listeners: Vec<Arc<dyn MembershipListener>>,
}

struct Hub {
    group: String,
    state: Mutex<HubState>,
}

impl Hub {
    fn view(&self) -> Vec<ClusterMember> {
        self.state
            .lock()
            .nodes
            .iter()
            .map(|node| node.member.clone())
            .collect()
    }

    // Listeners run outside the lock; they may call back into the hub.
    fn notify(&self, added: &[ClusterMember], removed: &[ClusterMember]) {
        let listeners = self.state.lock().listeners.clone();
        for listener in listeners {
            listener.on_membership_changed(added, removed);
        }
    }
}

/// Handle on the in-memory group. Cheap to clone.
#[derive(Clone)]
pub struct InMemoryCluster {
    hub: Arc<Hub>,
}

impl InMemoryCluster {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            hub: Arc::new(Hub {
                group: group.into(),
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    pub fn group(&self) -> &str {
        &self.hub.group
    }

    /// Add a node to the group. Returns its transport and the stream of
    /// frames addressed to it.
    ///
    /// Joining again with a known address replaces the old node; its inbox is
    /// closed.
    pub fn join(
        &self,
        service: ServiceName,
        address: NodeAddress,
    ) -> (Arc<InMemoryTransport>, mpsc::UnboundedReceiver<RpcFrame>) {
        let member = ClusterMember::new(
            service,
            address.clone(),
            format!("{}/{}", self.hub.group, address),
        );
        let (inbox, inbound) = mpsc::unbounded_channel();
        {
            let mut state = self.hub.state.lock();
            state.nodes.retain(|node| node.member.address != address);
            state.nodes.push(Node {
                member: member.clone(),
                inbox,
            });
        }
        info!(group = %self.hub.group, service = %member.service_name, %address, "node joined");
        self.hub.notify(std::slice::from_ref(&member), &[]);

        let transport = Arc::new(InMemoryTransport {
            hub: Arc::clone(&self.hub),
            local: member,
        });
        (transport, inbound)
    }

    /// Remove the node at `address`. Its inbox closes and frames sent to it
    /// fail with `Unreachable` from now on.
    pub fn leave(&self, address: &NodeAddress) -> Option<ClusterMember> {
        let gone = {
            let mut state = self.hub.state.lock();
            let pos = state.nodes.iter().position(|node| node.member.address == *address)?;
            state.nodes.remove(pos).member
        };
        info!(group = %self.hub.group, %address, "node left");
        self.hub.notify(&[], std::slice::from_ref(&gone));
        Some(gone)
    }

    pub fn members(&self) -> Vec<ClusterMember> {
        self.hub.view()
    }
}

/// One node's view of an `InMemoryCluster`.
pub struct InMemoryTransport {
    hub: Arc<Hub>,
    local: ClusterMember,
}

#[async_trait]
impl ClusterTransport for InMemoryTransport {
    fn local_member(&self) -> &ClusterMember {
        &self.local
    }

    fn membership_view(&self) -> Vec<ClusterMember> {
        self.hub.view()
    }

    fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        let current = {
            let mut state = self.hub.state.lock();
            state.listeners.push(Arc::clone(&listener));
            state
                .nodes
                .iter()
                .map(|node| node.member.clone())
                .collect::<Vec<_>>()
        };
        listener.on_membership_changed(&current, &[]);
    }

    async fn send_frame(&self, to: &NodeAddress, frame: RpcFrame) -> Result<(), TransportError> {
        let inbox = self
            .hub
            .state
            .lock()
            .nodes
            .iter()
            .find(|node| node.member.address == *to)
            .map(|node| node.inbox.clone());

        let Some(inbox) = inbox else {
            debug!(from = %self.local.address, %to, "frame to non-member");
            return Err(TransportError::Unreachable(to.clone()));
        };
        inbox
            .send(frame)
            .map_err(|_| TransportError::Unreachable(to.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CallId;
    use ulid::Ulid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Vec<ClusterMember>, Vec<ClusterMember>)>>,
    }

    impl MembershipListener for Recorder {
        fn on_membership_changed(&self, added: &[ClusterMember], removed: &[ClusterMember]) {
            self.seen.lock().push((added.to_vec(), removed.to_vec()));
        }
    }

    fn response_frame(from: &str) -> RpcFrame {
        RpcFrame::Response {
            call_id: CallId::from_ulid(Ulid::new()),
            responder: NodeAddress::new(from),
            result: Ok(serde_json::Value::Null),
        }
    }

    #[tokio::test]
    async fn frames_reach_the_addressed_inbox() {
        let cluster = InMemoryCluster::new("g");
        let (a, _a_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("a"));
        let (_b, mut b_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("b"));

        let frame = response_frame("a");
        a.send_frame(&NodeAddress::new("b"), frame.clone()).await.unwrap();

        assert_eq!(b_in.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn departed_node_is_unreachable() {
        let cluster = InMemoryCluster::new("g");
        let (a, _a_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("a"));
        let (_b, _b_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("b"));

        cluster.leave(&NodeAddress::new("b")).unwrap();

        let err = a
            .send_frame(&NodeAddress::new("b"), response_frame("a"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Unreachable(NodeAddress::new("b")));
        assert!(cluster.leave(&NodeAddress::new("b")).is_none());
    }

    #[test]
    fn listener_sees_current_view_then_deltas() {
        let cluster = InMemoryCluster::new("g");
        let (a, _a_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("a"));
        let recorder = Arc::new(Recorder::default());
        a.register_membership_listener(recorder.clone());

        let (b, _b_in) = cluster.join(ServiceName::new("other"), NodeAddress::new("b"));
        cluster.leave(&NodeAddress::new("a"));

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, vec![a.local_member().clone()]);
        assert_eq!(seen[1].0, vec![b.local_member().clone()]);
        assert_eq!(seen[2].1, vec![a.local_member().clone()]);
        assert_eq!(cluster.members(), vec![b.local_member().clone()]);
    }

    #[test]
    fn channel_key_names_the_group() {
        let cluster = InMemoryCluster::new("petasos-test");
        let (a, _a_in) = cluster.join(ServiceName::new("svc"), NodeAddress::new("a"));

        assert_eq!(a.local_member().channel_key, "petasos-test/a");
        assert_eq!(cluster.group(), "petasos-test");
    }
}
