//! ClusterAddressBook - service name -> reachable member addresses.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::{ClusterMember, NodeAddress, ServiceName};
use crate::ports::{ClusterTransport, MembershipListener};

const CHANGE_FEED_CAPACITY: usize = 256;

/// One effective change to the membership view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(ClusterMember),
    Left(ClusterMember),
}

/// Read-mostly view of the cluster, updated only by membership callbacks.
///
/// The view keeps the order in which members were first seen. `resolve_one`
/// relies on that order: it always answers with the earliest matching member,
/// with no load balancing.
pub struct ClusterAddressBook {
    view: RwLock<Vec<ClusterMember>>,
    changes: broadcast::Sender<MembershipChange>,
}

impl ClusterAddressBook {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            view: RwLock::new(Vec::new()),
            changes,
        }
    }

    /// Create a book and keep it fed from `transport`'s membership events.
    pub fn attached_to(transport: &dyn ClusterTransport) -> Arc<Self> {
        let book = Arc::new(Self::new());
        transport.register_membership_listener(book.clone());
        book
    }

    /// Every reachable member advertising `service`, in view order. Empty when
    /// none is reachable; callers treat that as "try again later".
    pub fn resolve(&self, service: &ServiceName) -> Vec<NodeAddress> {
        self.view
            .read()
            .iter()
            .filter(|member| member.service_name == *service)
            .map(|member| member.address.clone())
            .collect()
    }

    pub fn resolve_one(&self, service: &ServiceName) -> Option<NodeAddress> {
        self.view
            .read()
            .iter()
            .find(|member| member.service_name == *service)
            .map(|member| member.address.clone())
    }

    pub fn member_at(&self, address: &NodeAddress) -> Option<ClusterMember> {
        self.view
            .read()
            .iter()
            .find(|member| member.address == *address)
            .cloned()
    }

    pub fn members(&self) -> Vec<ClusterMember> {
        self.view.read().clone()
    }

    /// Feed of effective changes, for workers that react to membership (for
    /// example re-resolving subscriptions). Slow receivers may observe
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.changes.subscribe()
    }

    /// Apply a membership delta. Idempotent: re-adding a known member or
    /// removing an unknown one changes nothing and publishes nothing.
    ///
    /// Only the view update happens under the lock; publishing to the change
    /// feed never blocks.
    pub fn on_membership_changed(&self, added: &[ClusterMember], removed: &[ClusterMember]) {
        let mut effective = Vec::new();
        {
            let mut view = self.view.write();
            for gone in removed {
                if let Some(pos) = view.iter().position(|m| m.address == gone.address) {
                    effective.push(MembershipChange::Left(view.remove(pos)));
                }
            }
            for member in added {
                match view.iter_mut().find(|m| m.address == member.address) {
                    Some(existing) if existing == member => {}
                    Some(existing) => {
                        *existing = member.clone();
                        effective.push(MembershipChange::Joined(member.clone()));
                    }
                    None => {
                        view.push(member.clone());
                        effective.push(MembershipChange::Joined(member.clone()));
                    }
                }
            }
        }

        for change in effective {
            match &change {
                MembershipChange::Joined(m) => {
                    info!(service = %m.service_name, address = %m.address, "member joined")
                }
                MembershipChange::Left(m) => {
                    info!(service = %m.service_name, address = %m.address, "member left")
                }
            }
            // No subscribers is fine.
            if self.changes.send(change).is_err() {
                debug!("membership change published with no subscribers");
            }
        }
    }
}

impl Default for ClusterAddressBook {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipListener for ClusterAddressBook {
    fn on_membership_changed(&self, added: &[ClusterMember], removed: &[ClusterMember]) {
        ClusterAddressBook::on_membership_changed(self, added, removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(service: &str, address: &str) -> ClusterMember {
        ClusterMember::new(
            ServiceName::new(service),
            NodeAddress::new(address),
            format!("{address}-channel"),
        )
    }

    #[test]
    fn resolve_one_is_first_in_view_order() {
        let book = ClusterAddressBook::new();
        let service = ServiceName::new("ladon");
        book.on_membership_changed(&[member("ladon", "A"), member("ladon", "B")], &[]);

        for _ in 0..10 {
            assert_eq!(book.resolve_one(&service), Some(NodeAddress::new("A")));
        }

        book.on_membership_changed(&[], &[member("ladon", "A")]);
        assert_eq!(book.resolve_one(&service), Some(NodeAddress::new("B")));
    }

    #[test]
    fn resolve_filters_by_service_and_never_errors() {
        let book = ClusterAddressBook::new();
        book.on_membership_changed(
            &[member("ladon", "A"), member("hestia", "H"), member("ladon", "B")],
            &[],
        );

        assert_eq!(
            book.resolve(&ServiceName::new("ladon")),
            vec![NodeAddress::new("A"), NodeAddress::new("B")]
        );
        assert!(book.resolve(&ServiceName::new("nobody")).is_empty());
        assert_eq!(book.resolve_one(&ServiceName::new("nobody")), None);
    }

    #[test]
    fn membership_updates_are_idempotent() {
        let book = ClusterAddressBook::new();
        let mut feed = book.subscribe();

        book.on_membership_changed(&[member("ladon", "A")], &[]);
        book.on_membership_changed(&[member("ladon", "A")], &[]);
        book.on_membership_changed(&[], &[member("ladon", "Z")]);

        assert_eq!(book.members(), vec![member("ladon", "A")]);
        assert_eq!(
            feed.try_recv().unwrap(),
            MembershipChange::Joined(member("ladon", "A"))
        );
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn readvertised_member_keeps_its_position() {
        let book = ClusterAddressBook::new();
        book.on_membership_changed(&[member("ladon", "A"), member("ladon", "B")], &[]);

        book.on_membership_changed(&[member("hestia", "A")], &[]);

        assert_eq!(book.members()[0], member("hestia", "A"));
        assert_eq!(
            book.resolve_one(&ServiceName::new("ladon")),
            Some(NodeAddress::new("B"))
        );
    }

    #[test]
    fn member_at_finds_by_address() {
        let book = ClusterAddressBook::new();
        book.on_membership_changed(&[member("ladon", "A")], &[]);

        assert_eq!(book.member_at(&NodeAddress::new("A")), Some(member("ladon", "A")));
        assert_eq!(book.member_at(&NodeAddress::new("B")), None);
    }
}
