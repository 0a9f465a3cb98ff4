//! Cluster vocabulary: service names, member addresses, modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical service name advertised by cluster members (e.g. "ladon.audit-collector").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Concrete, reachable address of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A member of the cluster as seen in the membership view.
///
/// Members are only ever created from membership-change events, never by
/// business logic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    pub service_name: ServiceName,
    pub address: NodeAddress,
    pub channel_key: String,
}

impl ClusterMember {
    pub fn new(
        service_name: ServiceName,
        address: NodeAddress,
        channel_key: impl Into<String>,
    ) -> Self {
        Self {
            service_name,
            address,
            channel_key: channel_key.into(),
        }
    }
}

/// Whether coordination spans several nodes or stays node-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMode {
    #[default]
    Standalone,
    Clustered,
}

/// Resilience posture of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    #[default]
    Standalone,
    /// Several nodes at one site sharing work.
    Clustered,
    /// Several sites with active replicas.
    MultiSite,
}
