//! Error taxonomy.
//!
//! Only `CoordinationError` is meant to reach the execution pipeline.
//! Transport and sink errors are absorbed by the component that sees them and
//! turned into `None`/`false` or a fallback action.

use thiserror::Error;

use super::cluster::NodeAddress;
use super::ids::FulfillmentTaskId;
use super::state::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The id is not in the relevant store: a sequencing bug or a race.
    #[error("unknown fulfillment task {0}")]
    UnknownTask(FulfillmentTaskId),

    #[error("fulfillment task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: FulfillmentTaskId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer has no handler for the method. Not worth retrying.
    #[error("no such method '{method}' on {address}")]
    NoSuchMethod { address: NodeAddress, method: String },

    /// No response within the call timeout. The caller may retry.
    #[error("call '{method}' to {address} timed out after {timeout_ms}ms")]
    Timeout {
        address: NodeAddress,
        method: String,
        timeout_ms: u64,
    },

    /// The address is no longer in the membership view; re-resolve first.
    #[error("{0} is unreachable")]
    Unreachable(NodeAddress),

    #[error("call failed: {0}")]
    Unknown(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Timeout { .. } | TransportError::Unreachable(_))
    }
}

/// The remote sink refused or failed to take a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("no collector reachable for service '{0}'")]
    NoCollector(String),

    #[error("collector rejected the batch")]
    Rejected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeout_and_unreachable_are_retriable() {
        let addr = NodeAddress::new("node-a");
        assert!(
            TransportError::Timeout {
                address: addr.clone(),
                method: "m".into(),
                timeout_ms: 10
            }
            .is_retriable()
        );
        assert!(TransportError::Unreachable(addr.clone()).is_retriable());
        assert!(
            !TransportError::NoSuchMethod {
                address: addr,
                method: "m".into()
            }
            .is_retriable()
        );
        assert!(!TransportError::Unknown("boom".into()).is_retriable());
    }
}
