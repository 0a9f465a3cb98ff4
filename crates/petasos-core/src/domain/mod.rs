//! Domain model (ids, cards, fulfillment records, cluster vocabulary, telemetry, errors).

pub mod card;
pub mod cluster;
pub mod errors;
pub mod fulfillment;
pub mod ids;
pub mod state;
pub mod telemetry;

pub use card::{AcquisitionStatus, JobCard, JobCardDraft, OutcomeStatus, PersistenceStatus};
pub use cluster::{ClusterMember, ClusterMode, NodeAddress, ServiceName, SystemMode};
pub use errors::{CoordinationError, SinkError, TransportError};
pub use fulfillment::{FulfillerComponentId, FulfillmentTask, FulfillmentTaskRecord};
pub use ids::{ActionableTaskId, CallId, FulfillmentTaskId};
pub use state::{ExecutionCommand, ExecutionStatus};
pub use telemetry::{AuditAction, AuditEvent, MetricSet, SubscriptionSummary, TopologySnapshot};
