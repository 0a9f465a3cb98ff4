//! App - the coordination services built on top of the stores and the cluster
//! layer.
//!
//! # Components
//! - **NodeBuilder**: wiring and fail-fast method checks
//! - **FulfillmentCoordinator**: registration, execution grants, lifecycle
//! - **TaskRedirector**: hands tasks to other nodes
//! - **TelemetryReplicator**: pushes metrics and topology to a collector
//! - **AsyncEventDrain**: batched, bounded delivery with a fallback sink

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod drain;
pub mod redirector;
pub mod replicator;

pub use self::builder::{BuildError, NodeBuilder, PetasosNode};
pub use self::config::{
    CollectorConfig, ConfigError, DrainConfig, NodeConfig, PetasosConfig, RpcConfig,
};
pub use self::coordinator::{CoordinatorInterceptor, FulfillmentCoordinator};
pub use self::drain::{
    AsyncEventDrain, DrainHandle, DrainStats, FlushReport, QueueEntry, SubmitReceipt,
};
pub use self::redirector::TaskRedirector;
pub use self::replicator::TelemetryReplicator;
