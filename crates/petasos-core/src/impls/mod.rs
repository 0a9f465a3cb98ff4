//! Impls - port implementations that run in a single process.
//!
//! The in-memory cluster and collector make the coordination layer runnable
//! without a real group transport; the tracing fallback and the remote audit
//! sink are what a node uses in production as well.

pub mod collector;
pub mod in_memory_cluster;
pub mod remote_audit;
pub mod tracing_fallback;

pub use self::collector::InMemoryCollector;
pub use self::in_memory_cluster::{InMemoryCluster, InMemoryTransport};
pub use self::remote_audit::RemoteAuditSink;
pub use self::tracing_fallback::TracingFallbackSink;
