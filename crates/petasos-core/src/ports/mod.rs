//! Ports - the seams to collaborators outside the coordination layer.
//!
//! # Ports
//! - **ClusterTransport**: group membership and frame delivery
//! - **TelemetryCollector**: the collector side of audit and telemetry
//! - **TaskInterceptor**: where another node accepts redirected tasks
//! - **RemoteSink / FallbackSink**: delivery targets of the event drain
//! - **Clock / IdGenerator**: time and identifiers

pub mod clock;
pub mod cluster_transport;
pub mod collector;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cluster_transport::{ClusterTransport, MembershipListener, RemoteFault, RpcFrame};
pub use self::collector::{TaskInterceptor, TelemetryCollector};
pub use self::event_sink::{DivertReason, FallbackSink, RemoteSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
