//! petasos-core
//!
//! Coordination of fulfillment tasks across a cluster of nodes: which node may
//! execute an actionable task, how tasks move between nodes, and how audit and
//! telemetry leave a node.
//!
//! # Modules
//! - **domain**: identifiers, job cards, fulfillment tasks, telemetry values, errors
//! - **ports**: seams to the outside (clock, id generation, transport, sinks, collector)
//! - **store**: concurrent in-process stores for job cards and fulfillment records
//! - **cluster**: address book, typed RPC methods and the gateway that serves them
//! - **app**: coordinator, redirector, replicator, event drain and node wiring
//! - **impls**: in-memory cluster, collector and sink implementations

pub mod app;
pub mod cluster;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod store;
