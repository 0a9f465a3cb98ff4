//! Cluster plumbing: who is reachable, and how to call them.

pub mod address_book;
pub mod gateway;
pub mod methods;
pub mod registry;

pub use self::address_book::{ClusterAddressBook, MembershipChange};
pub use self::gateway::RpcGateway;
pub use self::methods::{CollectorEndpoint, InterceptorEndpoint};
pub use self::registry::{
    CallContext, DynMethodHandler, MethodHandler, MethodRegistry, RegistryError, RemoteMethod,
};
