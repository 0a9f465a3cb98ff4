//! MethodRegistry - typed RPC methods and their handlers.
//!
//! # Two layers
//! - **Typed**: `RemoteMethod` ties a stable method name to a request and a
//!   response type; `MethodHandler<M>` serves exactly that method.
//! - **Dyn**: `DynMethodHandler` is the object-safe, JSON-in/JSON-out form the
//!   gateway dispatches to. `TypedMethodHandler` erases one into the other.
//!
//! A method name is fixed at compile time by `M::NAME`; nothing is looked up
//! by reflection.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{NodeAddress, ServiceName};
use crate::ports::RemoteFault;

/// A remotely callable operation.
///
/// # Naming
/// `petasos.{area}.{operation}.v{major}`, e.g. `petasos.metrics.update.v1`.
pub trait RemoteMethod: Send + Sync + 'static {
    const NAME: &'static str;
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

/// Who is calling, as stated in the request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: ServiceName,
    pub reply_to: NodeAddress,
}

#[async_trait]
pub trait MethodHandler<M: RemoteMethod>: Send + Sync {
    /// `Err` carries a message for the caller's log; it surfaces there as
    /// `TransportError::Unknown`.
    async fn handle(&self, ctx: CallContext, request: M::Request) -> Result<M::Response, String>;
}

#[async_trait]
pub trait DynMethodHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        ctx: CallContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteFault>;

    fn method(&self) -> &'static str;
}

pub struct TypedMethodHandler<M: RemoteMethod, H: MethodHandler<M>> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: RemoteMethod, H: MethodHandler<M>> TypedMethodHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: RemoteMethod, H: MethodHandler<M>> DynMethodHandler for TypedMethodHandler<M, H> {
    async fn handle_dyn(
        &self,
        ctx: CallContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteFault> {
        let request: M::Request = serde_json::from_value(payload)
            .map_err(|e| RemoteFault::Decode(format!("{}: {e}", M::NAME)))?;
        let response = self
            .handler
            .handle(ctx, request)
            .await
            .map_err(RemoteFault::Handler)?;
        serde_json::to_value(response).map_err(|e| RemoteFault::Handler(format!("encode: {e}")))
    }

    fn method(&self) -> &'static str {
        M::NAME
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for method '{0}' is already registered")]
    AlreadyRegistered(&'static str),
}

/// Method name -> handler.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<&'static str, Arc<dyn DynMethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: RemoteMethod, H: MethodHandler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(M::NAME) {
            return Err(RegistryError::AlreadyRegistered(M::NAME));
        }
        self.handlers
            .insert(M::NAME, Arc::new(TypedMethodHandler::<M, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn DynMethodHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn registered_methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
