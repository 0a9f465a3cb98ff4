//! RpcGateway - unary remote calls over the cluster transport.
//!
//! # Flow
//! - **Outbound**: `call::<M>` sends a request frame, parks a oneshot under
//!   the frame's `CallId` and waits up to the timeout. The parked entry is
//!   removed when the call ends, including when the caller drops it.
//! - **Inbound**: `dispatch` either completes a parked call (response frame)
//!   or runs the registered handler and sends the response back (request
//!   frame).
//!
//! There is no retry here; retry policy belongs to callers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::registry::{CallContext, MethodHandler, MethodRegistry, RegistryError, RemoteMethod};
use crate::domain::{CallId, ClusterMember, NodeAddress, TransportError};
use crate::ports::{ClusterTransport, IdGenerator, RemoteFault, RpcFrame};

type PendingReply = oneshot::Sender<Result<serde_json::Value, RemoteFault>>;

pub struct RpcGateway {
    transport: Arc<dyn ClusterTransport>,
    ids: Arc<dyn IdGenerator>,
    registry: RwLock<MethodRegistry>,
    pending: DashMap<CallId, PendingReply>,
    default_timeout: Duration,
}

impl RpcGateway {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        ids: Arc<dyn IdGenerator>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            ids,
            registry: RwLock::new(MethodRegistry::new()),
            pending: DashMap::new(),
            default_timeout,
        }
    }

    pub fn local_member(&self) -> &ClusterMember {
        self.transport.local_member()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn register<M: RemoteMethod, H: MethodHandler<M> + 'static>(
        &self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.registry.write().register::<M, H>(handler)
    }

    pub fn registered_methods(&self) -> Vec<&'static str> {
        self.registry.read().registered_methods()
    }

    /// Calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// `call` with the gateway's configured timeout.
    pub async fn call_default<M: RemoteMethod>(
        &self,
        address: &NodeAddress,
        request: &M::Request,
    ) -> Result<M::Response, TransportError> {
        self.call::<M>(address, request, self.default_timeout).await
    }

    /// One unary call to `address`.
    ///
    /// Suspends the caller for at most `timeout` once the request frame has
    /// been handed to the transport. A response that arrives after the
    /// timeout is dropped by `dispatch`.
    pub async fn call<M: RemoteMethod>(
        &self,
        address: &NodeAddress,
        request: &M::Request,
        timeout: Duration,
    ) -> Result<M::Response, TransportError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| TransportError::Unknown(format!("encode {}: {e}", M::NAME)))?;

        let call_id = self.ids.call_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(call_id, reply_tx);
        // Also covers callers that drop this future before it resolves.
        let _parked = ParkedCall {
            pending: &self.pending,
            call_id,
        };

        let local = self.transport.local_member();
        let frame = RpcFrame::Request {
            call_id,
            method: M::NAME.to_string(),
            reply_to: local.address.clone(),
            caller: local.service_name.clone(),
            payload,
        };
        if let Err(err) = self.transport.send_frame(address, frame).await {
            warn!(%address, method = M::NAME, error = %err, "request frame not delivered");
            return Err(err);
        }

        let reply = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(TransportError::Unknown(format!(
                    "{}: reply channel closed",
                    M::NAME
                )));
            }
            Err(_) => {
                warn!(%address, method = M::NAME, %call_id, ?timeout, "remote call timed out");
                return Err(TransportError::Timeout {
                    address: address.clone(),
                    method: M::NAME.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        match reply {
            Ok(value) => serde_json::from_value(value).map_err(|e| {
                error!(%address, method = M::NAME, error = %e, "undecodable response");
                TransportError::Unknown(format!("decode {}: {e}", M::NAME))
            }),
            Err(RemoteFault::NoSuchMethod(method)) => {
                error!(%address, %method, "peer has no handler for method");
                Err(TransportError::NoSuchMethod {
                    address: address.clone(),
                    method,
                })
            }
            Err(fault) => {
                error!(%address, method = M::NAME, ?fault, "remote call failed");
                Err(TransportError::Unknown(format!("{}: {fault:?}", M::NAME)))
            }
        }
    }

    /// Drive `dispatch` for every frame the transport delivers to this node.
    pub fn spawn_receiver(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<RpcFrame>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                gateway.dispatch(frame);
            }
            debug!(address = %gateway.local_member().address, "inbound frame stream closed");
        })
    }

    /// Handle one inbound frame.
    ///
    /// Requests run on their own task so one slow handler never holds up
    /// responses to other callers.
    pub fn dispatch(self: &Arc<Self>, frame: RpcFrame) {
        match frame {
            RpcFrame::Response { call_id, responder, result } => {
                match self.pending.remove(&call_id) {
                    Some((_, reply)) => {
                        // The caller may have given up between remove and send.
                        let _ = reply.send(result);
                    }
                    None => {
                        debug!(%call_id, %responder, "late or unknown response discarded")
                    }
                }
            }
            RpcFrame::Request {
                call_id,
                method,
                reply_to,
                caller,
                payload,
            } => {
                let handler = self.registry.read().get(&method);
                let gateway = Arc::clone(self);
                tokio::spawn(async move {
                    let result = match handler {
                        Some(handler) => {
                            let ctx = CallContext {
                                caller,
                                reply_to: reply_to.clone(),
                            };
                            handler.handle_dyn(ctx, payload).await
                        }
                        None => {
                            warn!(%method, %reply_to, "request for unregistered method");
                            Err(RemoteFault::NoSuchMethod(method))
                        }
                    };
                    let response = RpcFrame::Response {
                        call_id,
                        responder: gateway.local_member().address.clone(),
                        result,
                    };
                    if let Err(err) = gateway.transport.send_frame(&reply_to, response).await {
                        warn!(%call_id, %reply_to, error = %err, "response frame not delivered");
                    }
                });
            }
        }
    }
}

/// Removes a parked call from the pending table when the call ends, however
/// it ends.
struct ParkedCall<'a> {
    pending: &'a DashMap<CallId, PendingReply>,
    call_id: CallId,
}

impl Drop for ParkedCall<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.call_id);
    }
}
