//! TaskRedirector - hands a fulfillment task to another node's interception
//! point.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cluster::methods::{RedirectFulfillmentTask, RedirectRequest};
use crate::cluster::{ClusterAddressBook, RpcGateway};
use crate::domain::{FulfillmentTask, ServiceName};

pub struct TaskRedirector {
    gateway: Arc<RpcGateway>,
    address_book: Arc<ClusterAddressBook>,
}

impl TaskRedirector {
    pub fn new(gateway: Arc<RpcGateway>, address_book: Arc<ClusterAddressBook>) -> Self {
        Self {
            gateway,
            address_book,
        }
    }

    /// Send `task` to the first reachable member of `service`.
    ///
    /// Returns the task as accepted by the receiver. `None` when no member is
    /// reachable, the call fails, or the receiver declines; the caller keeps
    /// ownership of the task in every one of those cases.
    pub async fn redirect_task(
        &self,
        service: &ServiceName,
        task: FulfillmentTask,
    ) -> Option<FulfillmentTask> {
        let task_id = task.task_id;
        let Some(target) = self.address_book.resolve_one(service) else {
            warn!(%task_id, %service, "no member to redirect to");
            return None;
        };

        let request = RedirectRequest {
            origin: self.gateway.local_member().clone(),
            task,
        };
        match self
            .gateway
            .call_default::<RedirectFulfillmentTask>(&target, &request)
            .await
        {
            Ok(Some(accepted)) => {
                info!(%task_id, %target, "task redirected");
                Some(accepted)
            }
            Ok(None) => {
                warn!(%task_id, %target, "redirect declined by receiver");
                None
            }
            Err(err) => {
                error!(%task_id, %target, error = %err, "redirect failed");
                None
            }
        }
    }
}
