//! FulfillmentCoordinator - job cards, execution grants and the lifecycle of
//! fulfillment tasks on one node.
//!
//! # Grants
//! Exclusive execution rights for an actionable task are decided by one
//! arbiter. Standalone nodes arbitrate locally. In clustered mode the arbiter
//! is the card's `affinity_node`, resolved on registration as the first member
//! of the arbiter service; a remote arbiter is asked through
//! `ArbitratePrivilege`.
//!
//! A card that could not get an answer (timeout, unreachable arbiter) is left
//! in `Wait` with `acquisition = Failed`. Nothing retries on its own; callers
//! use `request_execution_privilege` to ask again.
//!
//! # Ordering
//! A card is closed before its grant is released, and a grant is issued
//! before the card is marked granted, so no two cards for one actionable task
//! are ever `Granted` at the same instant.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::drain::AsyncEventDrain;
use crate::app::config::NodeConfig;
use crate::cluster::methods::{
    ArbitratePrivilege, PrivilegeRelease, PrivilegeRequest, ReleasePrivilege,
};
use crate::cluster::{CallContext, ClusterAddressBook, MethodHandler, RegistryError, RpcGateway};
use crate::domain::{
    AcquisitionStatus, ActionableTaskId, AuditAction, AuditEvent, ClusterMember, ClusterMode,
    CoordinationError, ExecutionCommand, ExecutionStatus, FulfillmentTask, FulfillmentTaskId,
    FulfillmentTaskRecord, JobCard, JobCardDraft, NodeAddress, OutcomeStatus, PersistenceStatus,
    ServiceName, SystemMode,
};
use crate::ports::{Clock, TaskInterceptor};
use crate::store::{FulfillmentTaskStore, GrantDecision, JobCardStore};

pub struct FulfillmentCoordinator {
    local: ClusterMember,
    cluster_mode: ClusterMode,
    system_mode: SystemMode,
    arbiter_service: ServiceName,
    job_cards: JobCardStore,
    records: FulfillmentTaskStore,
    gateway: Arc<RpcGateway>,
    address_book: Arc<ClusterAddressBook>,
    audit: Arc<AsyncEventDrain<AuditEvent>>,
    clock: Arc<dyn Clock>,
}

impl FulfillmentCoordinator {
    pub fn new(
        node: &NodeConfig,
        gateway: Arc<RpcGateway>,
        address_book: Arc<ClusterAddressBook>,
        audit: Arc<AsyncEventDrain<AuditEvent>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local: gateway.local_member().clone(),
            cluster_mode: node.cluster_mode,
            system_mode: node.system_mode,
            arbiter_service: node.arbiter_service(),
            job_cards: JobCardStore::new(),
            records: FulfillmentTaskStore::new(),
            gateway,
            address_book,
            audit,
            clock,
        }
    }

    pub fn local_member(&self) -> &ClusterMember {
        &self.local
    }

    /// Take a fulfillment task under coordination.
    ///
    /// Attaches (or synthesizes) its job card, records it as `Registered`,
    /// asks for the execution grant and emits a `Registered` audit event,
    /// delivered inline when `synchronous_audit` is set.
    pub async fn register_fulfillment_task(
        &self,
        mut task: FulfillmentTask,
        synchronous_audit: bool,
    ) -> Result<FulfillmentTask, CoordinationError> {
        let now = self.clock.now();

        let record = FulfillmentTaskRecord::registered(&task, now);
        if let Err(existing) = self.records.register_unless_started(record) {
            warn!(
                task_id = %task.task_id,
                status = %existing.execution_status,
                "re-registration of a started fulfillment task refused"
            );
            return Err(CoordinationError::InvalidTransition {
                task_id: task.task_id,
                from: existing.execution_status,
                to: ExecutionStatus::Registered,
            });
        }

        let card = self.job_cards.register(self.draft_for(&task), now);
        let card = self.acquire(card).await;
        info!(
            task_id = %task.task_id,
            actionable_task_id = %task.actionable_task_id,
            granted = card.may_execute(),
            acquisition = ?card.acquisition,
            "fulfillment task registered"
        );

        let event = self.audit_event(AuditAction::Registered, &task, now);
        self.emit(event, synchronous_audit).await;

        task.job_card = Some(card);
        Ok(task)
    }

    /// Ask again for the grant of a registered task whose card is waiting.
    pub async fn request_execution_privilege(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Result<JobCard, CoordinationError> {
        let card = self
            .job_cards
            .get(&task_id)
            .ok_or(CoordinationError::UnknownTask(task_id))?;
        if card.holds_grant() {
            return Ok(card);
        }
        Ok(self.acquire(card).await)
    }

    /// Forget the record of `task_id`. The job card is left alone; see
    /// `discard_job_card`.
    pub fn deregister_fulfillment_task(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Option<FulfillmentTaskRecord> {
        let removed = self.records.remove(&task_id);
        match &removed {
            Some(record) => info!(%task_id, status = %record.execution_status, "fulfillment task deregistered"),
            None => debug!(%task_id, "deregistration of unknown fulfillment task"),
        }
        removed
    }

    /// Drop the job card of `task_id`, giving back any grant it holds.
    pub async fn discard_job_card(&self, task_id: FulfillmentTaskId) -> Option<JobCard> {
        let card = self.job_cards.remove(&task_id)?;
        if card.holds_grant() {
            self.release_remote(&card).await;
        }
        debug!(%task_id, "job card discarded");
        Some(card)
    }

    pub async fn notify_execution_start(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Result<DateTime<Utc>, CoordinationError> {
        let (stamped, record) = self.advance(task_id, ExecutionStatus::Active)?;
        self.job_cards.update(&task_id, |card| {
            card.outcome_status = OutcomeStatus::Active;
            card.update_instant = stamped;
        });
        self.audit.submit(self.record_event(AuditAction::Started, &record, stamped));
        Ok(stamped)
    }

    pub async fn notify_execution_finish(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Result<DateTime<Utc>, CoordinationError> {
        self.finish_with(
            task_id,
            ExecutionStatus::Finished,
            ExecutionCommand::Wait,
            OutcomeStatus::Finished,
            AuditAction::Finished,
        )
        .await
    }

    pub async fn notify_execution_failure(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Result<DateTime<Utc>, CoordinationError> {
        self.finish_with(
            task_id,
            ExecutionStatus::Failed,
            ExecutionCommand::Failed,
            OutcomeStatus::Failed,
            AuditAction::Failed,
        )
        .await
    }

    pub async fn notify_execution_cancellation(
        &self,
        task_id: FulfillmentTaskId,
    ) -> Result<DateTime<Utc>, CoordinationError> {
        self.finish_with(
            task_id,
            ExecutionStatus::Cancelled,
            ExecutionCommand::Cancelled,
            OutcomeStatus::Cancelled,
            AuditAction::Cancelled,
        )
        .await
    }

    // ---------------------------------------------------------------------
    // Arbiter side
    // ---------------------------------------------------------------------

    /// Decide the grant for `card` against this node's ledger and return the
    /// card as decided. The card itself is not stored here.
    pub fn arbitrate(&self, mut card: JobCard) -> JobCard {
        let now = self.clock.now();
        match self
            .job_cards
            .try_grant(card.task_id, card.fulfillment_task_id)
        {
            GrantDecision::Granted => card.grant(now),
            GrantDecision::HeldBy(holder) => {
                debug!(
                    actionable_task_id = %card.task_id,
                    requester = %card.fulfillment_task_id,
                    %holder,
                    "grant held elsewhere"
                );
                card.hold(AcquisitionStatus::Waiting, now);
            }
        }
        card
    }

    /// Give back a grant issued by `arbitrate`.
    pub fn release(&self, task_id: &ActionableTaskId, fulfillment: &FulfillmentTaskId) -> bool {
        self.job_cards.release_grant(task_id, fulfillment)
    }

    /// Serve `ArbitratePrivilege` and `ReleasePrivilege` for other nodes.
    pub fn register_endpoint(self: &Arc<Self>) -> Result<(), RegistryError> {
        let endpoint = CoordinatorEndpoint {
            coordinator: Arc::downgrade(self),
        };
        self.gateway.register::<ArbitratePrivilege, _>(endpoint.clone())?;
        self.gateway.register::<ReleasePrivilege, _>(endpoint)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn fulfillment_record(&self, task_id: &FulfillmentTaskId) -> Option<FulfillmentTaskRecord> {
        self.records.get(task_id)
    }

    pub fn job_card(&self, task_id: &FulfillmentTaskId) -> Option<JobCard> {
        self.job_cards.get(task_id)
    }

    pub fn tasks_in_status(&self, status: ExecutionStatus) -> Vec<FulfillmentTaskRecord> {
        self.records.list_by_status(status)
    }

    /// Every local attempt at `actionable_task_id`, oldest first.
    pub fn attempts_for(&self, actionable_task_id: &ActionableTaskId) -> Vec<FulfillmentTaskRecord> {
        self.records.find_by_actionable_task_id(actionable_task_id)
    }

    /// Which attempt holds the grant for `actionable_task_id`, if this node
    /// is its arbiter.
    pub fn grant_holder(&self, actionable_task_id: &ActionableTaskId) -> Option<FulfillmentTaskId> {
        self.job_cards.grant_holder(actionable_task_id)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn draft_for(&self, task: &FulfillmentTask) -> JobCardDraft {
        let mut draft = match &task.job_card {
            Some(card) => JobCardDraft::from(card.clone()),
            None => JobCardDraft::new(task.actionable_task_id, task.task_id)
                .with_modes(self.cluster_mode, self.system_mode),
        };
        // The card always describes the task it travels with.
        draft.task_id = task.actionable_task_id;
        draft.fulfillment_task_id = task.task_id;
        // Only the arbiter grants; a caller's card starts out waiting.
        draft.current_status = None;
        draft.granted_status = None;
        draft.acquisition = None;
        if draft.affinity_node.is_none() && self.cluster_mode == ClusterMode::Clustered {
            draft.affinity_node = self.address_book.resolve_one(&self.arbiter_service);
        }
        draft
    }

    /// Remote arbiter for `card`, or `None` when this node decides.
    fn remote_arbiter(&self, card: &JobCard) -> Option<NodeAddress> {
        if self.cluster_mode == ClusterMode::Standalone {
            return None;
        }
        card.affinity_node
            .clone()
            .filter(|owner| *owner != self.local.address)
    }

    async fn acquire(&self, card: JobCard) -> JobCard {
        let task_id = card.fulfillment_task_id;
        let Some(arbiter) = self.remote_arbiter(&card) else {
            let decided = self.arbitrate(card.clone());
            return self.apply_decision(task_id, &decided, None).unwrap_or(decided);
        };

        let request = PrivilegeRequest {
            requester: self.local.clone(),
            card: card.clone(),
        };
        match self
            .gateway
            .call_default::<ArbitratePrivilege>(&arbiter, &request)
            .await
        {
            Ok(decided) => self
                .apply_decision(task_id, &decided, Some(PersistenceStatus::Synchronised))
                .unwrap_or(decided),
            Err(err) => {
                error!(%task_id, %arbiter, error = %err, "execution privilege request failed");
                let now = self.clock.now();
                self.job_cards
                    .update(&task_id, |stored| {
                        stored.hold(AcquisitionStatus::Failed, now);
                        stored.clone()
                    })
                    .unwrap_or_else(|| {
                        let mut held = card;
                        held.hold(AcquisitionStatus::Failed, now);
                        held
                    })
            }
        }
    }

    fn apply_decision(
        &self,
        task_id: FulfillmentTaskId,
        decided: &JobCard,
        persistence: Option<PersistenceStatus>,
    ) -> Option<JobCard> {
        self.job_cards.update(&task_id, |stored| {
            stored.current_status = decided.current_status;
            stored.granted_status = decided.granted_status;
            stored.acquisition = decided.acquisition;
            stored.update_instant = decided.update_instant;
            if let Some(persistence) = persistence {
                stored.persistence_status = persistence;
            }
            stored.clone()
        })
    }

    fn advance(
        &self,
        task_id: FulfillmentTaskId,
        next: ExecutionStatus,
    ) -> Result<(DateTime<Utc>, FulfillmentTaskRecord), CoordinationError> {
        let now = self.clock.now();
        let outcome = self
            .records
            .update(&task_id, |record| {
                record.advance(next, now).map(|stamped| (stamped, record.clone()))
            })
            .ok_or_else(|| {
                warn!(%task_id, to = %next, "notification for unknown fulfillment task");
                CoordinationError::UnknownTask(task_id)
            })?;

        outcome.map_err(|(from, to)| {
            warn!(%task_id, %from, %to, "illegal lifecycle notification");
            CoordinationError::InvalidTransition { task_id, from, to }
        })
    }

    async fn finish_with(
        &self,
        task_id: FulfillmentTaskId,
        status: ExecutionStatus,
        command: ExecutionCommand,
        outcome: OutcomeStatus,
        action: AuditAction,
    ) -> Result<DateTime<Utc>, CoordinationError> {
        let (stamped, record) = self.advance(task_id, status)?;

        let closed = self.job_cards.update(&task_id, |card| {
            let was_granted = card.holds_grant();
            card.close(command, outcome, stamped);
            (was_granted, card.clone())
        });
        if let Some((was_granted, card)) = closed {
            self.job_cards
                .release_grant(&card.task_id, &card.fulfillment_task_id);
            if was_granted {
                self.release_remote(&card).await;
            }
        }

        info!(%task_id, %status, "fulfillment task ended");
        self.audit.submit(self.record_event(action, &record, stamped));
        Ok(stamped)
    }

    async fn release_remote(&self, card: &JobCard) {
        let Some(arbiter) = self.remote_arbiter(card) else {
            return;
        };
        let request = PrivilegeRelease {
            requester: self.local.clone(),
            task_id: card.task_id,
            fulfillment_task_id: card.fulfillment_task_id,
        };
        match self
            .gateway
            .call_default::<ReleasePrivilege>(&arbiter, &request)
            .await
        {
            Ok(released) => debug!(
                task_id = %card.fulfillment_task_id,
                %arbiter,
                released,
                "remote grant released"
            ),
            Err(err) => error!(
                task_id = %card.fulfillment_task_id,
                %arbiter,
                error = %err,
                "remote grant release failed"
            ),
        }
    }

    async fn emit(&self, event: AuditEvent, synchronous: bool) {
        if synchronous {
            if !self.audit.synchronous_submit(event).await {
                debug!("synchronous audit event went to fallback");
            }
        } else {
            self.audit.submit(event);
        }
    }

    fn audit_event(&self, action: AuditAction, task: &FulfillmentTask, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            action,
            fulfillment_task_id: task.task_id,
            actionable_task_id: task.actionable_task_id,
            fulfiller_component_id: task.fulfiller_component_id.clone(),
            node: self.local.address.clone(),
            recorded_at: at,
            detail: serde_json::Value::Null,
        }
    }

    fn record_event(
        &self,
        action: AuditAction,
        record: &FulfillmentTaskRecord,
        at: DateTime<Utc>,
    ) -> AuditEvent {
        AuditEvent {
            action,
            fulfillment_task_id: record.task_id,
            actionable_task_id: record.actionable_task_id,
            fulfiller_component_id: record.fulfiller_component_id.clone(),
            node: self.local.address.clone(),
            recorded_at: at,
            detail: serde_json::Value::Null,
        }
    }
}

/// RPC face of the arbiter side. Holds the coordinator weakly so the gateway
/// registry does not keep it alive.
#[derive(Clone)]
struct CoordinatorEndpoint {
    coordinator: Weak<FulfillmentCoordinator>,
}

impl CoordinatorEndpoint {
    fn coordinator(&self) -> Result<Arc<FulfillmentCoordinator>, String> {
        self.coordinator
            .upgrade()
            .ok_or_else(|| "coordinator is shut down".to_string())
    }
}

#[async_trait]
impl MethodHandler<ArbitratePrivilege> for CoordinatorEndpoint {
    async fn handle(&self, ctx: CallContext, request: PrivilegeRequest) -> Result<JobCard, String> {
        let coordinator = self.coordinator()?;
        debug!(
            caller = %ctx.caller,
            requester = %request.requester.address,
            actionable_task_id = %request.card.task_id,
            "arbitrating for remote requester"
        );
        let mut decided = coordinator.arbitrate(request.card);
        decided.persistence_status = PersistenceStatus::Synchronised;
        Ok(decided)
    }
}

#[async_trait]
impl MethodHandler<ReleasePrivilege> for CoordinatorEndpoint {
    async fn handle(&self, _ctx: CallContext, request: PrivilegeRelease) -> Result<bool, String> {
        let coordinator = self.coordinator()?;
        Ok(coordinator.release(&request.task_id, &request.fulfillment_task_id))
    }
}

/// Accepts redirected tasks by registering them with the local coordinator.
pub struct CoordinatorInterceptor {
    coordinator: Weak<FulfillmentCoordinator>,
}

impl CoordinatorInterceptor {
    pub fn new(coordinator: &Arc<FulfillmentCoordinator>) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
        }
    }
}

#[async_trait]
impl TaskInterceptor for CoordinatorInterceptor {
    async fn intercept(
        &self,
        origin: &ClusterMember,
        mut task: FulfillmentTask,
    ) -> Option<FulfillmentTask> {
        let coordinator = self.coordinator.upgrade()?;
        // The sender's card arbitrated on its own terms; start afresh here.
        task.job_card = None;
        let task_id = task.task_id;
        match coordinator.register_fulfillment_task(task, false).await {
            Ok(task) => {
                let mut event = coordinator.audit_event(
                    AuditAction::Redirected,
                    &task,
                    coordinator.clock.now(),
                );
                event.detail = serde_json::json!({ "from": origin.address });
                coordinator.audit.submit(event);
                info!(%task_id, origin = %origin.address, "redirected task accepted");
                Some(task)
            }
            Err(err) => {
                warn!(%task_id, origin = %origin.address, error = %err, "redirected task refused");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use parking_lot::Mutex;
    use rstest::rstest;
    use ulid::Ulid;

    use crate::app::config::DrainConfig;
    use crate::domain::{FulfillerComponentId, SinkError};
    use crate::impls::{InMemoryCluster, TracingFallbackSink};
    use crate::ports::{FixedClock, RemoteSink, UlidGenerator};

    #[derive(Default)]
    struct AuditRecorder {
        events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl RemoteSink<AuditEvent> for AuditRecorder {
        async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
            self.events.lock().extend_from_slice(events);
            Ok(())
        }
    }

    struct Node {
        coordinator: Arc<FulfillmentCoordinator>,
        audit: Arc<AsyncEventDrain<AuditEvent>>,
        delivered: Arc<AuditRecorder>,
        clock: Arc<FixedClock>,
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn node_on(cluster: &InMemoryCluster, node: NodeConfig, timeout: Duration) -> Node {
        let clock = Arc::new(FixedClock::new(start_time()));
        let (transport, inbound) = cluster.join(node.service_name(), node.address());
        let book = ClusterAddressBook::attached_to(transport.as_ref());
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let gateway = Arc::new(RpcGateway::new(transport, ids, timeout));
        gateway.spawn_receiver(inbound);

        let delivered = Arc::new(AuditRecorder::default());
        let audit = Arc::new(AsyncEventDrain::new(
            delivered.clone(),
            Arc::new(TracingFallbackSink::new("audit")),
            DrainConfig::default(),
        ));
        let coordinator = Arc::new(FulfillmentCoordinator::new(
            &node,
            gateway,
            book,
            audit.clone(),
            clock.clone(),
        ));
        coordinator.register_endpoint().unwrap();
        Node {
            coordinator,
            audit,
            delivered,
            clock,
        }
    }

    fn standalone() -> Node {
        node_on(
            &InMemoryCluster::new("unit"),
            NodeConfig::default(),
            Duration::from_secs(1),
        )
    }

    fn clustered(address: &str) -> NodeConfig {
        NodeConfig {
            service_name: "ladon".into(),
            address: address.into(),
            cluster_mode: ClusterMode::Clustered,
            system_mode: SystemMode::Clustered,
            arbiter_service: None,
        }
    }

    fn task_for(actionable: ActionableTaskId) -> FulfillmentTask {
        FulfillmentTask::new(
            FulfillmentTaskId::from_ulid(Ulid::new()),
            actionable,
            FulfillerComponentId::new("wup.pipeline"),
            serde_json::json!({ "resource": "Patient/1" }),
        )
    }

    fn fresh_task() -> FulfillmentTask {
        task_for(ActionableTaskId::from_ulid(Ulid::new()))
    }

    #[tokio::test]
    async fn registration_synthesizes_card_and_grants_locally() {
        let node = standalone();
        let task = fresh_task();

        let registered = node
            .coordinator
            .register_fulfillment_task(task.clone(), false)
            .await
            .unwrap();

        let card = registered.job_card.clone().unwrap();
        assert_eq!(card.task_id, task.actionable_task_id);
        assert_eq!(card.fulfillment_task_id, task.task_id);
        assert_eq!(card.cluster_mode, ClusterMode::Standalone);
        assert_eq!(card.affinity_node, None);
        assert!(card.may_execute());
        assert_eq!(card.acquisition, Some(AcquisitionStatus::Granted));
        assert_eq!(node.coordinator.job_card(&task.task_id), Some(card));

        let record = node.coordinator.fulfillment_record(&task.task_id).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Registered);
        assert_eq!(record.registration_instant, start_time());
        assert_eq!(node.audit.stats().queued, 1);
    }

    #[tokio::test]
    async fn second_attempt_waits_for_the_first() {
        let node = standalone();
        let actionable = ActionableTaskId::from_ulid(Ulid::new());
        let first = task_for(actionable);
        let second = task_for(actionable);

        node.coordinator.register_fulfillment_task(first.clone(), false).await.unwrap();
        let waiting = node
            .coordinator
            .register_fulfillment_task(second.clone(), false)
            .await
            .unwrap()
            .job_card
            .unwrap();

        assert!(!waiting.may_execute());
        assert_eq!(waiting.current_status, ExecutionCommand::Wait);
        assert_eq!(waiting.acquisition, Some(AcquisitionStatus::Waiting));
        assert_eq!(node.coordinator.grant_holder(&actionable), Some(first.task_id));
        assert_eq!(node.coordinator.attempts_for(&actionable).len(), 2);
    }

    #[tokio::test]
    async fn finishing_hands_the_grant_to_the_next_attempt() {
        let node = standalone();
        let actionable = ActionableTaskId::from_ulid(Ulid::new());
        let first = task_for(actionable);
        let second = task_for(actionable);
        node.coordinator.register_fulfillment_task(first.clone(), false).await.unwrap();
        node.coordinator.register_fulfillment_task(second.clone(), false).await.unwrap();

        node.coordinator.notify_execution_start(first.task_id).await.unwrap();
        node.coordinator.notify_execution_finish(first.task_id).await.unwrap();

        let closed = node.coordinator.job_card(&first.task_id).unwrap();
        assert!(!closed.holds_grant());
        assert_eq!(closed.outcome_status, OutcomeStatus::Finished);
        assert_eq!(node.coordinator.grant_holder(&actionable), None);

        let card = node
            .coordinator
            .request_execution_privilege(second.task_id)
            .await
            .unwrap();
        assert!(card.may_execute());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_grant_exactly_one() {
        let node = standalone();
        let actionable = ActionableTaskId::from_ulid(Ulid::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = Arc::clone(&node.coordinator);
                tokio::spawn(async move {
                    coordinator
                        .register_fulfillment_task(task_for(actionable), false)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().job_card.unwrap().may_execute() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn notifications_stamp_and_return_the_instant() {
        let node = standalone();
        let task = fresh_task();
        node.coordinator.register_fulfillment_task(task.clone(), false).await.unwrap();

        node.clock.advance(chrono::Duration::seconds(4));
        let started = node.coordinator.notify_execution_start(task.task_id).await.unwrap();

        assert_eq!(started, start_time() + chrono::Duration::seconds(4));
        let record = node.coordinator.fulfillment_record(&task.task_id).unwrap();
        assert_eq!(record.update_instant, started);
        assert_eq!(record.execution_status, ExecutionStatus::Active);
        assert_eq!(
            node.coordinator.tasks_in_status(ExecutionStatus::Active),
            vec![record]
        );
    }

    #[rstest]
    #[case::double_finish(ExecutionStatus::Finished, ExecutionStatus::Finished)]
    #[case::failed_to_active(ExecutionStatus::Failed, ExecutionStatus::Active)]
    #[case::cancelled_to_finished(ExecutionStatus::Cancelled, ExecutionStatus::Finished)]
    #[case::finished_to_failed(ExecutionStatus::Finished, ExecutionStatus::Failed)]
    #[tokio::test]
    async fn terminal_records_reject_notifications(
        #[case] terminal: ExecutionStatus,
        #[case] next: ExecutionStatus,
    ) {
        let node = standalone();
        let task = fresh_task();
        let c = &node.coordinator;
        c.register_fulfillment_task(task.clone(), false).await.unwrap();
        c.notify_execution_start(task.task_id).await.unwrap();
        let ended = match terminal {
            ExecutionStatus::Finished => c.notify_execution_finish(task.task_id).await,
            ExecutionStatus::Failed => c.notify_execution_failure(task.task_id).await,
            _ => c.notify_execution_cancellation(task.task_id).await,
        };
        ended.unwrap();

        let err = match next {
            ExecutionStatus::Active => c.notify_execution_start(task.task_id).await,
            ExecutionStatus::Finished => c.notify_execution_finish(task.task_id).await,
            _ => c.notify_execution_failure(task.task_id).await,
        }
        .unwrap_err();

        assert_eq!(
            err,
            CoordinationError::InvalidTransition {
                task_id: task.task_id,
                from: terminal,
                to: next
            }
        );
        assert_eq!(c.fulfillment_record(&task.task_id).unwrap().execution_status, terminal);
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let node = standalone();
        let id = FulfillmentTaskId::from_ulid(Ulid::new());

        let err = node.coordinator.notify_execution_start(id).await.unwrap_err();

        assert_eq!(err, CoordinationError::UnknownTask(id));
    }

    #[rstest]
    #[case::active(ExecutionStatus::Active)]
    #[case::cancelled(ExecutionStatus::Cancelled)]
    #[tokio::test]
    async fn started_record_cannot_be_registered_again(#[case] reached: ExecutionStatus) {
        let node = standalone();
        let task = fresh_task();
        node.coordinator.register_fulfillment_task(task.clone(), false).await.unwrap();
        if reached == ExecutionStatus::Active {
            node.coordinator.notify_execution_start(task.task_id).await.unwrap();
        } else {
            node.coordinator.notify_execution_cancellation(task.task_id).await.unwrap();
        }

        let err = node
            .coordinator
            .register_fulfillment_task(task.clone(), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::InvalidTransition { from, to: ExecutionStatus::Registered, .. }
                if from == reached
        ));
        let record = node.coordinator.fulfillment_record(&task.task_id).unwrap();
        assert_eq!(record.execution_status, reached);
    }

    #[tokio::test]
    async fn deregistration_leaves_the_card_until_discarded() {
        let node = standalone();
        let task = fresh_task();
        node.coordinator.register_fulfillment_task(task.clone(), false).await.unwrap();

        assert!(node.coordinator.deregister_fulfillment_task(task.task_id).is_some());
        assert!(node.coordinator.fulfillment_record(&task.task_id).is_none());
        assert!(node.coordinator.job_card(&task.task_id).is_some());
        assert_eq!(
            node.coordinator.grant_holder(&task.actionable_task_id),
            Some(task.task_id)
        );

        assert!(node.coordinator.discard_job_card(task.task_id).await.is_some());
        assert!(node.coordinator.job_card(&task.task_id).is_none());
        assert_eq!(node.coordinator.grant_holder(&task.actionable_task_id), None);
        assert!(node.coordinator.deregister_fulfillment_task(task.task_id).is_none());
    }

    #[tokio::test]
    async fn synchronous_audit_is_delivered_inline() {
        let node = standalone();
        let task = fresh_task();

        node.coordinator.register_fulfillment_task(task.clone(), true).await.unwrap();

        let delivered = node.delivered.events.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].action, AuditAction::Registered);
        assert_eq!(delivered[0].fulfillment_task_id, task.task_id);
        assert_eq!(node.audit.stats().queued, 0);
    }

    #[tokio::test]
    async fn lifecycle_audit_events_are_queued_in_order() {
        let node = standalone();
        let task = fresh_task();
        node.coordinator.register_fulfillment_task(task.clone(), false).await.unwrap();
        node.coordinator.notify_execution_start(task.task_id).await.unwrap();
        node.coordinator.notify_execution_failure(task.task_id).await.unwrap();

        node.audit.flush_once().await;

        let actions: Vec<_> = node.delivered.events.lock().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Registered, AuditAction::Started, AuditAction::Failed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn caller_granted_cards_wait_for_the_arbiter() {
        let cluster = InMemoryCluster::new("unit");
        let (_mute, _mute_inbox) = cluster.join(ServiceName::new("ladon"), NodeAddress::new("mute"));
        let node = node_on(&cluster, clustered("ladon-b"), Duration::from_millis(500));
        let actionable = ActionableTaskId::from_ulid(Ulid::new());

        let mut pending = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let mut task = task_for(actionable);
            let mut card = JobCardDraft::new(actionable, task.task_id).complete(start_time());
            card.grant(start_time());
            task.job_card = Some(card);
            ids.push(task.task_id);
            let coordinator = Arc::clone(&node.coordinator);
            pending.push(tokio::spawn(async move {
                coordinator.register_fulfillment_task(task, false).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let granted_mid_call = ids
            .iter()
            .filter_map(|id| node.coordinator.job_card(id))
            .filter(|card| card.holds_grant() || card.may_execute())
            .count();
        assert_eq!(granted_mid_call, 0);

        for registration in pending {
            let card = registration.await.unwrap().unwrap().job_card.unwrap();
            assert!(!card.may_execute());
            assert_eq!(card.acquisition, Some(AcquisitionStatus::Failed));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_arbiter_leaves_card_waiting_with_failed_acquisition() {
        let cluster = InMemoryCluster::new("unit");
        // Joins first, so it is the arbiter, but never answers.
        let (_mute, _mute_inbox) = cluster.join(ServiceName::new("ladon"), NodeAddress::new("mute"));
        let node = node_on(&cluster, clustered("ladon-b"), Duration::from_millis(100));
        let task = fresh_task();

        let card = node
            .coordinator
            .register_fulfillment_task(task.clone(), false)
            .await
            .unwrap()
            .job_card
            .unwrap();

        assert_eq!(card.affinity_node, Some(NodeAddress::new("mute")));
        assert_eq!(card.current_status, ExecutionCommand::Wait);
        assert_eq!(card.acquisition, Some(AcquisitionStatus::Failed));
        assert_eq!(node.coordinator.job_card(&task.task_id), Some(card));
        assert_eq!(
            node.coordinator.fulfillment_record(&task.task_id).unwrap().execution_status,
            ExecutionStatus::Registered
        );
    }

    #[tokio::test]
    async fn clustered_nodes_share_one_arbiter() {
        let cluster = InMemoryCluster::new("unit");
        let a = node_on(&cluster, clustered("ladon-a"), Duration::from_secs(1));
        let b = node_on(&cluster, clustered("ladon-b"), Duration::from_secs(1));
        let actionable = ActionableTaskId::from_ulid(Ulid::new());
        let on_a = task_for(actionable);
        let on_b = task_for(actionable);

        let card_b = b
            .coordinator
            .register_fulfillment_task(on_b.clone(), false)
            .await
            .unwrap()
            .job_card
            .unwrap();
        let card_a = a
            .coordinator
            .register_fulfillment_task(on_a.clone(), false)
            .await
            .unwrap()
            .job_card
            .unwrap();

        assert!(card_b.may_execute());
        assert_eq!(card_b.persistence_status, PersistenceStatus::Synchronised);
        assert!(!card_a.may_execute());
        assert_eq!(a.coordinator.grant_holder(&actionable), Some(on_b.task_id));

        b.coordinator.notify_execution_start(on_b.task_id).await.unwrap();
        b.coordinator.notify_execution_finish(on_b.task_id).await.unwrap();
        assert_eq!(a.coordinator.grant_holder(&actionable), None);

        let card_a = a
            .coordinator
            .request_execution_privilege(on_a.task_id)
            .await
            .unwrap();
        assert!(card_a.may_execute());
    }

    #[tokio::test]
    async fn interceptor_registers_redirected_task() {
        let node = standalone();
        let interceptor = CoordinatorInterceptor::new(&node.coordinator);
        let origin = ClusterMember::new(ServiceName::new("ladon"), NodeAddress::new("elsewhere"), "k");
        let mut task = fresh_task();
        task.job_card = Some(
            JobCardDraft::new(task.actionable_task_id, task.task_id)
                .with_affinity(Some(NodeAddress::new("elsewhere")))
                .complete(start_time()),
        );

        let accepted = interceptor.intercept(&origin, task.clone()).await.unwrap();

        assert!(accepted.job_card.unwrap().may_execute());
        assert!(node.coordinator.fulfillment_record(&task.task_id).is_some());
        node.audit.flush_once().await;
        let actions: Vec<_> = node.delivered.events.lock().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Registered, AuditAction::Redirected]);
    }
}
