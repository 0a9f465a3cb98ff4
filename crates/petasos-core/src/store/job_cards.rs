//! JobCardStore - job cards of this node plus the execution-grant ledger.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::domain::{ActionableTaskId, ExecutionCommand, FulfillmentTaskId, JobCard, JobCardDraft};

/// Answer of the grant ledger to a privilege request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    Granted,
    /// Another fulfillment task already holds the grant.
    HeldBy(FulfillmentTaskId),
}

/// Concurrent store of job cards keyed by fulfillment task.
///
/// Design:
/// - Reads copy the card out, so callers never see a half-applied update.
/// - Mutations run inside the map's per-entry write lock (`update`), which
///   serializes all changes to one card.
/// - `grants` maps each actionable task to the single fulfillment task allowed
///   to execute it. On the owning node it also holds grants issued to remote
///   requesters.
#[derive(Debug, Default)]
pub struct JobCardStore {
    cards: DashMap<FulfillmentTaskId, JobCard>,
    grants: DashMap<ActionableTaskId, FulfillmentTaskId>,
}

impl JobCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the card for `draft.fulfillment_task_id`, filling
    /// unset fields with defaults.
    pub fn register(&self, draft: JobCardDraft, now: DateTime<Utc>) -> JobCard {
        let card = draft.complete(now);
        if let Some(previous) = self.cards.insert(card.fulfillment_task_id, card.clone()) {
            warn!(
                fulfillment_task_id = %card.fulfillment_task_id,
                previous_status = ?previous.current_status,
                "job card replaced on re-registration"
            );
        }
        card
    }

    pub fn get(&self, id: &FulfillmentTaskId) -> Option<JobCard> {
        self.cards.get(id).map(|card| card.clone())
    }

    /// Remove the card and give back any grant it held.
    pub fn remove(&self, id: &FulfillmentTaskId) -> Option<JobCard> {
        let (_, card) = self.cards.remove(id)?;
        self.release_grant(&card.task_id, &card.fulfillment_task_id);
        Some(card)
    }

    /// Apply `f` to the card under its entry lock and return `f`'s result.
    pub fn update<R>(&self, id: &FulfillmentTaskId, f: impl FnOnce(&mut JobCard) -> R) -> Option<R> {
        self.cards.get_mut(id).map(|mut card| f(&mut card))
    }

    pub fn list_by_status(&self, status: ExecutionCommand) -> Vec<JobCard> {
        self.cards
            .iter()
            .filter(|entry| entry.current_status == status)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn find_by_actionable_task_id(&self, task_id: &ActionableTaskId) -> Vec<JobCard> {
        self.cards
            .iter()
            .filter(|entry| entry.task_id == *task_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Claim the execution grant for `task_id` on behalf of `fulfillment`.
    ///
    /// Atomic per actionable task: of any number of concurrent claimants,
    /// exactly one sees `Granted`. Re-claiming by the current holder is
    /// granted again.
    pub fn try_grant(
        &self,
        task_id: ActionableTaskId,
        fulfillment: FulfillmentTaskId,
    ) -> GrantDecision {
        match self.grants.entry(task_id) {
            Entry::Vacant(slot) => {
                slot.insert(fulfillment);
                debug!(%task_id, %fulfillment, "execution grant issued");
                GrantDecision::Granted
            }
            Entry::Occupied(slot) if *slot.get() == fulfillment => GrantDecision::Granted,
            Entry::Occupied(slot) => GrantDecision::HeldBy(*slot.get()),
        }
    }

    /// Give the grant back. Only the holder can release it.
    pub fn release_grant(&self, task_id: &ActionableTaskId, fulfillment: &FulfillmentTaskId) -> bool {
        let released = self
            .grants
            .remove_if(task_id, |_, holder| holder == fulfillment)
            .is_some();
        if released {
            debug!(%task_id, %fulfillment, "execution grant released");
        }
        released
    }

    pub fn grant_holder(&self, task_id: &ActionableTaskId) -> Option<FulfillmentTaskId> {
        self.grants.get(task_id).map(|holder| *holder)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
