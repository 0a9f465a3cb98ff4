//! FulfillmentTaskStore - execution records of the fulfillment tasks this node owns.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;

use crate::domain::{
    ActionableTaskId, ExecutionStatus, FulfillerComponentId, FulfillmentTaskId,
    FulfillmentTaskRecord,
};

/// Concurrent store of fulfillment task records.
///
/// Bounded by the node's in-flight work, so the `find_*` queries scan.
#[derive(Debug, Default)]
pub struct FulfillmentTaskStore {
    records: DashMap<FulfillmentTaskId, FulfillmentTaskRecord>,
}

impl FulfillmentTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `record.task_id`.
    pub fn register(&self, record: FulfillmentTaskRecord) -> FulfillmentTaskRecord {
        if let Some(previous) = self.records.insert(record.task_id, record.clone()) {
            warn!(
                task_id = %record.task_id,
                previous_status = %previous.execution_status,
                "fulfillment record replaced on re-registration"
            );
        }
        record
    }

    /// Like `register`, but only replaces a record that has not started yet.
    /// An `Active` or terminal record is left alone and handed back.
    pub fn register_unless_started(
        &self,
        record: FulfillmentTaskRecord,
    ) -> Result<FulfillmentTaskRecord, FulfillmentTaskRecord> {
        match self.records.entry(record.task_id) {
            Entry::Occupied(existing)
                if !matches!(
                    existing.get().execution_status,
                    ExecutionStatus::Unregistered | ExecutionStatus::Registered
                ) =>
            {
                Err(existing.get().clone())
            }
            Entry::Occupied(mut existing) => {
                warn!(
                    task_id = %record.task_id,
                    previous_status = %existing.get().execution_status,
                    "fulfillment record replaced on re-registration"
                );
                existing.insert(record.clone());
                Ok(record)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    pub fn get(&self, id: &FulfillmentTaskId) -> Option<FulfillmentTaskRecord> {
        self.records.get(id).map(|record| record.clone())
    }

    pub fn remove(&self, id: &FulfillmentTaskId) -> Option<FulfillmentTaskRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Apply `f` to the record under its entry lock and return `f`'s result.
    pub fn update<R>(
        &self,
        id: &FulfillmentTaskId,
        f: impl FnOnce(&mut FulfillmentTaskRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(id).map(|mut record| f(&mut record))
    }

    pub fn list_by_status(&self, status: ExecutionStatus) -> Vec<FulfillmentTaskRecord> {
        self.records
            .iter()
            .filter(|entry| entry.execution_status == status)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All attempts on this node for one actionable task, oldest first.
    pub fn find_by_actionable_task_id(&self, id: &ActionableTaskId) -> Vec<FulfillmentTaskRecord> {
        let mut found: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.actionable_task_id == *id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|record| (record.registration_instant, record.task_id));
        found
    }

    /// The most recently registered record of `component`.
    pub fn find_by_fulfiller_component(
        &self,
        component: &FulfillerComponentId,
    ) -> Option<FulfillmentTaskRecord> {
        self.records
            .iter()
            .filter(|entry| entry.fulfiller_component_id == *component)
            .max_by_key(|entry| (entry.registration_instant, entry.task_id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
