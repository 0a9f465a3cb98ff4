//! Node-local stores owned by the fulfillment coordinator.

pub mod fulfillment;
pub mod job_cards;

pub use self::fulfillment::FulfillmentTaskStore;
pub use self::job_cards::{GrantDecision, JobCardStore};
