//! IdGenerator port.
//!
//! Ids are ULIDs whose timestamp part comes from the injected `Clock`, so a
//! `FixedClock` yields ids with a deterministic time prefix.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{ActionableTaskId, CallId, FulfillmentTaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn fulfillment_task_id(&self) -> FulfillmentTaskId;

    fn actionable_task_id(&self) -> ActionableTaskId;

    fn call_id(&self) -> CallId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn fulfillment_task_id(&self) -> FulfillmentTaskId {
        FulfillmentTaskId::from(self.next())
    }

    fn actionable_task_id(&self) -> ActionableTaskId {
        ActionableTaskId::from(self.next())
    }

    fn call_id(&self) -> CallId {
        CallId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generated_ids_are_unique() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));

        let a = ids.call_id();
        let b = ids.call_id();
        let c = ids.call_id();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn fixed_clock_pins_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let a = ids.fulfillment_task_id();
        let b = ids.fulfillment_task_id();

        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
