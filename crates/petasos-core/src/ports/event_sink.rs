//! Event sink ports used by `app::drain::AsyncEventDrain`.
//!
//! - `RemoteSink`: the collector the drain delivers to (may fail).
//! - `FallbackSink`: the local last resort (must not fail).

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::SinkError;

/// Why an entry went to the fallback sink instead of the remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivertReason {
    /// The queue was full when the entry was submitted.
    QueueOverflow,
    /// A synchronous submission could not be delivered.
    SynchronousFailure,
    /// Two consecutive flush cycles failed.
    SustainedFailure,
    /// The drain shut down with entries still queued.
    Shutdown,
}

#[async_trait]
pub trait RemoteSink<E>: Send + Sync {
    /// Deliver `events` in order. All-or-nothing: on `Err` the caller treats
    /// the whole batch as undelivered.
    async fn send_batch(&self, events: &[E]) -> Result<(), SinkError>;
}

pub trait FallbackSink<E>: Send + Sync {
    /// Record one entry locally. `sequence` is its enqueue order (0 when it
    /// was never queued).
    fn divert(&self, sequence: u64, event: &E, reason: DivertReason);
}
