//! TracingFallbackSink - diverted entries go to the local log stream.

use serde::Serialize;
use tracing::warn;

use crate::ports::{DivertReason, FallbackSink};

/// Writes every diverted entry as one `warn` line carrying its JSON form.
#[derive(Debug, Clone)]
pub struct TracingFallbackSink {
    stream: &'static str,
}

impl TracingFallbackSink {
    /// `stream` names what is being diverted (e.g. "audit").
    pub fn new(stream: &'static str) -> Self {
        Self { stream }
    }
}

impl<E: Serialize + Send + Sync> FallbackSink<E> for TracingFallbackSink {
    fn divert(&self, sequence: u64, event: &E, reason: DivertReason) {
        match serde_json::to_string(event) {
            Ok(payload) => warn!(
                stream = self.stream,
                sequence,
                ?reason,
                %payload,
                "undelivered telemetry"
            ),
            Err(err) => warn!(
                stream = self.stream,
                sequence,
                ?reason,
                error = %err,
                "undelivered telemetry (payload not serializable)"
            ),
        }
    }
}
