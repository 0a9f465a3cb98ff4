//! AsyncEventDrain - bounded, batched, periodically flushed delivery of
//! produced events to a remote sink.
//!
//! # Flush cycle
//! 1. Take up to `capacity` entries from the front of the queue and send them
//!    as one batch; repeat while batches succeed.
//! 2. On the first failing batch, put it back at the front (order kept) and
//!    end the cycle.
//! 3. If this cycle failed and the previous one failed too, everything still
//!    queued goes to the fallback sink. The "last flush succeeded" flag is not
//!    touched in that case, so it stays `false` until a cycle succeeds.
//!
//! Producers never see an error: overflow and undeliverable entries are
//! diverted and counted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::DrainConfig;
use crate::ports::{DivertReason, FallbackSink, RemoteSink};

/// One queued event with its enqueue order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry<E> {
    pub sequence: u64,
    pub event: E,
}

/// What happened to a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitReceipt {
    Queued { sequence: u64 },
    /// The queue was full; the event went to the fallback sink.
    Diverted,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub delivered: usize,
    pub requeued: usize,
    pub diverted: usize,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub queued: usize,
    pub delivered: u64,
    /// Every entry that reached the fallback sink, overflow included.
    pub diverted: u64,
    pub overflowed: u64,
    pub last_flush_succeeded: bool,
}

struct DrainState<E> {
    queue: VecDeque<QueueEntry<E>>,
    // Entries taken by a flush and not yet delivered still count against
    // capacity, so a requeue never pushes the queue past it.
    in_flight: usize,
    next_sequence: u64,
    last_flush_succeeded: bool,
}

pub struct AsyncEventDrain<E> {
    remote: Arc<dyn RemoteSink<E>>,
    fallback: Arc<dyn FallbackSink<E>>,
    config: DrainConfig,
    state: Mutex<DrainState<E>>,
    // Serializes flush cycles; submit never waits on it.
    flushing: tokio::sync::Mutex<()>,
    delivered: AtomicU64,
    diverted: AtomicU64,
    overflowed: AtomicU64,
}

impl<E: Send + Sync + 'static> AsyncEventDrain<E> {
    pub fn new(
        remote: Arc<dyn RemoteSink<E>>,
        fallback: Arc<dyn FallbackSink<E>>,
        config: DrainConfig,
    ) -> Self {
        Self {
            remote,
            fallback,
            state: Mutex::new(DrainState {
                queue: VecDeque::with_capacity(config.capacity),
                in_flight: 0,
                next_sequence: 1,
                last_flush_succeeded: true,
            }),
            config,
            flushing: tokio::sync::Mutex::new(()),
            delivered: AtomicU64::new(0),
            diverted: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Queue `event` for the next flush. Never blocks on the remote sink.
    pub fn submit(&self, event: E) -> SubmitReceipt {
        {
            let mut state = self.state.lock();
            if state.queue.len() + state.in_flight < self.config.capacity {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                state.queue.push_back(QueueEntry { sequence, event });
                return SubmitReceipt::Queued { sequence };
            }
        }

        self.overflowed.fetch_add(1, Ordering::Relaxed);
        warn!(capacity = self.config.capacity, "drain queue full, entry diverted");
        self.divert(0, &event, DivertReason::QueueOverflow);
        SubmitReceipt::Diverted
    }

    /// Deliver `event` right away, bypassing the queue. `false` means it went
    /// to the fallback sink instead.
    pub async fn synchronous_submit(&self, event: E) -> bool {
        match self.remote.send_batch(std::slice::from_ref(&event)).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(error = %err, "synchronous delivery failed");
                self.divert(0, &event, DivertReason::SynchronousFailure);
                false
            }
        }
    }

    /// Run one flush cycle.
    pub async fn flush_once(&self) -> FlushReport {
        let _cycle = self.flushing.lock().await;
        let mut report = FlushReport {
            succeeded: true,
            ..FlushReport::default()
        };

        loop {
            let batch: Vec<QueueEntry<E>> = {
                let mut state = self.state.lock();
                let take = state.queue.len().min(self.config.capacity);
                state.in_flight = take;
                state.queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            let (sequences, events): (Vec<u64>, Vec<E>) =
                batch.into_iter().map(|e| (e.sequence, e.event)).unzip();
            match self.remote.send_batch(&events).await {
                Ok(()) => {
                    self.state.lock().in_flight = 0;
                    self.delivered
                        .fetch_add(events.len() as u64, Ordering::Relaxed);
                    report.delivered += events.len();
                }
                Err(err) => {
                    warn!(error = %err, batch = events.len(), "flush batch failed, re-queued");
                    report.requeued = events.len();
                    report.succeeded = false;
                    let mut state = self.state.lock();
                    state.in_flight = 0;
                    for (sequence, event) in sequences.into_iter().zip(events).rev() {
                        state.queue.push_front(QueueEntry { sequence, event });
                    }
                    break;
                }
            }
        }

        let stranded = {
            let mut state = self.state.lock();
            if !report.succeeded && !state.last_flush_succeeded {
                state.queue.drain(..).collect::<Vec<_>>()
            } else {
                state.last_flush_succeeded = report.succeeded;
                Vec::new()
            }
        };
        if !stranded.is_empty() {
            error!(count = stranded.len(), "second consecutive flush failure, diverting queue");
            report.diverted = stranded.len();
            report.requeued = 0;
            for entry in &stranded {
                self.divert(entry.sequence, &entry.event, DivertReason::SustainedFailure);
            }
        }

        debug!(?report, "flush cycle done");
        report
    }

    pub fn stats(&self) -> DrainStats {
        let state = self.state.lock();
        DrainStats {
            queued: state.queue.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            diverted: self.diverted.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            last_flush_succeeded: state.last_flush_succeeded,
        }
    }

    /// Start the periodic flusher: first cycle after `initial_delay`, then
    /// every `period`.
    pub fn start(self: &Arc<Self>) -> DrainHandle<E> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let drain = Arc::clone(self);
        let initial_delay = self.config.initial_delay();
        // interval_at panics on a zero period.
        let period = self.config.period().max(Duration::from_millis(1));
        let first_tick = Instant::now() + initial_delay;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // A dropped sender also means stop.
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        drain.flush_once().await;
                    }
                }
            }
            debug!("drain flusher stopped");
        });

        info!(?initial_delay, ?period, capacity = self.config.capacity, "drain started");
        DrainHandle {
            drain: Arc::clone(self),
            shutdown_tx,
            join,
        }
    }

    fn divert(&self, sequence: u64, event: &E, reason: DivertReason) {
        self.diverted.fetch_add(1, Ordering::Relaxed);
        self.fallback.divert(sequence, event, reason);
    }
}

/// Running flusher of an `AsyncEventDrain`.
pub struct DrainHandle<E> {
    drain: Arc<AsyncEventDrain<E>>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl<E: Send + Sync + 'static> DrainHandle<E> {
    pub fn drain(&self) -> &Arc<AsyncEventDrain<E>> {
        &self.drain
    }

    /// Stop the timer without waiting. An in-progress cycle completes.
    pub fn request_shutdown(&self) {
        // Receiver may already be gone.
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the timer, run one last flush and divert whatever is still queued.
    pub async fn shutdown_and_join(self) -> DrainStats {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "drain flusher task failed");
        }

        self.drain.flush_once().await;
        let leftover: Vec<QueueEntry<E>> = self.drain.state.lock().queue.drain(..).collect();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "drain stopped with undelivered entries");
        }
        for entry in &leftover {
            self.drain
                .divert(entry.sequence, &entry.event, DivertReason::Shutdown);
        }

        let stats = self.drain.stats();
        info!(?stats, "drain shut down");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tracing_test::traced_test;

    use crate::domain::SinkError;

    /// Records every accepted batch; fails everything while down.
    #[derive(Default)]
    struct ScriptedRemote {
        down: AtomicBool,
        batches: Mutex<Vec<Vec<u32>>>,
    }

    impl ScriptedRemote {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn delivered(&self) -> Vec<u32> {
            self.batches.lock().iter().flatten().copied().collect()
        }
    }

    #[async_trait]
    impl RemoteSink<u32> for ScriptedRemote {
        async fn send_batch(&self, events: &[u32]) -> Result<(), SinkError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SinkError::Other("collector down".into()));
            }
            self.batches.lock().push(events.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFallback {
        entries: Mutex<Vec<(u64, u32, DivertReason)>>,
    }

    impl RecordingFallback {
        fn events(&self) -> Vec<u32> {
            self.entries.lock().iter().map(|(_, e, _)| *e).collect()
        }

        fn reasons(&self) -> Vec<DivertReason> {
            self.entries.lock().iter().map(|(_, _, r)| *r).collect()
        }
    }

    impl FallbackSink<u32> for RecordingFallback {
        fn divert(&self, sequence: u64, event: &u32, reason: DivertReason) {
            self.entries.lock().push((sequence, *event, reason));
        }
    }

    fn drain_with(
        capacity: usize,
    ) -> (
        Arc<AsyncEventDrain<u32>>,
        Arc<ScriptedRemote>,
        Arc<RecordingFallback>,
    ) {
        let remote = Arc::new(ScriptedRemote::default());
        let fallback = Arc::new(RecordingFallback::default());
        let config = DrainConfig {
            capacity,
            ..DrainConfig::default()
        };
        let drain = Arc::new(AsyncEventDrain::new(
            remote.clone(),
            fallback.clone(),
            config,
        ));
        (drain, remote, fallback)
    }

    #[tokio::test]
    async fn one_successful_flush_delivers_everything_in_order() {
        let (drain, remote, fallback) = drain_with(500);
        for n in 0..120 {
            assert!(matches!(drain.submit(n), SubmitReceipt::Queued { .. }));
        }

        let report = drain.flush_once().await;

        assert!(report.succeeded);
        assert_eq!(report.delivered, 120);
        assert_eq!(remote.delivered(), (0..120).collect::<Vec<_>>());
        assert_eq!(drain.stats().queued, 0);
        assert!(fallback.events().is_empty());
    }

    #[tokio::test]
    async fn batches_are_capped_at_capacity() {
        let (drain, remote, _fallback) = drain_with(3);
        for n in 0..3 {
            drain.submit(n);
        }
        drain.flush_once().await;
        for n in 3..5 {
            drain.submit(n);
        }
        drain.flush_once().await;

        let sizes: Vec<usize> = remote.batches.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2]);
        assert_eq!(remote.delivered(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn two_failing_cycles_divert_queue_in_order() {
        let (drain, remote, fallback) = drain_with(500);
        remote.set_down(true);
        for n in 0..10 {
            drain.submit(n);
        }

        let first = drain.flush_once().await;
        assert!(!first.succeeded);
        assert_eq!(first.requeued, 10);
        assert_eq!(drain.stats().queued, 10);
        assert!(fallback.events().is_empty());

        let second = drain.flush_once().await;
        assert_eq!(second.diverted, 10);
        assert_eq!(drain.stats().queued, 0);
        assert_eq!(fallback.events(), (0..10).collect::<Vec<_>>());
        assert!(
            fallback
                .reasons()
                .iter()
                .all(|r| *r == DivertReason::SustainedFailure)
        );
        let sequences: Vec<u64> = fallback.entries.lock().iter().map(|(s, _, _)| *s).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn overflow_is_diverted_immediately() {
        let (drain, remote, fallback) = drain_with(20);
        remote.set_down(true);

        let receipts: Vec<_> = (0..25).map(|n| drain.submit(n)).collect();

        assert!(receipts[..20].iter().all(|r| matches!(r, SubmitReceipt::Queued { .. })));
        assert!(receipts[20..].iter().all(|r| *r == SubmitReceipt::Diverted));
        assert_eq!(fallback.events(), vec![20, 21, 22, 23, 24]);
        assert!(
            fallback
                .reasons()
                .iter()
                .all(|r| *r == DivertReason::QueueOverflow)
        );
        let stats = drain.stats();
        assert_eq!(stats.queued, 20);
        assert_eq!(stats.overflowed, 5);
        assert_eq!(stats.diverted, 5);
    }

    #[tokio::test]
    async fn failed_batch_goes_back_ahead_of_later_submissions() {
        let (drain, remote, _fallback) = drain_with(4);
        remote.set_down(true);
        for n in 0..3 {
            drain.submit(n);
        }
        let tripped = drain.flush_once().await;
        assert!(!tripped.succeeded);
        assert_eq!(tripped.requeued, 3);

        drain.submit(3);
        remote.set_down(false);
        let report = drain.flush_once().await;

        assert!(report.succeeded);
        assert_eq!(remote.delivered(), vec![0, 1, 2, 3]);
        assert!(drain.stats().last_flush_succeeded);
    }

    /// Holds every batch until released, then fails it.
    #[derive(Default)]
    struct StalledRemote {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl RemoteSink<u32> for StalledRemote {
        async fn send_batch(&self, _events: &[u32]) -> Result<(), SinkError> {
            self.entered.notify_one();
            self.release.notified().await;
            Err(SinkError::Other("collector timed out".into()))
        }
    }

    #[tokio::test]
    async fn submissions_during_a_failing_send_stay_within_capacity() {
        let remote = Arc::new(StalledRemote::default());
        let fallback = Arc::new(RecordingFallback::default());
        let drain = Arc::new(AsyncEventDrain::new(
            remote.clone(),
            fallback.clone(),
            DrainConfig {
                capacity: 5,
                ..DrainConfig::default()
            },
        ));
        for n in 0..5 {
            drain.submit(n);
        }

        let flushing = tokio::spawn({
            let drain = Arc::clone(&drain);
            async move { drain.flush_once().await }
        });
        remote.entered.notified().await;
        for n in 5..8 {
            assert_eq!(drain.submit(n), SubmitReceipt::Diverted);
        }
        remote.release.notify_one();
        let report = flushing.await.unwrap();

        assert_eq!(report.requeued, 5);
        assert_eq!(drain.stats().queued, 5);
        assert_eq!(drain.stats().overflowed, 3);
        assert_eq!(fallback.events(), vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn a_success_between_failures_resets_the_strike() {
        let (drain, remote, fallback) = drain_with(500);
        drain.submit(1);

        remote.set_down(true);
        drain.flush_once().await;
        remote.set_down(false);
        drain.flush_once().await;
        drain.submit(2);
        remote.set_down(true);
        let report = drain.flush_once().await;

        assert_eq!(report.diverted, 0);
        assert_eq!(drain.stats().queued, 1);
        assert!(fallback.events().is_empty());
    }

    #[tokio::test]
    async fn flag_stays_down_after_degrading() {
        let (drain, remote, fallback) = drain_with(500);
        remote.set_down(true);
        drain.submit(1);
        drain.flush_once().await;
        drain.flush_once().await;
        assert!(!drain.stats().last_flush_succeeded);

        // Still down: the very next failure diverts at once.
        drain.submit(2);
        let report = drain.flush_once().await;

        assert_eq!(report.diverted, 1);
        assert_eq!(fallback.events(), vec![1, 2]);
    }

    #[tokio::test]
    async fn synchronous_submit_reports_delivery() {
        let (drain, remote, fallback) = drain_with(500);

        assert!(drain.synchronous_submit(7).await);
        remote.set_down(true);
        assert!(!drain.synchronous_submit(8).await);

        assert_eq!(remote.delivered(), vec![7]);
        assert_eq!(fallback.entries.lock().clone(), vec![(0, 8, DivertReason::SynchronousFailure)]);
        assert_eq!(drain.stats().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flusher_waits_for_initial_delay_then_ticks() {
        let remote = Arc::new(ScriptedRemote::default());
        let fallback = Arc::new(RecordingFallback::default());
        let config = DrainConfig {
            capacity: 10,
            initial_delay_ms: 30_000,
            period_ms: 5_000,
        };
        let drain = Arc::new(AsyncEventDrain::new(remote.clone(), fallback, config));
        let handle = drain.start();

        drain.submit(1);
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(remote.delivered().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.delivered(), vec![1]);

        drain.submit(2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.delivered(), vec![1, 2]);

        let stats = handle.shutdown_and_join().await;
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_then_diverts_leftovers() {
        let (drain, remote, fallback) = drain_with(10);
        let handle = drain.start();
        remote.set_down(true);
        for n in 0..3 {
            drain.submit(n);
        }

        let stats = handle.shutdown_and_join().await;

        assert_eq!(stats.queued, 0);
        assert_eq!(stats.diverted, 3);
        assert_eq!(fallback.events(), vec![0, 1, 2]);
        assert!(fallback.reasons().iter().all(|r| *r == DivertReason::Shutdown));
    }

    #[tokio::test]
    #[traced_test]
    async fn overflow_is_logged() {
        let (drain, _remote, _fallback) = drain_with(1);
        drain.submit(1);
        drain.submit(2);

        assert!(logs_contain("drain queue full"));
    }
}
