// bounded queue between the capture thread and the graph writer
// when full the newest event is dropped and counted, capture never waits

use crate::graph::GraphWriter;
use crate::hub::BroadcastHub;
use crate::models::domain::{Delta, Event};
use crate::session::Shutdown;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How often an idle writer re-checks the shutdown flag.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Warn about drops at most once per this many.
const DROP_WARN_EVERY: u64 = 1000;

#[derive(Debug, Default)]
pub struct PipelineStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    capture_active: AtomicBool,
}

impl PipelineStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Captured frames that were not IP or did not decode.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn set_skipped(&self, total: u64) {
        self.skipped.store(total, Ordering::Relaxed);
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active.load(Ordering::SeqCst)
    }

    pub fn set_capture_active(&self, active: bool) {
        self.capture_active.store(active, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Queue full; the event was discarded.
    Dropped,
    /// The writer is gone; capture should stop.
    Disconnected,
}

pub struct EventProducer {
    tx: Sender<Event>,
    stats: Arc<PipelineStats>,
}

pub struct EventConsumer {
    rx: Receiver<Event>,
    stats: Arc<PipelineStats>,
}

pub fn channel(capacity: usize, stats: Arc<PipelineStats>) -> (EventProducer, EventConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventProducer {
            tx,
            stats: stats.clone(),
        },
        EventConsumer { rx, stats },
    )
}

impl EventProducer {
    /// Never blocks.
    pub fn push(&self, event: Event) -> PushOutcome {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Accepted
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_WARN_EVERY == 1 {
                    warn!(dropped, "ingestion queue full, dropping events");
                }
                PushOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => PushOutcome::Disconnected,
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl EventConsumer {
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Applies events to the graph and publishes the resulting deltas, in order.
pub struct GraphWorker {
    writer: GraphWriter,
    hub: BroadcastHub,
}

impl GraphWorker {
    pub fn new(writer: GraphWriter, hub: BroadcastHub) -> Self {
        GraphWorker { writer, hub }
    }

    pub fn process(&mut self, event: Event) -> u64 {
        let delta: Delta = self.writer.apply_event(&event);
        let seq = delta.seq;
        trace!(seq, source = %event.source, destination = %event.destination, "applied");
        self.hub.publish(delta);
        seq
    }
}

/// Drains the queue on the calling thread until producers are gone, or
/// until shutdown is signalled and the queue has gone idle.
pub fn run_writer(consumer: EventConsumer, mut worker: GraphWorker, shutdown: Shutdown) {
    loop {
        match consumer.rx.recv_timeout(IDLE_TICK) {
            Ok(event) => {
                worker.process(event);
                consumer.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !shutdown.is_running() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(processed = consumer.stats.processed(), "graph writer stopped");
}

pub fn spawn_writer(
    consumer: EventConsumer,
    worker: GraphWorker,
    shutdown: Shutdown,
) -> std::io::Result<JoinHandle<()>> {
    info!(capacity = ?consumer.rx.capacity(), "starting graph writer");
    thread::Builder::new()
        .name("graph-writer".into())
        .spawn(move || run_writer(consumer, worker, shutdown))
}
