use crate::graph::{GraphStore, GraphWriter};
use crate::hub::BroadcastHub;
use crate::pipeline::PipelineStats;
use crate::query::QueryService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Process-wide stop signal, usable from plain threads and async tasks alike.
#[derive(Clone)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Shutdown {
            running: Arc::new(AtomicBool::new(true)),
            tx: Arc::new(tx),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.tx.send_replace(true);
        }
    }

    /// Resolves once `trigger` has been called, including before this call.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the running service shares, built once in `main`.
pub struct Session {
    started: Instant,
    pub graph: GraphStore,
    pub hub: BroadcastHub,
    pub query: QueryService,
    pub pipeline: Arc<PipelineStats>,
    pub shutdown: Shutdown,
    pub send_timeout: Duration,
}

impl Session {
    /// Builds the session and hands back the only graph writer.
    pub fn new(subscriber_buffer: usize, send_timeout: Duration) -> (Arc<Session>, GraphWriter) {
        let started = Instant::now();
        let (graph, writer) = GraphStore::new();
        let hub = BroadcastHub::new(graph.clone(), subscriber_buffer);
        let query = QueryService::new(graph.clone(), started);

        let session = Session {
            started,
            graph,
            hub,
            query,
            pipeline: Arc::new(PipelineStats::default()),
            shutdown: Shutdown::new(),
            send_timeout,
        };
        (Arc::new(session), writer)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stops everything that is still running and releases subscribers.
    pub fn teardown(&self) {
        self.shutdown.trigger();
        self.pipeline.set_capture_active(false);
        self.hub.close_all();
    }
}
