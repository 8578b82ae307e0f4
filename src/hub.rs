// fans graph deltas out to live subscribers, one bounded queue each
// subscribers are registered before their snapshot is taken, deltas with seq <= snapshot seq are skipped

use crate::error::SendFailure;
use crate::graph::GraphStore;
use crate::models::domain::{Delta, Snapshot};
use crate::models::dto::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub type SubscriberId = u64;

struct HubInner {
    graph: GraphStore,
    registry: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<Delta>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Arc<Delta>>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.registry().remove(&id).is_some()
    }
}

#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// `buffer` is how many deltas a subscriber may fall behind before it is dropped.
    pub fn new(graph: GraphStore, buffer: usize) -> Self {
        BroadcastHub {
            inner: Arc::new(HubInner {
                graph,
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        // register first, then snapshot
        self.inner.registry().insert(id, tx);
        let snapshot = self.inner.graph.snapshot();
        debug!(subscriber = id, seq = snapshot.seq, "subscriber registered");

        Subscription {
            id,
            cursor: snapshot.seq,
            snapshot: Some(snapshot),
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Queues `delta` for every registered subscriber without waiting on any of them.
    pub fn publish(&self, delta: Delta) {
        let targets: Vec<_> = self
            .inner
            .registry()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let delta = Arc::new(delta);
        let mut failed = Vec::new();
        for (id, tx) in targets {
            let failure = match tx.try_send(delta.clone()) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => SendFailure::Lagging,
                Err(TrySendError::Closed(_)) => SendFailure::Closed,
            };
            failed.push((id, failure));
        }

        if failed.is_empty() {
            return;
        }
        let mut registry = self.inner.registry();
        for (id, failure) in failed {
            if registry.remove(&id).is_some() {
                match failure {
                    SendFailure::Lagging => warn!(subscriber = id, "dropping lagging subscriber"),
                    SendFailure::Closed => debug!(subscriber = id, "subscriber went away"),
                }
            }
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Drops every subscriber. Their streams end once queued deltas are read.
    pub fn close_all(&self) {
        let mut registry = self.inner.registry();
        let count = registry.len();
        registry.clear();
        debug!(count, "closed all subscribers");
    }
}

/// A registered subscriber: one `init` message followed by ordered deltas.
/// It is snapshotting while the snapshot is held, streaming once it is taken,
/// and closed when `next_delta` returns `None`.
pub struct Subscription {
    id: SubscriberId,
    cursor: u64,
    snapshot: Option<Snapshot>,
    rx: mpsc::Receiver<Arc<Delta>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Hands out the snapshot exactly once.
    pub fn take_snapshot(&mut self) -> Option<Snapshot> {
        self.snapshot.take()
    }

    pub fn init_message(&mut self) -> Option<ServerMessage> {
        self.take_snapshot().map(|snapshot| ServerMessage::from(&snapshot))
    }

    /// Next delta not already covered by the snapshot, or `None` once the
    /// hub has let go of this subscriber.
    pub async fn next_delta(&mut self) -> Option<Arc<Delta>> {
        self.snapshot = None;
        while let Some(delta) = self.rx.recv().await {
            if delta.seq <= self.cursor {
                continue;
            }
            self.cursor = delta.seq;
            return Some(delta);
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.remove(self.id) {
                debug!(subscriber = self.id, "subscriber unregistered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphWriter;
    use crate::models::domain::Event;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn event(src: &str, dst: &str) -> Event {
        Event {
            source: src.parse().unwrap(),
            destination: dst.parse().unwrap(),
            protocol: 17,
            size: 100,
            timestamp: Utc::now(),
        }
    }

    fn setup(buffer: usize) -> (GraphStore, GraphWriter, BroadcastHub) {
        let (store, writer) = GraphStore::new();
        let hub = BroadcastHub::new(store.clone(), buffer);
        (store, writer, hub)
    }

    fn emit(writer: &mut GraphWriter, hub: &BroadcastHub, src: &str, dst: &str) {
        let delta = writer.apply_event(&event(src, dst));
        hub.publish(delta);
    }

    type Edges = BTreeMap<(String, String), u64>;

    fn edges_of(snapshot: &Snapshot) -> Edges {
        snapshot
            .edges
            .iter()
            .map(|f| ((f.source.clone(), f.target.clone()), f.packet_count))
            .collect()
    }

    async fn drain(sub: &mut Subscription, edges: &mut Edges) {
        while let Ok(Some(delta)) =
            tokio::time::timeout(Duration::from_millis(50), sub.next_delta()).await
        {
            *edges
                .entry((delta.flow.source.clone(), delta.flow.target.clone()))
                .or_insert(0) += 1;
        }
    }

    #[tokio::test]
    async fn late_subscriber_reconstructs_same_state() {
        let (store, mut writer, hub) = setup(64);

        let mut early = hub.subscribe();
        let mut early_edges = edges_of(&early.take_snapshot().unwrap());
        assert!(early_edges.is_empty());

        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");
        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");

        let mut late = hub.subscribe();
        let mut late_edges = edges_of(&late.take_snapshot().unwrap());
        assert_eq!(late.cursor, 2);

        emit(&mut writer, &hub, "10.0.0.2", "10.0.0.1");
        emit(&mut writer, &hub, "10.0.0.3", "10.0.0.1");

        drain(&mut early, &mut early_edges).await;
        drain(&mut late, &mut late_edges).await;

        assert_eq!(early_edges, late_edges);
        assert_eq!(early_edges, edges_of(&store.snapshot()));
    }

    #[tokio::test]
    async fn deltas_already_in_snapshot_are_skipped() {
        let (_store, mut writer, hub) = setup(64);

        // simulate the race: the subscriber is registered, then an event is
        // applied and published before its snapshot is taken
        let mut sub = hub.subscribe();
        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");
        sub.cursor = 1;
        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.3");

        let next = sub.next_delta().await.unwrap();
        assert_eq!(next.seq, 2);
        assert_eq!(sub.cursor, 2);
    }

    #[tokio::test]
    async fn concurrent_subscribe_is_exactly_once() {
        let (store, mut writer, hub) = setup(100_000);

        let producer_hub = hub.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..2000u32 {
                let src = format!("10.0.{}.{}", i % 7, i % 13);
                let delta = writer.apply_event(&event(&src, "10.9.9.9"));
                producer_hub.publish(delta);
            }
        });

        let mut subs = Vec::new();
        for _ in 0..20 {
            subs.push(hub.subscribe());
            tokio::task::yield_now().await;
        }
        producer.join().unwrap();

        let expected = edges_of(&store.snapshot());
        for mut sub in subs {
            let mut edges = edges_of(&sub.take_snapshot().unwrap());
            let mut last = sub.cursor;
            while let Ok(Some(delta)) =
                tokio::time::timeout(Duration::from_millis(20), sub.next_delta()).await
            {
                assert_eq!(delta.seq, last + 1, "gap or duplicate in delta stream");
                last = delta.seq;
                *edges
                    .entry((delta.flow.source.clone(), delta.flow.target.clone()))
                    .or_insert(0) += 1;
            }
            assert_eq!(edges, expected);
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped_without_affecting_others() {
        let (_store, mut writer, hub) = setup(4);

        let mut healthy = hub.subscribe();
        let stuck = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        let mut received = 0;
        for _ in 0..10 {
            emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");
            // the healthy subscriber keeps up
            if healthy.next_delta().await.is_some() {
                received += 1;
            }
        }

        assert_eq!(received, 10);
        assert_eq!(hub.subscriber_count(), 1);
        drop(stuck);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let (_store, mut writer, hub) = setup(8);
        let sub = hub.subscribe();
        let keep = hub.subscribe();
        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);

        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.unsubscribe(keep.id()));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_all_ends_streams_after_queued_deltas() {
        let (_store, mut writer, hub) = setup(8);
        let mut sub = hub.subscribe();
        assert!(matches!(sub.init_message(), Some(ServerMessage::Init { .. })));
        assert!(sub.init_message().is_none());

        emit(&mut writer, &hub, "10.0.0.1", "10.0.0.2");
        hub.close_all();

        assert!(sub.next_delta().await.is_some());
        assert!(sub.next_delta().await.is_none());
    }
}
