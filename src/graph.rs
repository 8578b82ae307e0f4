// hosts are nodes, observed flows are weighted directed edges
// GraphWriter is the only handle that mutates; GraphStore readers copy under a short read lock

use crate::models::domain::{Delta, Event, Flow, Host, Snapshot, HOST_KIND};
use crate::models::dto::HostStats;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One counter per ordered pair, indexed from both ends.
///
/// `sent[a][b]` and `received[b][a]` are always bumped together, so the
/// sent and received totals can never drift apart.
#[derive(Debug, Default)]
struct PairCounters {
    sent: HashMap<String, HashMap<String, u64>>,
    received: HashMap<String, HashMap<String, u64>>,
}

impl PairCounters {
    fn increment(&mut self, source: &str, destination: &str) -> u64 {
        let sent = self
            .sent
            .entry(source.to_string())
            .or_default()
            .entry(destination.to_string())
            .or_insert(0);
        *sent += 1;
        *self
            .received
            .entry(destination.to_string())
            .or_default()
            .entry(source.to_string())
            .or_insert(0) += 1;
        *sent
    }

    fn sent_by(&self, host: &str) -> u64 {
        self.sent.get(host).map_or(0, |peers| peers.values().sum())
    }

    fn received_by(&self, host: &str) -> u64 {
        self.received.get(host).map_or(0, |peers| peers.values().sum())
    }

    fn successors(&self, host: &str) -> usize {
        self.sent.get(host).map_or(0, HashMap::len)
    }
}

#[derive(Debug, Default)]
struct NetworkGraph {
    hosts: HashMap<String, Host>,
    flows: HashMap<(String, String), Flow>,
    counters: PairCounters,
    seq: u64,
}

impl NetworkGraph {
    fn host_stats(&self, host: &Host) -> HostStats {
        HostStats {
            ip: host.id.clone(),
            connections: self.counters.successors(&host.id),
            packets_sent: self.counters.sent_by(&host.id),
            packets_received: self.counters.received_by(&host.id),
            first_seen: host.first_seen,
        }
    }
}

/// Point-in-time aggregate counts.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub num_hosts: usize,
    pub num_connections: usize,
    pub packet_stats: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Read handle to the graph.
#[derive(Clone, Debug)]
pub struct GraphStore {
    inner: Arc<RwLock<NetworkGraph>>,
}

/// The single mutating handle.
#[derive(Debug)]
pub struct GraphWriter {
    inner: Arc<RwLock<NetworkGraph>>,
}

impl GraphStore {
    pub fn new() -> (GraphStore, GraphWriter) {
        let inner = Arc::new(RwLock::new(NetworkGraph::default()));
        (
            GraphStore {
                inner: inner.clone(),
            },
            GraphWriter { inner },
        )
    }

    // each apply_event completes before the lock is released, a poisoned graph is still whole
    fn read(&self) -> RwLockReadGuard<'_, NetworkGraph> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Snapshot {
        let graph = self.read();
        Snapshot {
            seq: graph.seq,
            nodes: graph.hosts.values().cloned().collect(),
            edges: graph.flows.values().cloned().collect(),
        }
    }

    pub fn stats(&self) -> GraphStats {
        let graph = self.read();
        let packet_stats = graph
            .counters
            .sent
            .iter()
            .map(|(src, peers)| {
                let peers = peers.iter().map(|(dst, n)| (dst.clone(), *n)).collect();
                (src.clone(), peers)
            })
            .collect();

        GraphStats {
            num_hosts: graph.hosts.len(),
            num_connections: graph.flows.len(),
            packet_stats,
        }
    }

    pub fn host_stats(&self, ip: &str) -> Option<HostStats> {
        let graph = self.read();
        graph.hosts.get(ip).map(|host| graph.host_stats(host))
    }

    /// Statistics for every host, ordered by address string.
    pub fn host_list(&self) -> Vec<HostStats> {
        let graph = self.read();
        let mut hosts: Vec<HostStats> = graph.hosts.values().map(|h| graph.host_stats(h)).collect();
        hosts.sort_by(|a, b| a.ip.cmp(&b.ip));
        hosts
    }
}

impl GraphWriter {
    fn write(&mut self) -> RwLockWriteGuard<'_, NetworkGraph> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds one event into the graph and reports what changed.
    pub fn apply_event(&mut self, event: &Event) -> Delta {
        let source = event.source.to_string();
        let destination = event.destination.to_string();
        let at = event.timestamp;

        let mut graph = self.write();
        graph.seq += 1;
        let seq = graph.seq;

        let mut new_hosts = Vec::new();
        for id in [&source, &destination] {
            if !graph.hosts.contains_key(id) {
                let host = Host {
                    id: id.clone(),
                    kind: HOST_KIND,
                    first_seen: at,
                };
                graph.hosts.insert(id.clone(), host.clone());
                new_hosts.push(host);
            }
        }

        let count = graph.counters.increment(&source, &destination);
        let flow = graph
            .flows
            .entry((source.clone(), destination.clone()))
            .and_modify(|flow| {
                flow.packet_count += 1;
                flow.last_seen = flow.last_seen.max(at);
            })
            .or_insert_with(|| Flow {
                source,
                target: destination,
                packet_count: 1,
                first_seen: at,
                last_seen: at,
            })
            .clone();
        debug_assert_eq!(flow.packet_count, count, "flow weight and pair counter diverged");

        Delta {
            seq,
            event: event.clone(),
            new_hosts,
            flow,
        }
    }
}
