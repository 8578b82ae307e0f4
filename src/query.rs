use crate::graph::GraphStore;
use crate::models::dto::{HostList, HostStats, NetworkSummary};
use chrono::Utc;
use std::time::Instant;

/// Read-only aggregations over the graph. Nothing is cached.
#[derive(Clone, Debug)]
pub struct QueryService {
    graph: GraphStore,
    started: Instant,
}

impl QueryService {
    pub fn new(graph: GraphStore, started: Instant) -> Self {
        QueryService { graph, started }
    }

    pub fn summary(&self) -> NetworkSummary {
        let stats = self.graph.stats();
        NetworkSummary {
            num_hosts: stats.num_hosts,
            num_connections: stats.num_connections,
            packet_stats: stats.packet_stats,
            timestamp: Utc::now(),
            uptime: self.started.elapsed().as_secs_f64(),
        }
    }

    pub fn hosts(&self) -> HostList {
        HostList {
            hosts: self.graph.host_list(),
        }
    }

    pub fn host(&self, ip: &str) -> Option<HostStats> {
        self.graph.host_stats(ip)
    }
}
