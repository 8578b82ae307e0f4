pub mod domain {
    use chrono::{DateTime, Utc};
    use std::net::IpAddr;

    /// One decoded IP packet. Consumed exactly once by the graph writer.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Event {
        pub source: IpAddr,
        pub destination: IpAddr,
        pub protocol: u8,
        pub size: usize,
        pub timestamp: DateTime<Utc>,
    }

    pub const HOST_KIND: &str = "host";

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Host {
        pub id: String,
        pub kind: &'static str,
        pub first_seen: DateTime<Utc>,
    }

    /// Directed source -> target relationship; `packet_count` is the edge weight.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Flow {
        pub source: String,
        pub target: String,
        pub packet_count: u64,
        pub first_seen: DateTime<Utc>,
        pub last_seen: DateTime<Utc>,
    }

    /// What a single applied event changed.
    #[derive(Debug, Clone)]
    pub struct Delta {
        pub seq: u64,
        pub event: Event,
        pub new_hosts: Vec<Host>,
        pub flow: Flow,
    }

    /// Consistent copy of the graph as of event `seq`.
    #[derive(Debug, Clone, Default)]
    pub struct Snapshot {
        pub seq: u64,
        pub nodes: Vec<Host>,
        pub edges: Vec<Flow>,
    }
}

pub mod dto {
    use super::domain::{Delta, Flow, Host, Snapshot};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::net::IpAddr;

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct NodeDTO {
        pub id: String,
        #[serde(rename = "type")]
        pub kind: String,
        pub first_seen: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct EdgeDTO {
        pub source: String,
        pub target: String,
        pub weight: u64,
        pub last_seen: DateTime<Utc>,
    }

    /// Frames pushed to WebSocket subscribers.
    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    #[serde(tag = "type", rename_all = "lowercase")]
    pub enum ServerMessage {
        Init {
            nodes: Vec<NodeDTO>,
            edges: Vec<EdgeDTO>,
        },
        Packet {
            source: IpAddr,
            destination: IpAddr,
            protocol: u8,
            timestamp: DateTime<Utc>,
            size: usize,
        },
    }

    impl From<&Host> for NodeDTO {
        fn from(host: &Host) -> Self {
            NodeDTO {
                id: host.id.clone(),
                kind: host.kind.to_string(),
                first_seen: host.first_seen,
            }
        }
    }

    impl From<&Flow> for EdgeDTO {
        fn from(flow: &Flow) -> Self {
            EdgeDTO {
                source: flow.source.clone(),
                target: flow.target.clone(),
                weight: flow.packet_count,
                last_seen: flow.last_seen,
            }
        }
    }

    impl From<&Snapshot> for ServerMessage {
        fn from(snapshot: &Snapshot) -> Self {
            ServerMessage::Init {
                nodes: snapshot.nodes.iter().map(NodeDTO::from).collect(),
                edges: snapshot.edges.iter().map(EdgeDTO::from).collect(),
            }
        }
    }

    impl From<&Delta> for ServerMessage {
        fn from(delta: &Delta) -> Self {
            let event = &delta.event;
            ServerMessage::Packet {
                source: event.source,
                destination: event.destination,
                protocol: event.protocol,
                timestamp: event.timestamp,
                size: event.size,
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct NetworkSummary {
        pub num_hosts: usize,
        pub num_connections: usize,
        pub packet_stats: BTreeMap<String, BTreeMap<String, u64>>,
        pub timestamp: DateTime<Utc>,
        pub uptime: f64,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct HostStats {
        pub ip: String,
        pub connections: usize,
        pub packets_sent: u64,
        pub packets_received: u64,
        pub first_seen: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct HostList {
        pub hosts: Vec<HostStats>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    pub struct HealthReport {
        pub capturing: bool,
        pub events_accepted: u64,
        pub events_dropped: u64,
        pub events_processed: u64,
        pub frames_skipped: u64,
        pub subscribers: usize,
        pub uptime: f64,
    }
}
