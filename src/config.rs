use crate::error::{NetPulseError, Result};
use crate::pipeline::DEFAULT_QUEUE_CAPACITY;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Command line / environment configuration. A `.env` file is read first.
#[derive(Parser, Debug, Clone)]
#[command(name = "netpulse", version, about = "Real-time network traffic graph")]
pub struct Config {
    /// Interface to capture on; the system default device when omitted
    #[arg(short, long, env = "NETPULSE_INTERFACE")]
    pub interface: Option<String>,

    /// Address for the HTTP and WebSocket listener
    #[arg(short, long, env = "NETPULSE_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// BPF filter applied by the capture device
    #[arg(long, env = "NETPULSE_FILTER", default_value = "ip")]
    pub filter: String,

    #[arg(long, env = "NETPULSE_SNAPLEN", default_value_t = 256)]
    pub snaplen: i32,

    #[arg(long, env = "NETPULSE_PROMISC")]
    pub promisc: bool,

    #[arg(long, env = "NETPULSE_READ_TIMEOUT_MS", default_value_t = 500)]
    pub read_timeout_ms: i32,

    /// Events buffered between capture and the graph writer before dropping
    #[arg(long, env = "NETPULSE_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Deltas a subscriber may fall behind before it is disconnected
    #[arg(long, env = "NETPULSE_SUBSCRIBER_BUFFER", default_value_t = 256)]
    pub subscriber_buffer: usize,

    #[arg(long, env = "NETPULSE_SEND_TIMEOUT_SECS", default_value_t = 10)]
    pub send_timeout_secs: u64,

    #[arg(long, env = "NETPULSE_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Used when RUST_LOG is not set
    #[arg(long, env = "NETPULSE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// The subset of settings the capture device needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    pub filter: String,
    pub snaplen: i32,
    pub promisc: bool,
    pub read_timeout_ms: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            filter: "ip".into(),
            snaplen: 256,
            promisc: false,
            read_timeout_ms: 500,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Config::parse()
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.queue_capacity == 0, "queue capacity must be at least 1"),
            (self.subscriber_buffer == 0, "subscriber buffer must be at least 1"),
            (self.snaplen <= 0, "snaplen must be positive"),
            (self.read_timeout_ms <= 0, "read timeout must be positive"),
            (self.send_timeout_secs == 0, "send timeout must be positive"),
            (self.filter.trim().is_empty(), "capture filter must not be empty"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(NetPulseError::Config((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            interface: self.interface.clone(),
            filter: self.filter.clone(),
            snaplen: self.snaplen,
            promisc: self.promisc,
            read_timeout_ms: self.read_timeout_ms,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
