use thiserror::Error;

/// Shown next to every `CaptureUnavailable` report.
pub const CAPTURE_HINT: &str = "packet capture needs raw socket access: run with sudo, \
     or grant the capability with `sudo setcap cap_net_raw,cap_net_admin=eip <path-to-netpulse>`";

/// Process-level errors. Only these can stop the service.
#[derive(Error, Debug)]
pub enum NetPulseError {
    /// The capture facility could not be opened. Fatal at startup, never retried.
    #[error("packet capture unavailable on {interface}: {source}\nhint: {}", CAPTURE_HINT)]
    CaptureUnavailable {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    /// The interface opened but speaks a link layer we cannot decode.
    #[error("packet capture unavailable on {interface}: unsupported link type {linktype}")]
    UnsupportedLinkType { interface: String, linktype: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetPulseError {
    /// True for every way the capture source can fail to open.
    pub fn is_capture_unavailable(&self) -> bool {
        matches!(
            self,
            NetPulseError::CaptureUnavailable { .. } | NetPulseError::UnsupportedLinkType { .. }
        )
    }

    /// Process exit status for this error. Capture failures get their own code.
    pub fn exit_code(&self) -> u8 {
        if self.is_capture_unavailable() {
            2
        } else {
            1
        }
    }
}

/// Why a captured frame did not become an event. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame carries no IP layer")]
    NotIp,
}

/// Mid-stream failure of a running packet source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture read failed: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("packet source exhausted")]
    Exhausted,
}

/// Why a delta could not be queued for a subscriber.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    #[error("subscriber queue is full")]
    Lagging,

    #[error("subscriber queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NetPulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_exit_with_distinct_code() {
        let err = NetPulseError::CaptureUnavailable {
            interface: "eth9".into(),
            source: pcap::Error::PcapError("permission denied".into()),
        };
        assert!(err.is_capture_unavailable());
        assert_eq!(err.exit_code(), 2);

        let msg = err.to_string();
        assert!(msg.contains("eth9"));
        assert!(msg.contains("setcap"));

        let other = NetPulseError::Config("queue capacity must be positive".into());
        assert!(!other.is_capture_unavailable());
        assert_eq!(other.exit_code(), 1);
    }
}
