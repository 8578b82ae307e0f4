use crate::config::CaptureConfig;
use crate::error::{CaptureError, NetPulseError, Result};
use crate::models::domain::Event;
use crate::parser::{decode_frame, LinkLayer};
use crate::pipeline::{EventProducer, PushOutcome};
use crate::session::Shutdown;
use chrono::{DateTime, Utc};
use pcap::{Active, Capture, Device, Linktype};
use std::thread::{self, JoinHandle};
use tracing::{error, info, trace};

const DEFAULT_DEVICE: &str = "<default>";

/// Anything that yields decoded events, one read at a time.
///
/// `Ok(None)` means nothing usable arrived this round (a read timeout or a
/// skipped frame); the caller gets a chance to check for shutdown.
pub trait PacketSource: Send {
    fn next_event(&mut self) -> std::result::Result<Option<Event>, CaptureError>;

    /// Frames read so far that did not decode to an IP event.
    fn skipped(&self) -> u64 {
        0
    }
}

/// Lazy, unbounded sequence of events from a source. Idle rounds are
/// skipped and the sequence ends at the first read error.
pub struct Events<S> {
    source: S,
}

pub fn events<S: PacketSource>(source: S) -> Events<S> {
    Events { source }
}

impl<S: PacketSource> Iterator for Events<S> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            match self.source.next_event() {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(CaptureError::Exhausted) => return None,
                Err(err) => {
                    error!(%err, "packet source failed");
                    return None;
                }
            }
        }
    }
}

pub struct PcapSource {
    cap: Capture<Active>,
    link: LinkLayer,
    skipped: u64,
}

impl PcapSource {
    /// Opens the capture device. Every failure here is `CaptureUnavailable`.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = resolve_device(config.interface.as_deref())?;
        let interface = device.name.clone();
        let unavailable = |source| NetPulseError::CaptureUnavailable {
            interface: interface.clone(),
            source,
        };

        let mut cap = create_capture(device, config).map_err(unavailable)?;
        configure_capture(&mut cap, &config.filter).map_err(unavailable)?;

        let linktype = cap.get_datalink();
        let link = link_layer(linktype).ok_or_else(|| NetPulseError::UnsupportedLinkType {
            interface: interface.clone(),
            linktype: format!("{:?}", linktype),
        })?;

        info!(%interface, filter = %config.filter, ?link, "packet capture opened");
        Ok(PcapSource { cap, link, skipped: 0 })
    }
}

impl PacketSource for PcapSource {
    fn next_event(&mut self) -> std::result::Result<Option<Event>, CaptureError> {
        let packet = match self.cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let ts = &packet.header.ts;
        let timestamp = DateTime::<Utc>::from_timestamp(ts.tv_sec as i64, (ts.tv_usec as u32) * 1000)
            .unwrap_or_else(Utc::now);
        let size = packet.header.len as usize;

        match decode_frame(self.link, packet.data, size, timestamp) {
            Ok(event) => Ok(Some(event)),
            Err(err) => {
                self.skipped += 1;
                trace!(%err, "skipping frame");
                Ok(None)
            }
        }
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}

fn resolve_device(interface: Option<&str>) -> Result<Device> {
    match interface {
        Some(name) => Ok(Device::from(name)),
        None => require_device(Device::lookup()),
    }
}

fn require_device(found: std::result::Result<Option<Device>, pcap::Error>) -> Result<Device> {
    let unavailable = |source| NetPulseError::CaptureUnavailable {
        interface: DEFAULT_DEVICE.to_string(),
        source,
    };
    found
        .map_err(unavailable)?
        .ok_or_else(|| unavailable(pcap::Error::PcapError("no default capture device".into())))
}

fn create_capture(device: Device, config: &CaptureConfig) -> std::result::Result<Capture<Active>, pcap::Error> {
    Capture::from_device(device)?
        .promisc(config.promisc)
        .snaplen(config.snaplen)
        .timeout(config.read_timeout_ms) // bounds how long shutdown waits on a quiet link
        .immediate_mode(true)
        .open()
}

fn configure_capture(cap: &mut Capture<Active>, filter: &str) -> std::result::Result<(), pcap::Error> {
    cap.filter(filter, true)
}

fn link_layer(linktype: Linktype) -> Option<LinkLayer> {
    match linktype {
        Linktype::ETHERNET => Some(LinkLayer::Ethernet),
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Some(LinkLayer::RawIp),
        _ => None,
    }
}

/// Reads from `source` into the pipeline until shutdown, exhaustion or a
/// read error. Never touches graph state.
pub fn run_capture<S: PacketSource>(
    mut source: S,
    producer: EventProducer,
    shutdown: &Shutdown,
) -> std::result::Result<(), CaptureError> {
    producer.stats().set_capture_active(true);
    let result = loop {
        if !shutdown.is_running() {
            break Ok(());
        }
        match source.next_event() {
            Ok(Some(event)) => {
                if producer.push(event) == PushOutcome::Disconnected {
                    break Ok(());
                }
            }
            Ok(None) => producer.stats().set_skipped(source.skipped()),
            Err(CaptureError::Exhausted) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    producer.stats().set_skipped(source.skipped());
    producer.stats().set_capture_active(false);
    result
}

/// Runs the capture loop on its own OS thread. A read failure stops the
/// whole process rather than leaving a frozen graph on display.
pub fn start_sniffing<S: PacketSource + 'static>(
    source: S,
    producer: EventProducer,
    shutdown: Shutdown,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("capture".into()).spawn(move || {
        match run_capture(source, producer, &shutdown) {
            Ok(()) => info!("packet capture stopped"),
            Err(err) => {
                error!(%err, "packet capture failed, shutting down");
                shutdown.trigger();
            }
        }
    })
}
