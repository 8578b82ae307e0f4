// decodes captured frames into graph events
// only the IP header is read, payloads are never inspected

use crate::error::PacketError;
use crate::models::domain::Event;
use chrono::{DateTime, Utc};
use etherparse::{LaxNetSlice, LaxSlicedPacket};
use std::net::IpAddr;

/// Framing of the bytes handed over by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    RawIp,
}

pub fn decode_frame(
    link: LinkLayer,
    data: &[u8],
    size: usize,
    timestamp: DateTime<Utc>,
) -> Result<Event, PacketError> {
    // lax slicing: the capture keeps only the first snaplen bytes of a frame
    let sliced = match link {
        LinkLayer::Ethernet => {
            LaxSlicedPacket::from_ethernet(data).map_err(|e| PacketError::Malformed(e.to_string()))?
        }
        LinkLayer::RawIp => {
            LaxSlicedPacket::from_ip(data).map_err(|e| PacketError::Malformed(e.to_string()))?
        }
    };

    let (source, destination, protocol) = match sliced.net {
        Some(LaxNetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
                ipv4.payload().ip_number.0,
            )
        }
        Some(LaxNetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
                ipv6.payload().ip_number.0,
            )
        }
        None => {
            return Err(match sliced.stop_err {
                Some((err, _)) => PacketError::Malformed(err.to_string()),
                None => PacketError::NotIp,
            })
        }
    };

    Ok(Event {
        source,
        destination,
        protocol,
        size,
        timestamp,
    })
}
