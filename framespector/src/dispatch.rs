use crate::config::Addressing;
use crate::responder::{ArpResponder, EchoResponder};
use framespector_packets::{
    ArpReplyError, DecodeError, EtherType, EthernetFrame, IcmpType, IpProtocol, Ipv4Packet,
    PacketData,
};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// Outcome of inspecting one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// A complete Ethernet frame to send back on the same link.
    Transmit(PacketData),
    NoAction(Reason),
}

/// Why a frame was not answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    Ipv6,
    /// A second 802.1Q tag; only one is unwrapped.
    NestedVlan,
    UnknownEtherType(u16),
    MalformedArp(DecodeError),
    ArpNotAnswered(ArpReplyError),
    MalformedIpv4(DecodeError),
    UnsupportedProtocol(IpProtocol),
    NotOurAddress(Ipv4Addr),
    /// Part of a fragmented datagram; fragments are not reassembled.
    Fragmented { offset: u16 },
    MalformedIcmp(DecodeError),
    UnansweredIcmp(IcmpType),
}

impl Reason {
    /// True when the frame was damaged rather than simply not for us.
    pub fn is_malformed(&self) -> bool {
        match self {
            Reason::MalformedArp(_) | Reason::MalformedIpv4(_) | Reason::MalformedIcmp(_) => true,
            Reason::Ipv6
            | Reason::NestedVlan
            | Reason::UnknownEtherType(_)
            | Reason::ArpNotAnswered(_)
            | Reason::UnsupportedProtocol(_)
            | Reason::NotOurAddress(_)
            | Reason::Fragmented { .. }
            | Reason::UnansweredIcmp(_) => false,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Ipv6 => write!(f, "IPv6 is not handled"),
            Reason::NestedVlan => write!(f, "nested VLAN tags are not unwrapped"),
            Reason::UnknownEtherType(value) => write!(f, "unknown EtherType 0x{:04x}", value),
            Reason::MalformedArp(err) => write!(f, "ARP: {}", err),
            Reason::ArpNotAnswered(err) => write!(f, "ARP: {}", err),
            Reason::MalformedIpv4(err) => write!(f, "IPv4: {}", err),
            Reason::UnsupportedProtocol(protocol) => write!(f, "IPv4 carrying {}", protocol),
            Reason::NotOurAddress(addr) => write!(f, "IPv4 destination {} is not ours", addr),
            Reason::Fragmented { offset } => {
                write!(f, "IPv4 fragment at offset {} is not reassembled", offset)
            }
            Reason::MalformedIcmp(err) => write!(f, "ICMP: {}", err),
            Reason::UnansweredIcmp(icmp_type) => {
                write!(f, "ICMP type {} is not answered", u8::from(*icmp_type))
            }
        }
    }
}

/// Classifies raw frames and builds the replies owed for them.
///
/// Holds no state between frames beyond the addresses fixed at startup.
#[derive(Clone, Copy, Debug)]
pub struct Dispatcher {
    arp: ArpResponder,
    echo: EchoResponder,
}

impl Dispatcher {
    pub fn new(addressing: &Addressing) -> Self {
        Dispatcher {
            arp: ArpResponder::new(addressing),
            echo: EchoResponder::new(addressing),
        }
    }

    /// Inspects one received frame.
    ///
    /// Only a frame that is not even a valid Ethernet header is an error. Anything inside it
    /// that cannot be decoded or is not meant for us is reported as `NoAction`.
    pub fn process(&self, frame: &[u8]) -> Result<Action, DecodeError> {
        let frame = EthernetFrame::from_buffer(frame)?;
        if let Some(vlan_id) = frame.vlan_id {
            trace!(vlan_id, "stripped 802.1Q tag");
        }

        let action = match frame.ether_type {
            EtherType::Arp => self.arp.respond(&frame),
            EtherType::Ipv4 => self.process_ipv4(&frame),
            EtherType::Ipv6 => Action::NoAction(Reason::Ipv6),
            EtherType::Vlan => Action::NoAction(Reason::NestedVlan),
            EtherType::Unknown(value) => Action::NoAction(Reason::UnknownEtherType(value)),
        };
        Ok(action)
    }

    fn process_ipv4(&self, frame: &EthernetFrame) -> Action {
        let packet = match Ipv4Packet::from_buffer(frame.payload) {
            Ok(packet) => packet,
            Err(err) => return Action::NoAction(Reason::MalformedIpv4(err)),
        };

        // Diagnostic only, a bad header checksum does not drop the packet.
        if !packet.validate_checksum() {
            debug!(
                src = %packet.src_addr,
                checksum = packet.checksum,
                "IPv4 header checksum mismatch"
            );
        }

        match packet.protocol {
            IpProtocol::Icmp => self.echo.respond(frame, &packet),
            IpProtocol::Tcp | IpProtocol::Udp | IpProtocol::Other(_) => {
                Action::NoAction(Reason::UnsupportedProtocol(packet.protocol))
            }
        }
    }
}
