use crate::config::Addressing;
use crate::dispatch::{Action, Reason};
use framespector_packets::{ArpPacket, EtherType, EthernetFrame, IcmpPacket, IcmpType, Ipv4Packet};
use tracing::debug;

/// Answers ARP requests for our protocol address.
#[derive(Clone, Copy, Debug)]
pub struct ArpResponder {
    addressing: Addressing,
}

impl ArpResponder {
    pub fn new(addressing: &Addressing) -> Self {
        ArpResponder {
            addressing: *addressing,
        }
    }

    ///
    /// From the ARP RFC: https://tools.ietf.org/html/rfc826
    ///
    /// ?Am I the target protocol address?
    /// Yes:
    ///     ?Is the opcode ares_op$REQUEST?
    ///     Yes:
    ///         Swap hardware and protocol fields, putting the local hardware and protocol
    ///             addresses in the sender fields.
    ///         Set the ar$op field to ares_op$REPLY
    ///         Send the packet to the (new) target hardware address on the same hardware on
    ///             which the request was received.
    ///
    /// No translation table is kept, every frame is answered on its own.
    ///
    pub fn respond(&self, frame: &EthernetFrame) -> Action {
        let request = match ArpPacket::from_buffer(frame.payload) {
            Ok(request) => request,
            Err(err) => return Action::NoAction(Reason::MalformedArp(err)),
        };

        let our_mac = self.addressing.hardware_addr;
        let reply = match request.build_reply(our_mac, self.addressing.protocol_addr) {
            Ok(reply) => reply,
            Err(err) => return Action::NoAction(Reason::ArpNotAnswered(err)),
        };

        // build_reply only succeeds for 6 byte hardware addresses
        let destination = reply.target_mac_addr().unwrap_or(frame.source);
        Action::Transmit(EthernetFrame::encode(
            destination,
            our_mac,
            EtherType::Arp,
            &reply.encode(),
        ))
    }
}

/// Answers ICMP echo requests addressed to our protocol address.
#[derive(Clone, Copy, Debug)]
pub struct EchoResponder {
    addressing: Addressing,
}

impl EchoResponder {
    pub fn new(addressing: &Addressing) -> Self {
        EchoResponder {
            addressing: *addressing,
        }
    }

    /// Builds the echo reply for `packet`, already known to carry ICMP.
    ///
    /// The reply keeps identifier, sequence number and data. Its IPv4 header mirrors the
    /// request with source and destination swapped, and it goes back to the hardware address
    /// the request came from. Both checksums are computed fresh.
    pub fn respond(&self, frame: &EthernetFrame, packet: &Ipv4Packet) -> Action {
        if packet.dest_addr != self.addressing.protocol_addr {
            return Action::NoAction(Reason::NotOurAddress(packet.dest_addr));
        }
        if packet.is_fragment() {
            return Action::NoAction(Reason::Fragmented {
                offset: packet.fragment_offset(),
            });
        }

        let icmp = match IcmpPacket::from_ipv4(packet) {
            Ok(icmp) => icmp,
            Err(err) => return Action::NoAction(Reason::MalformedIcmp(err)),
        };

        match icmp.icmp_type {
            IcmpType::EchoRequest => {}
            IcmpType::EchoReply | IcmpType::Other(_) => {
                return Action::NoAction(Reason::UnansweredIcmp(icmp.icmp_type))
            }
        }

        if packet.src_addr != self.addressing.remote_protocol_addr {
            debug!(src = %packet.src_addr, "echo request from outside the link");
        }

        let icmp_reply = icmp.echo_reply().encode();
        let ipv4_reply = packet.reply(&icmp_reply).encode();
        Action::Transmit(EthernetFrame::encode(
            frame.source,
            self.addressing.hardware_addr,
            EtherType::Ipv4,
            &ipv4_reply,
        ))
    }
}
