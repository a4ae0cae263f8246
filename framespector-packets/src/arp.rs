use crate::*;
use std::borrow::Cow;
use std::net::Ipv4Addr;

const ARP_FIXED_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
    Other(u16),
}

impl From<u16> for ArpOp {
    fn from(value: u16) -> Self {
        match value {
            1 => ArpOp::Request,
            2 => ArpOp::Reply,
            other => ArpOp::Other(other),
        }
    }
}

impl From<ArpOp> for u16 {
    fn from(op: ArpOp) -> Self {
        match op {
            ArpOp::Request => 1,
            ArpOp::Reply => 2,
            ArpOp::Other(other) => other,
        }
    }
}

///
/// ARP packet as described in RFC 826
/// https://tools.ietf.org/html/rfc826
///
/// HTYPE(2) PTYPE(2) HLEN(1) PLEN(1) OPER(2) SHA(HLEN) SPA(PLEN) THA(HLEN) TPA(PLEN)
///
/// Decoded addresses borrow from the frame; addresses filled in for a reply are owned.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpPacket<'a> {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub hardware_addr_len: u8,
    pub protocol_addr_len: u8,
    pub operation: ArpOp,
    pub sender_hardware_addr: Cow<'a, [u8]>,
    pub sender_protocol_addr: Cow<'a, [u8]>,
    pub target_hardware_addr: Cow<'a, [u8]>,
    pub target_protocol_addr: Cow<'a, [u8]>,
}

impl<'a> ArpPacket<'a> {
    /// Size in bytes of a packet with the given address lengths.
    pub fn encoded_len(hardware_addr_len: u8, protocol_addr_len: u8) -> usize {
        ARP_FIXED_LEN + 2 * hardware_addr_len as usize + 2 * protocol_addr_len as usize
    }

    ///
    /// Decodes the ARP payload of an Ethernet frame.
    /// Validates
    /// - The fixed fields are present
    /// - The payload holds every address announced by the length fields
    ///
    /// Bytes past the computed length (Ethernet padding) are ignored.
    ///
    pub fn from_buffer(payload: &'a [u8]) -> Result<ArpPacket<'a>, DecodeError> {
        if payload.len() < ARP_FIXED_LEN {
            return Err(DecodeError::ArpTooShort { len: payload.len() });
        }

        let hardware_addr_len = payload[4];
        let protocol_addr_len = payload[5];
        let expected = ArpPacket::encoded_len(hardware_addr_len, protocol_addr_len);
        if payload.len() < expected {
            return Err(DecodeError::ArpLengthMismatch {
                expected,
                len: payload.len(),
            });
        }

        let hlen = hardware_addr_len as usize;
        let plen = protocol_addr_len as usize;
        let sha_start = ARP_FIXED_LEN;
        let spa_start = sha_start + hlen;
        let tha_start = spa_start + plen;
        let tpa_start = tha_start + hlen;

        let sender_hardware_addr = Cow::Borrowed(&payload[sha_start..spa_start]);
        let sender_protocol_addr = Cow::Borrowed(&payload[spa_start..tha_start]);
        let target_hardware_addr = Cow::Borrowed(&payload[tha_start..tpa_start]);
        let target_protocol_addr = Cow::Borrowed(&payload[tpa_start..tpa_start + plen]);

        Ok(ArpPacket {
            hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
            protocol_type: u16::from_be_bytes([payload[2], payload[3]]),
            hardware_addr_len,
            protocol_addr_len,
            operation: ArpOp::from(u16::from_be_bytes([payload[6], payload[7]])),
            sender_hardware_addr,
            sender_protocol_addr,
            target_hardware_addr,
            target_protocol_addr,
        })
    }

    ///
    /// Answers a request for `our_ip`, following the RFC 826 reception algorithm without the
    /// translation table: swap hardware and protocol fields, put our addresses in the sender
    /// fields and set the opcode to reply.
    ///
    /// Never answers on behalf of another address and never answers anything but a request.
    ///
    pub fn build_reply(
        &self,
        our_mac: MacAddr,
        our_ip: Ipv4Addr,
    ) -> Result<ArpPacket<'a>, ArpReplyError> {
        if self.operation != ArpOp::Request {
            return Err(ArpReplyError::NotARequest {
                opcode: u16::from(self.operation),
            });
        }

        if self.target_protocol_addr[..] != our_ip.octets()[..] {
            return Err(ArpReplyError::NotForUs {
                target: self.target_protocol_addr.to_vec(),
            });
        }

        if self.hardware_addr_len != 6 || self.protocol_addr_len != 4 {
            return Err(ArpReplyError::UnsupportedAddressFormat {
                hardware_len: self.hardware_addr_len,
                protocol_len: self.protocol_addr_len,
            });
        }

        Ok(ArpPacket {
            hardware_type: self.hardware_type,
            protocol_type: self.protocol_type,
            hardware_addr_len: self.hardware_addr_len,
            protocol_addr_len: self.protocol_addr_len,
            operation: ArpOp::Reply,
            sender_hardware_addr: Cow::Owned(our_mac.bytes.to_vec()),
            sender_protocol_addr: Cow::Owned(our_ip.octets().to_vec()),
            target_hardware_addr: self.sender_hardware_addr.clone(),
            target_protocol_addr: self.sender_protocol_addr.clone(),
        })
    }

    /// Encodes the packet with field sizes taken from the length fields.
    pub fn encode(&self) -> PacketData {
        let hlen = self.hardware_addr_len as usize;
        let plen = self.protocol_addr_len as usize;
        let mut data = Vec::with_capacity(ArpPacket::encoded_len(
            self.hardware_addr_len,
            self.protocol_addr_len,
        ));

        data.extend_from_slice(&self.hardware_type.to_be_bytes());
        data.extend_from_slice(&self.protocol_type.to_be_bytes());
        data.push(self.hardware_addr_len);
        data.push(self.protocol_addr_len);
        data.extend_from_slice(&u16::from(self.operation).to_be_bytes());
        put_addr(&mut data, &self.sender_hardware_addr, hlen);
        put_addr(&mut data, &self.sender_protocol_addr, plen);
        put_addr(&mut data, &self.target_hardware_addr, hlen);
        put_addr(&mut data, &self.target_protocol_addr, plen);
        data
    }

    pub fn sender_mac_addr(&self) -> Option<MacAddr> {
        mac_addr(&self.sender_hardware_addr)
    }

    pub fn target_mac_addr(&self) -> Option<MacAddr> {
        mac_addr(&self.target_hardware_addr)
    }

    pub fn sender_ipv4_addr(&self) -> Option<Ipv4Addr> {
        ipv4_addr(&self.sender_protocol_addr)
    }

    pub fn target_ipv4_addr(&self) -> Option<Ipv4Addr> {
        ipv4_addr(&self.target_protocol_addr)
    }
}

// Writes exactly `len` bytes. A longer address keeps its lowest bytes, so the 16 byte
// IPv4-mapped form still lands as the plain 4 byte address; a shorter one is zero filled.
fn put_addr(data: &mut PacketData, addr: &[u8], len: usize) {
    if addr.len() >= len {
        data.extend_from_slice(&addr[addr.len() - len..]);
    } else {
        data.extend_from_slice(addr);
        data.resize(data.len() + len - addr.len(), 0);
    }
}

fn mac_addr(bytes: &[u8]) -> Option<MacAddr> {
    if bytes.len() == 6 {
        let mut mac = [0; 6];
        mac.copy_from_slice(bytes);
        Some(MacAddr::new(mac))
    } else {
        None
    }
}

fn ipv4_addr(bytes: &[u8]) -> Option<Ipv4Addr> {
    if bytes.len() == 4 {
        Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const OUR_MAC: MacAddr = MacAddr {
        bytes: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
    };
    const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    // arping from f2:4e:68:82:e2:1b / 192.168.38.2 for 192.168.38.3
    fn request_bytes() -> Vec<u8> {
        vec![
            0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01, 0xf2, 0x4e, 0x68, 0x82, 0xe2, 0x1b,
            0xc0, 0xa8, 0x26, 0x02, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc0, 0xa8, 0x26, 0x03,
        ]
    }

    fn request_for(target: Ipv4Addr) -> ArpPacket<'static> {
        ArpPacket {
            hardware_type: 1,
            protocol_type: IPV4_ETHER_TYPE,
            hardware_addr_len: 6,
            protocol_addr_len: 4,
            operation: ArpOp::Request,
            sender_hardware_addr: Cow::Owned(vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            sender_protocol_addr: Cow::Owned(vec![10, 0, 0, 5]),
            target_hardware_addr: Cow::Owned(vec![0; 6]),
            target_protocol_addr: Cow::Owned(target.octets().to_vec()),
        }
    }

    #[test]
    fn arp_packet_from_buffer() {
        let data = request_bytes();
        let packet = ArpPacket::from_buffer(&data).unwrap();
        assert_eq!(packet.hardware_type, 1);
        assert_eq!(packet.protocol_type, IPV4_ETHER_TYPE);
        assert_eq!(packet.hardware_addr_len, 6);
        assert_eq!(packet.protocol_addr_len, 4);
        assert_eq!(packet.operation, ArpOp::Request);
        assert_eq!(
            packet.sender_mac_addr(),
            Some(MacAddr::new([0xf2, 0x4e, 0x68, 0x82, 0xe2, 0x1b]))
        );
        assert_eq!(packet.sender_ipv4_addr(), Some(Ipv4Addr::new(192, 168, 38, 2)));
        assert_eq!(packet.target_mac_addr(), Some(MacAddr::BROADCAST));
        assert_eq!(packet.target_ipv4_addr(), Some(Ipv4Addr::new(192, 168, 38, 3)));
    }

    #[test]
    fn too_small_for_fixed_fields() {
        assert_eq!(
            ArpPacket::from_buffer(&[0, 1, 8, 0, 6, 4, 0]),
            Err(DecodeError::ArpTooShort { len: 7 })
        );
    }

    #[test]
    fn truncated_addresses() {
        let data = request_bytes();
        assert_eq!(
            ArpPacket::from_buffer(&data[..20]),
            Err(DecodeError::ArpLengthMismatch {
                expected: 28,
                len: 20
            })
        );
    }

    #[test]
    fn address_lengths_drive_the_layout() {
        // hlen 2, plen 1: 8 + 4 + 2 bytes, padding ignored
        let data = [0, 1, 8, 0, 2, 1, 0, 2, 0xa1, 0xa2, 7, 0xb1, 0xb2, 9, 0, 0];
        let packet = ArpPacket::from_buffer(&data).unwrap();
        assert_eq!(packet.operation, ArpOp::Reply);
        assert_eq!(packet.sender_hardware_addr.as_ref(), &[0xa1, 0xa2]);
        assert_eq!(packet.sender_protocol_addr.as_ref(), &[7]);
        assert_eq!(packet.target_hardware_addr.as_ref(), &[0xb1, 0xb2]);
        assert_eq!(packet.target_protocol_addr.as_ref(), &[9]);
        assert_eq!(packet.sender_mac_addr(), None);
        assert_eq!(packet.encode(), &data[..14]);
    }

    #[test]
    fn encode_decode() {
        let data = request_bytes();
        let packet = ArpPacket::from_buffer(&data).unwrap();
        let encoded = packet.encode();
        assert_eq!(encoded, data);
        assert_eq!(ArpPacket::from_buffer(&encoded).unwrap(), packet);
    }

    #[test]
    fn encode_decode_random_packets() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let mut addrs = vec![0; 20];
            rng.fill(&mut addrs[..]);
            let packet = ArpPacket {
                hardware_type: rng.gen(),
                protocol_type: rng.gen(),
                hardware_addr_len: 6,
                protocol_addr_len: 4,
                operation: ArpOp::from(rng.gen::<u16>()),
                sender_hardware_addr: Cow::Borrowed(&addrs[0..6]),
                sender_protocol_addr: Cow::Borrowed(&addrs[6..10]),
                target_hardware_addr: Cow::Borrowed(&addrs[10..16]),
                target_protocol_addr: Cow::Borrowed(&addrs[16..20]),
            };

            let encoded = packet.encode();
            assert_eq!(encoded.len(), 28);
            assert_eq!(ArpPacket::from_buffer(&encoded).unwrap(), packet);
        }
    }

    #[test]
    fn encode_keeps_low_bytes_of_mapped_address() {
        let mut packet = request_for(OUR_IP);
        packet.sender_protocol_addr =
            Cow::Owned(Ipv4Addr::new(10, 0, 0, 5).to_ipv6_mapped().octets().to_vec());
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 28);
        let decoded = ArpPacket::from_buffer(&encoded).unwrap();
        assert_eq!(decoded.sender_ipv4_addr(), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn reply_to_request_for_us() {
        let request = request_for(OUR_IP);
        let reply = request.build_reply(OUR_MAC, OUR_IP).unwrap();
        assert_eq!(reply.operation, ArpOp::Reply);
        assert_eq!(reply.hardware_type, request.hardware_type);
        assert_eq!(reply.protocol_type, request.protocol_type);
        assert_eq!(reply.sender_mac_addr(), Some(OUR_MAC));
        assert_eq!(reply.sender_ipv4_addr(), Some(OUR_IP));
        assert_eq!(reply.target_hardware_addr, request.sender_hardware_addr);
        assert_eq!(reply.target_protocol_addr, request.sender_protocol_addr);
    }

    #[test]
    fn no_reply_for_other_address() {
        let request = request_for(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(
            request.build_reply(OUR_MAC, OUR_IP),
            Err(ArpReplyError::NotForUs {
                target: vec![10, 0, 0, 9]
            })
        );
    }

    #[test]
    fn no_reply_to_reply() {
        let mut packet = request_for(OUR_IP);
        packet.operation = ArpOp::Reply;
        assert_eq!(
            packet.build_reply(OUR_MAC, OUR_IP),
            Err(ArpReplyError::NotARequest { opcode: 2 })
        );
    }

    #[test]
    fn no_reply_for_foreign_hardware() {
        let mut packet = request_for(OUR_IP);
        packet.hardware_addr_len = 8;
        packet.sender_hardware_addr = Cow::Owned(vec![1; 8]);
        assert_eq!(
            packet.build_reply(OUR_MAC, OUR_IP),
            Err(ArpReplyError::UnsupportedAddressFormat {
                hardware_len: 8,
                protocol_len: 4
            })
        );
    }
}
