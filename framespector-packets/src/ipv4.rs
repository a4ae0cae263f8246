use crate::*;
use std::net::Ipv4Addr;

pub const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV4_MAX_HEADER_LEN: usize = 60;

/// An IPv4 packet decoded from an Ethernet payload.
///
/// ```text
/// | Ver/IHL (1) | DSCP/ECN (1) | Total Length (2)              |
/// | Identification (2)         | Flags/Fragment Offset (2)     |
/// | TTL (1)     | Protocol (1) | Header Checksum (2)           |
/// | Source (4)                                                 |
/// | Destination (4)                                            |
/// | Options (0-40)                                             |
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Packet<'a> {
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub identification: u16,
    pub flags_frag_offset: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub options: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    /// Decodes the header at the start of `data`.
    ///
    /// The header checksum is read but deliberately not verified: frames with a bad checksum
    /// are still inspected and answered. Use [`validate_checksum`](Self::validate_checksum) to
    /// check it. The destination address is not filtered here either; relevance is for the
    /// caller to decide.
    pub fn from_buffer(data: &'a [u8]) -> Result<Ipv4Packet<'a>, DecodeError> {
        if data.len() < IPV4_MIN_HEADER_LEN {
            return Err(DecodeError::Ipv4TooShort { len: data.len() });
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(DecodeError::Ipv4Version { version });
        }

        // This is the header length in 32bit words
        let ihl = data[0] & 0x0F;
        let header_len = ihl as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(DecodeError::Ipv4HeaderLength { ihl });
        }
        if header_len > data.len() {
            return Err(DecodeError::Ipv4HeaderTruncated {
                header_len,
                len: data.len(),
            });
        }

        // Anything past the total length is link layer padding.
        let total_len = u16::from_be_bytes([data[2], data[3]]);
        if (total_len as usize) < header_len || total_len as usize > data.len() {
            return Err(DecodeError::Ipv4TotalLength {
                total_len: total_len as usize,
                header_len,
                len: data.len(),
            });
        }

        Ok(Ipv4Packet {
            version_ihl: data[0],
            dscp_ecn: data[1],
            total_len,
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags_frag_offset: u16::from_be_bytes([data[6], data[7]]),
            ttl: data[8],
            protocol: IpProtocol::from(data[9]),
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src_addr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dest_addr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            options: &data[IPV4_MIN_HEADER_LEN..header_len],
            payload: &data[header_len..total_len as usize],
        })
    }

    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0F
    }

    pub fn header_len(&self) -> usize {
        self.ihl() as usize * 4
    }

    pub fn dscp(&self) -> u8 {
        self.dscp_ecn >> 2
    }

    pub fn ecn(&self) -> u8 {
        self.dscp_ecn & 0x03
    }

    /// Returns tuple of (Don't Fragment, More Fragments)
    pub fn flags(&self) -> (bool, bool) {
        let df = self.flags_frag_offset & 0x4000 != 0;
        let mf = self.flags_frag_offset & 0x2000 != 0;
        (df, mf)
    }

    pub fn fragment_offset(&self) -> u16 {
        self.flags_frag_offset & 0x1FFF
    }

    /// Verifies the header checksum as it was received.
    pub fn validate_checksum(&self) -> bool {
        let header = self.write_header(self.version_ihl, self.total_len, self.checksum);
        internet_checksum(&header) == 0
    }

    /// Builds the header of a response travelling back to the sender: same header fields and
    /// options, source and destination swapped, carrying `payload`.
    ///
    /// The reply is never a fragment: More Fragments and the fragment offset are cleared,
    /// Don't Fragment is kept.
    pub fn reply<'b>(&self, payload: &'b [u8]) -> Ipv4Packet<'b>
    where
        'a: 'b,
    {
        Ipv4Packet {
            flags_frag_offset: self.flags_frag_offset & 0x4000,
            src_addr: self.dest_addr,
            dest_addr: self.src_addr,
            payload,
            ..self.clone()
        }
    }

    /// True for any fragment of a larger datagram, first one included.
    pub fn is_fragment(&self) -> bool {
        let (_, more_fragments) = self.flags();
        more_fragments || self.fragment_offset() != 0
    }

    /// Encodes header and payload.
    ///
    /// IHL, total length and header checksum are recomputed from the options and payload; the
    /// values stored in the struct are ignored. Options are zero padded to a 32bit boundary.
    pub fn encode(&self) -> PacketData {
        let options_len = (self.options.len() + 3) & !3;
        let header_len = (IPV4_MIN_HEADER_LEN + options_len).min(IPV4_MAX_HEADER_LEN);
        let version_ihl = (self.version_ihl & 0xF0) | (header_len / 4) as u8;
        let total_len = (header_len + self.payload.len()) as u16;

        let mut data = self.write_header(version_ihl, total_len, 0);
        let checksum = internet_checksum(&data);
        data[10..12].copy_from_slice(&checksum.to_be_bytes());

        data.extend_from_slice(self.payload);
        data
    }

    fn write_header(&self, version_ihl: u8, total_len: u16, checksum: u16) -> PacketData {
        let header_len = (version_ihl & 0x0F) as usize * 4;
        let mut header = Vec::with_capacity(header_len);
        header.push(version_ihl);
        header.push(self.dscp_ecn);
        header.extend_from_slice(&total_len.to_be_bytes());
        header.extend_from_slice(&self.identification.to_be_bytes());
        header.extend_from_slice(&self.flags_frag_offset.to_be_bytes());
        header.push(self.ttl);
        header.push(u8::from(self.protocol));
        header.extend_from_slice(&checksum.to_be_bytes());
        header.extend_from_slice(&self.src_addr.octets());
        header.extend_from_slice(&self.dest_addr.octets());
        let options_len = header_len.saturating_sub(IPV4_MIN_HEADER_LEN);
        let copied = options_len.min(self.options.len());
        header.extend_from_slice(&self.options[..copied]);
        header.resize(IPV4_MIN_HEADER_LEN.max(header_len), 0);
        header
    }
}
