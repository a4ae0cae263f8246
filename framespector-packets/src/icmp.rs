use crate::*;

pub const ICMP_HEADER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpType {
    EchoReply,
    EchoRequest,
    Other(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            8 => IcmpType::EchoRequest,
            other => IcmpType::Other(other),
        }
    }
}

impl From<IcmpType> for u8 {
    fn from(icmp_type: IcmpType) -> Self {
        match icmp_type {
            IcmpType::EchoReply => 0,
            IcmpType::EchoRequest => 8,
            IcmpType::Other(other) => other,
        }
    }
}

/// ICMP echo message, RFC 792.
///
/// Type(1) Code(1) Checksum(2) Identifier(2) Sequence(2) Data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpPacket<'a> {
    pub icmp_type: IcmpType,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence_number: u16,
    pub data: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    /// Decodes the ICMP message carried by `packet`. The checksum is not verified.
    pub fn from_ipv4(packet: &Ipv4Packet<'a>) -> Result<IcmpPacket<'a>, DecodeError> {
        IcmpPacket::from_buffer(packet.payload)
    }

    pub fn from_buffer(payload: &'a [u8]) -> Result<IcmpPacket<'a>, DecodeError> {
        if payload.len() < ICMP_HEADER_LEN {
            return Err(DecodeError::IcmpTooShort { len: payload.len() });
        }

        Ok(IcmpPacket {
            icmp_type: IcmpType::from(payload[0]),
            code: payload[1],
            checksum: u16::from_be_bytes([payload[2], payload[3]]),
            identifier: u16::from_be_bytes([payload[4], payload[5]]),
            sequence_number: u16::from_be_bytes([payload[6], payload[7]]),
            data: &payload[ICMP_HEADER_LEN..],
        })
    }

    /// The echo reply answering this message: identifier, sequence number and data are kept.
    pub fn echo_reply(&self) -> IcmpPacket<'a> {
        IcmpPacket {
            icmp_type: IcmpType::EchoReply,
            code: 0,
            checksum: 0,
            identifier: self.identifier,
            sequence_number: self.sequence_number,
            data: self.data,
        }
    }

    /// Encodes the message. The checksum field is zeroed, the checksum computed over the whole
    /// message and then patched in; the stored `checksum` value is ignored.
    pub fn encode(&self) -> PacketData {
        let mut data = Vec::with_capacity(ICMP_HEADER_LEN + self.data.len());
        data.push(u8::from(self.icmp_type));
        data.push(self.code);
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&self.identifier.to_be_bytes());
        data.extend_from_slice(&self.sequence_number.to_be_bytes());
        data.extend_from_slice(self.data);

        let checksum = internet_checksum(&data);
        data[2..4].copy_from_slice(&checksum.to_be_bytes());
        data
    }
}

/// True when an encoded ICMP message carries a correct checksum.
pub fn verify_icmp_checksum(message: &[u8]) -> bool {
    message.len() >= ICMP_HEADER_LEN && internet_checksum(message) == 0
}
