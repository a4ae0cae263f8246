use crate::*;

pub const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// A decoded Ethernet II frame borrowing its payload from the receive buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthernetFrame<'a> {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub ether_type: EtherType,
    /// VLAN identifier of a single 802.1Q tag stripped while decoding.
    pub vlan_id: Option<u16>,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    pub fn from_buffer(frame: &'a [u8]) -> Result<EthernetFrame<'a>, DecodeError> {
        // 0                    6                    12                      14
        // |---6 byte Dest_MAC--|---6 byte Src_MAC---|--2 Byte EtherType---|
        // An 802.1Q tag inserts TPID(2) TCI(2) before the real EtherType.
        if frame.len() < ETHERNET_HEADER_LEN {
            return Err(DecodeError::FrameTooShort { len: frame.len() });
        }

        let destination = read_mac(frame, 0);
        let source = read_mac(frame, 6);

        let mut type_offset = 12;
        let mut vlan_id = None;
        if read_u16(frame, type_offset) == VLAN_ETHER_TYPE {
            if frame.len() < ETHERNET_HEADER_LEN + VLAN_TAG_LEN {
                return Err(DecodeError::VlanTruncated { len: frame.len() });
            }
            vlan_id = Some(read_u16(frame, 14) & 0x0FFF);
            type_offset += VLAN_TAG_LEN;
        }

        Ok(EthernetFrame {
            destination,
            source,
            ether_type: EtherType::from(read_u16(frame, type_offset)),
            vlan_id,
            payload: &frame[type_offset + 2..],
        })
    }

    /// Builds an untagged frame. VLAN tags are never written back.
    pub fn encode(
        destination: MacAddr,
        source: MacAddr,
        ether_type: EtherType,
        payload: &[u8],
    ) -> PacketData {
        let mut data = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
        data.extend_from_slice(&destination.bytes);
        data.extend_from_slice(&source.bytes);
        data.extend_from_slice(&u16::from(ether_type).to_be_bytes());
        data.extend_from_slice(payload);
        data
    }

    pub fn to_bytes(&self) -> PacketData {
        EthernetFrame::encode(self.destination, self.source, self.ether_type, self.payload)
    }
}

fn read_mac(data: &[u8], offset: usize) -> MacAddr {
    let mut bytes = [0; 6];
    bytes.copy_from_slice(&data[offset..offset + 6]);
    MacAddr::new(bytes)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}
