use std::error::Error;
use std::fmt;

/// Reasons a byte buffer could not be decoded into a packet structure.
///
/// Every variant is recoverable: the frame is dropped and the next one is read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the 14 byte Ethernet II header.
    FrameTooShort { len: usize },
    /// An 802.1Q tag was announced but the frame ends before the inner EtherType.
    VlanTruncated { len: usize },
    /// Fewer than the 8 bytes of fixed ARP fields.
    ArpTooShort { len: usize },
    /// The address lengths announce more bytes than the payload holds.
    ArpLengthMismatch { expected: usize, len: usize },
    Ipv4TooShort { len: usize },
    Ipv4Version { version: u8 },
    /// IHL below the minimum of 5 words.
    Ipv4HeaderLength { ihl: u8 },
    Ipv4HeaderTruncated { header_len: usize, len: usize },
    Ipv4TotalLength { total_len: usize, header_len: usize, len: usize },
    IcmpTooShort { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::FrameTooShort { len } => write!(
                f,
                "frame too short: need at least 14 bytes, got {}",
                len
            ),
            DecodeError::VlanTruncated { len } => write!(
                f,
                "VLAN tagged frame truncated: need at least 18 bytes, got {}",
                len
            ),
            DecodeError::ArpTooShort { len } => write!(
                f,
                "ARP packet too small: need at least 8 bytes, got {}",
                len
            ),
            DecodeError::ArpLengthMismatch { expected, len } => write!(
                f,
                "ARP packet invalid len: expected {} bytes, got {}",
                expected, len
            ),
            DecodeError::Ipv4TooShort { len } => write!(
                f,
                "IPv4 packet too short: {} bytes (minimum 20)",
                len
            ),
            DecodeError::Ipv4Version { version } => write!(f, "not IPv4: version={}", version),
            DecodeError::Ipv4HeaderLength { ihl } => write!(f, "invalid IHL: {} (too small)", ihl),
            DecodeError::Ipv4HeaderTruncated { header_len, len } => write!(
                f,
                "IHL indicates {} bytes but packet is only {} bytes",
                header_len, len
            ),
            DecodeError::Ipv4TotalLength {
                total_len,
                header_len,
                len,
            } => write!(
                f,
                "invalid total length {}: header is {} bytes, packet is {} bytes",
                total_len, header_len, len
            ),
            DecodeError::IcmpTooShort { len } => write!(
                f,
                "ICMP packet too short: need at least 8 bytes, got {}",
                len
            ),
        }
    }
}

impl Error for DecodeError {}

/// Reasons an ARP packet does not warrant a reply from us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArpReplyError {
    /// Only requests are answered.
    NotARequest { opcode: u16 },
    /// The request asks for a protocol address other than ours.
    NotForUs { target: Vec<u8> },
    /// Anything but Ethernet hardware addresses and IPv4 protocol addresses.
    UnsupportedAddressFormat { hardware_len: u8, protocol_len: u8 },
}

impl fmt::Display for ArpReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArpReplyError::NotARequest { opcode } => {
                write!(f, "only answer to ARP request, got opcode {}", opcode)
            }
            ArpReplyError::NotForUs { target } => {
                write!(f, "target address ")?;
                for (i, byte) in target.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", byte)?;
                }
                write!(f, " is not ours")
            }
            ArpReplyError::UnsupportedAddressFormat {
                hardware_len,
                protocol_len,
            } => write!(
                f,
                "unsupported address lengths: hardware {} protocol {}",
                hardware_len, protocol_len
            ),
        }
    }
}

impl Error for ArpReplyError {}
