//! Packet envelope and application header codec.
//!
//! The radio carries an application header in front of the user payload so
//! the coordinator can route the data to the right handler and identify the
//! sender independently of the link-layer source address.
//!
//! # Application Header
//!
//! ```text
//! [packet ID: 1][fragment number: 1]['#': 1][source type: 1][source: N][payload]
//! ```
//!
//! | Source type | Value | Source field |
//! |-------------|-------|--------------|
//! | MY (16-bit network address) | 0 | 2 bytes, big-endian |
//! | MAC (64-bit hardware address) | 1 | 8 bytes, big-endian |
//! | NI (node identifier) | 2 | ASCII, terminated by `#` |
//!
//! Packets are never fragmented: the fragment number is always 1 and the
//! `#` marker flags it as the first (and only) fragment. The payload is
//! bounded so header plus payload fit in one radio frame.

use std::fmt;

/// Maximum RF data carried by one radio frame (no encryption, no source routing).
pub const MAX_RF_DATA: usize = 84;

/// Fixed part of the application header: ID, fragment number, marker, source type.
pub const HEADER_FIXED_LEN: usize = 4;

/// Fragment number stamped on every (unfragmented) packet.
const SINGLE_FRAGMENT: u8 = 0x01;

/// First-fragment marker.
const FIRST_FRAGMENT_MARKER: u8 = b'#';

/// Terminator of a node identifier source field.
const NODE_ID_TERMINATOR: u8 = b'#';

/// Maximum node identifier length accepted by the radio.
pub const MAX_NODE_ID_LEN: usize = 20;

/// Transmission mode of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmitMode {
    /// Addressed to a single destination.
    #[default]
    Unicast,
    /// Sent to every node in range.
    Broadcast,
}

/// Link-layer destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// 64-bit hardware address.
    Long([u8; 8]),
    /// 16-bit network address.
    Short([u8; 2]),
}

impl Address {
    /// 64-bit broadcast address.
    pub const BROADCAST: Address = Address::Long([0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);

    /// Parse a 16-hex-digit long address or a 4-hex-digit short address.
    pub fn from_hex(s: &str) -> Result<Self, PacketError> {
        let bytes = decode_hex(s).ok_or(PacketError::InvalidAddress)?;
        match bytes.len() {
            8 => {
                let mut long = [0u8; 8];
                long.copy_from_slice(&bytes);
                Ok(Self::Long(long))
            }
            2 => Ok(Self::Short([bytes[0], bytes[1]])),
            _ => Err(PacketError::InvalidAddress),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: &[u8] = match self {
            Self::Long(b) => b,
            Self::Short(b) => b,
        };
        f.write_str(&encode_hex(bytes))
    }
}

/// Upper-case hex without separators, as addresses and PAN IDs are written.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Kind of source identification carried in the application header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginType {
    /// 16-bit network address.
    My,
    /// 64-bit hardware address.
    Mac,
    /// Node identifier string.
    NodeId,
}

impl OriginType {
    /// Wire value of the source type field.
    pub fn wire_value(self) -> u8 {
        match self {
            Self::My => 0,
            Self::Mac => 1,
            Self::NodeId => 2,
        }
    }

    fn from_wire(value: u8) -> Result<Self, PacketError> {
        match value {
            0 => Ok(Self::My),
            1 => Ok(Self::Mac),
            2 => Ok(Self::NodeId),
            other => Err(PacketError::UnknownSourceType(other)),
        }
    }
}

/// Source identification of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// 16-bit network address.
    My([u8; 2]),
    /// 64-bit hardware address.
    Mac([u8; 8]),
    /// Node identifier (ASCII, at most [`MAX_NODE_ID_LEN`] bytes, no `#`).
    NodeId(String),
}

impl Origin {
    /// The source type stamped into the header.
    pub fn origin_type(&self) -> OriginType {
        match self {
            Self::My(_) => OriginType::My,
            Self::Mac(_) => OriginType::Mac,
            Self::NodeId(_) => OriginType::NodeId,
        }
    }

    /// Length of the source field on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::My(_) => 2,
            Self::Mac(_) => 8,
            Self::NodeId(id) => id.len() + 1,
        }
    }

    /// The origin expressed as a link-layer address, when it is one.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::My(b) => Some(Address::Short(*b)),
            Self::Mac(b) => Some(Address::Long(*b)),
            Self::NodeId(_) => None,
        }
    }

    /// Check the origin fits the header (node identifier length and characters).
    pub fn validate(&self) -> Result<(), PacketError> {
        if let Self::NodeId(id) = self {
            if id.is_empty() || id.len() > MAX_NODE_ID_LEN {
                return Err(PacketError::InvalidNodeId);
            }
            if !id.is_ascii() || id.as_bytes().contains(&NODE_ID_TERMINATOR) {
                return Err(PacketError::InvalidNodeId);
            }
        }
        Ok(())
    }
}

impl From<Address> for Origin {
    fn from(addr: Address) -> Self {
        match addr {
            Address::Long(b) => Self::Mac(b),
            Address::Short(b) => Self::My(b),
        }
    }
}

/// A packet travelling between the node and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Transmission mode.
    pub mode: TransmitMode,
    /// Who sent the packet.
    pub origin: Origin,
    /// Link-layer destination.
    pub destination: Address,
    /// Application ID, selects the handler on the receiving side.
    pub packet_id: u8,
    /// User payload.
    pub payload: Vec<u8>,
    /// Hop count (0 lets the mesh use its maximum radius).
    pub hops: u8,
}

impl Packet {
    /// Build a unicast packet with zero hop count.
    ///
    /// Fails if the origin is invalid or the payload does not fit one frame.
    pub fn unicast(
        origin: Origin,
        destination: Address,
        packet_id: u8,
        payload: &[u8],
    ) -> Result<Self, PacketError> {
        origin.validate()?;
        let max = max_payload_for(&origin);
        if payload.len() > max {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        Ok(Self {
            mode: TransmitMode::Unicast,
            origin,
            destination,
            packet_id,
            payload: payload.to_vec(),
            hops: 0,
        })
    }

    /// Serialize header and payload into the RF data field.
    pub fn encode_rf_data(&self) -> Result<Vec<u8>, PacketError> {
        self.origin.validate()?;
        let total = HEADER_FIXED_LEN + self.origin.wire_len() + self.payload.len();
        if total > MAX_RF_DATA {
            return Err(PacketError::PayloadTooLarge {
                size: self.payload.len(),
                max: max_payload_for(&self.origin),
            });
        }

        let mut data = Vec::with_capacity(total);
        data.push(self.packet_id);
        data.push(SINGLE_FRAGMENT);
        data.push(FIRST_FRAGMENT_MARKER);
        data.push(self.origin.origin_type().wire_value());
        match &self.origin {
            Origin::My(b) => data.extend_from_slice(b),
            Origin::Mac(b) => data.extend_from_slice(b),
            Origin::NodeId(id) => {
                data.extend_from_slice(id.as_bytes());
                data.push(NODE_ID_TERMINATOR);
            }
        }
        data.extend_from_slice(&self.payload);
        Ok(data)
    }

    /// Parse the RF data field of a received frame.
    ///
    /// `destination` and `hops` come from the link layer.
    pub fn decode_rf_data(data: &[u8], destination: Address, hops: u8) -> Result<Self, PacketError> {
        if data.len() < HEADER_FIXED_LEN {
            return Err(PacketError::TooShort);
        }
        if data.len() > MAX_RF_DATA {
            return Err(PacketError::PayloadTooLarge {
                size: data.len(),
                max: MAX_RF_DATA,
            });
        }
        let packet_id = data[0];
        if data[1] != SINGLE_FRAGMENT || data[2] != FIRST_FRAGMENT_MARKER {
            return Err(PacketError::Fragmented);
        }
        let source_type = OriginType::from_wire(data[3])?;
        let rest = &data[HEADER_FIXED_LEN..];

        let (origin, payload) = match source_type {
            OriginType::My => {
                if rest.len() < 2 {
                    return Err(PacketError::TooShort);
                }
                (Origin::My([rest[0], rest[1]]), &rest[2..])
            }
            OriginType::Mac => {
                if rest.len() < 8 {
                    return Err(PacketError::TooShort);
                }
                let mut mac = [0u8; 8];
                mac.copy_from_slice(&rest[..8]);
                (Origin::Mac(mac), &rest[8..])
            }
            OriginType::NodeId => {
                let end = rest
                    .iter()
                    .position(|&b| b == NODE_ID_TERMINATOR)
                    .ok_or(PacketError::InvalidNodeId)?;
                let id = std::str::from_utf8(&rest[..end])
                    .map_err(|_| PacketError::InvalidNodeId)?
                    .to_string();
                let origin = Origin::NodeId(id);
                origin.validate()?;
                (origin, &rest[end + 1..])
            }
        };

        let mode = if destination == Address::BROADCAST {
            TransmitMode::Broadcast
        } else {
            TransmitMode::Unicast
        };

        Ok(Self {
            mode,
            origin,
            destination,
            packet_id,
            payload: payload.to_vec(),
            hops,
        })
    }
}

/// Largest payload that fits one frame for the given origin.
pub fn max_payload_for(origin: &Origin) -> usize {
    MAX_RF_DATA.saturating_sub(HEADER_FIXED_LEN + origin.wire_len())
}

/// Packet construction and parsing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Payload exceeds what fits in one frame.
    PayloadTooLarge { size: usize, max: usize },
    /// Data ends before the header is complete.
    TooShort,
    /// Fragment number or marker indicate a fragmented packet.
    Fragmented,
    /// Source type byte is not MY, MAC or NI.
    UnknownSourceType(u8),
    /// Node identifier is empty, too long, non-ASCII or unterminated.
    InvalidNodeId,
    /// Address string is not 4 or 16 hex digits.
    InvalidAddress,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {} bytes (max {})", size, max)
            }
            Self::TooShort => write!(f, "packet too short"),
            Self::Fragmented => write!(f, "fragmented packets are not supported"),
            Self::UnknownSourceType(t) => write!(f, "unknown source type {}", t),
            Self::InvalidNodeId => write!(f, "invalid node identifier"),
            Self::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for PacketError {}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: Address = Address::Long([0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]);

    #[test]
    fn test_header_layout_with_short_origin() {
        let packet = Packet::unicast(Origin::My([0x12, 0x34]), GATEWAY, 7, b"X").unwrap();
        let data = packet.encode_rf_data().unwrap();
        assert_eq!(data, vec![7, 0x01, b'#', 0, 0x12, 0x34, b'X']);
    }

    #[test]
    fn test_header_layout_with_node_id() {
        let origin = Origin::NodeId("node_A".to_string());
        let packet = Packet::unicast(origin, GATEWAY, 3, &[0xAA]).unwrap();
        let data = packet.encode_rf_data().unwrap();
        assert_eq!(&data[..4], &[3, 0x01, b'#', 2]);
        assert_eq!(&data[4..11], b"node_A#");
        assert_eq!(data[11], 0xAA);
    }

    #[test]
    fn test_decode_mac_origin() {
        let data = [9, 0x01, b'#', 1, 1, 2, 3, 4, 5, 6, 7, 8, b'h', b'i'];
        let packet = Packet::decode_rf_data(&data, GATEWAY, 2).unwrap();
        assert_eq!(packet.packet_id, 9);
        assert_eq!(packet.origin, Origin::Mac([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(packet.payload, b"hi");
        assert_eq!(packet.hops, 2);
        assert_eq!(packet.mode, TransmitMode::Unicast);
    }

    #[test]
    fn test_unicast_stamps_zero_hops() {
        let packet = Packet::unicast(Origin::My([0, 1]), GATEWAY, 1, b"").unwrap();
        assert_eq!(packet.hops, 0);
        assert_eq!(packet.mode, TransmitMode::Unicast);
    }

    #[test]
    fn test_payload_bound_depends_on_origin() {
        let origin = Origin::Mac([0; 8]);
        let max = max_payload_for(&origin);
        assert_eq!(max, MAX_RF_DATA - 12);
        assert!(Packet::unicast(origin.clone(), GATEWAY, 1, &vec![0; max]).is_ok());
        assert_eq!(
            Packet::unicast(origin, GATEWAY, 1, &vec![0; max + 1]),
            Err(PacketError::PayloadTooLarge {
                size: max + 1,
                max
            })
        );
    }

    #[test]
    fn test_decode_rejects_fragments_and_garbage() {
        assert_eq!(
            Packet::decode_rf_data(&[1, 2, b'#'], GATEWAY, 0),
            Err(PacketError::TooShort)
        );
        assert_eq!(
            Packet::decode_rf_data(&[1, 2, b'#', 0, 0, 0], GATEWAY, 0),
            Err(PacketError::Fragmented)
        );
        assert_eq!(
            Packet::decode_rf_data(&[1, 1, b'#', 5, 0, 0], GATEWAY, 0),
            Err(PacketError::UnknownSourceType(5))
        );
        assert_eq!(
            Packet::decode_rf_data(&[1, 1, b'#', 2, b'a', b'b'], GATEWAY, 0),
            Err(PacketError::InvalidNodeId)
        );
    }

    #[test]
    fn test_node_id_validation() {
        let too_long = Origin::NodeId("x".repeat(MAX_NODE_ID_LEN + 1));
        assert_eq!(
            Packet::unicast(too_long, GATEWAY, 1, b""),
            Err(PacketError::InvalidNodeId)
        );
        let with_marker = Origin::NodeId("a#b".to_string());
        assert_eq!(
            Packet::unicast(with_marker, GATEWAY, 1, b""),
            Err(PacketError::InvalidNodeId)
        );
    }

    #[test]
    fn test_address_hex_parsing() {
        assert_eq!(Address::from_hex("0013A2004069737A").unwrap(), GATEWAY);
        assert_eq!(
            Address::from_hex("FFFE").unwrap(),
            Address::Short([0xFF, 0xFE])
        );
        assert!(Address::from_hex("123").is_err());
        assert!(Address::from_hex("zz").is_err());
        assert_eq!(encode_hex(&[0x00, 0x13, 0xA2]), "0013A2");
        assert_eq!(Address::from_hex(&encode_hex(&[0xFF, 0xFE])).unwrap().to_string(), "FFFE");
        assert_eq!(GATEWAY.to_string(), "0013A2004069737A");
    }

    #[test]
    fn test_broadcast_destination_sets_mode() {
        let data = [1, 0x01, b'#', 0, 0, 1];
        let packet = Packet::decode_rf_data(&data, Address::BROADCAST, 0).unwrap();
        assert_eq!(packet.mode, TransmitMode::Broadcast);
    }
}
