//! XBee API frame codec (API mode 1, unescaped).
//!
//! ```text
//! +------+--------+--------+------------------+----------+
//! | 0x7E | len hi | len lo | frame data (len) | checksum |
//! +------+--------+--------+------------------+----------+
//! ```
//!
//! The checksum is `0xFF - (sum of frame data bytes & 0xFF)`. The first byte
//! of the frame data is the frame type.

use std::fmt;

/// Start delimiter of every API frame.
pub const START_DELIMITER: u8 = 0x7E;

/// Largest frame data length the decoder accepts.
pub const MAX_FRAME_DATA: usize = 256;

pub const FRAME_AT_COMMAND: u8 = 0x08;
pub const FRAME_TRANSMIT_REQUEST: u8 = 0x10;
pub const FRAME_AT_RESPONSE: u8 = 0x88;
pub const FRAME_MODEM_STATUS: u8 = 0x8A;
pub const FRAME_TRANSMIT_STATUS: u8 = 0x8B;
pub const FRAME_RECEIVE_PACKET: u8 = 0x90;

/// 16-bit address used when the destination's network address is unknown.
pub const UNKNOWN_NETWORK_ADDRESS: [u8; 2] = [0xFF, 0xFE];

/// Receive option bit set when the packet was broadcast.
pub const RX_OPTION_BROADCAST: u8 = 0x02;

/// A decoded API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// Local AT command (0x08).
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    /// ZigBee transmit request (0x10).
    TransmitRequest {
        frame_id: u8,
        dest64: [u8; 8],
        dest16: [u8; 2],
        radius: u8,
        options: u8,
        data: Vec<u8>,
    },
    /// Local AT command response (0x88).
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: u8,
        data: Vec<u8>,
    },
    /// Modem status (0x8A).
    ModemStatus(u8),
    /// ZigBee transmit status (0x8B).
    TransmitStatus {
        frame_id: u8,
        dest16: [u8; 2],
        retries: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    /// ZigBee receive packet (0x90).
    ReceivePacket {
        source64: [u8; 8],
        source16: [u8; 2],
        options: u8,
        data: Vec<u8>,
    },
    /// Any other frame type, kept raw.
    Other { frame_type: u8, data: Vec<u8> },
}

impl ApiFrame {
    pub fn frame_type(&self) -> u8 {
        match self {
            Self::AtCommand { .. } => FRAME_AT_COMMAND,
            Self::TransmitRequest { .. } => FRAME_TRANSMIT_REQUEST,
            Self::AtResponse { .. } => FRAME_AT_RESPONSE,
            Self::ModemStatus(_) => FRAME_MODEM_STATUS,
            Self::TransmitStatus { .. } => FRAME_TRANSMIT_STATUS,
            Self::ReceivePacket { .. } => FRAME_RECEIVE_PACKET,
            Self::Other { frame_type, .. } => *frame_type,
        }
    }

    /// Frame ID for frames that carry one.
    pub fn frame_id(&self) -> Option<u8> {
        match self {
            Self::AtCommand { frame_id, .. }
            | Self::TransmitRequest { frame_id, .. }
            | Self::AtResponse { frame_id, .. }
            | Self::TransmitStatus { frame_id, .. } => Some(*frame_id),
            _ => None,
        }
    }

    /// Frame data (type byte included), without delimiter, length or checksum.
    pub fn frame_data(&self) -> Vec<u8> {
        let mut out = vec![self.frame_type()];
        match self {
            Self::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(command);
                out.extend_from_slice(parameter);
            }
            Self::TransmitRequest {
                frame_id,
                dest64,
                dest16,
                radius,
                options,
                data,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(dest64);
                out.extend_from_slice(dest16);
                out.push(*radius);
                out.push(*options);
                out.extend_from_slice(data);
            }
            Self::AtResponse {
                frame_id,
                command,
                status,
                data,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(command);
                out.push(*status);
                out.extend_from_slice(data);
            }
            Self::ModemStatus(status) => out.push(*status),
            Self::TransmitStatus {
                frame_id,
                dest16,
                retries,
                delivery_status,
                discovery_status,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(dest16);
                out.push(*retries);
                out.push(*delivery_status);
                out.push(*discovery_status);
            }
            Self::ReceivePacket {
                source64,
                source16,
                options,
                data,
            } => {
                out.extend_from_slice(source64);
                out.extend_from_slice(source16);
                out.push(*options);
                out.extend_from_slice(data);
            }
            Self::Other { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    /// Full wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let data = self.frame_data();
        let mut out = Vec::with_capacity(data.len() + 4);
        out.push(START_DELIMITER);
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(&data);
        out.push(checksum(&data));
        out
    }

    /// Parse frame data (type byte first).
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let (&frame_type, body) = data.split_first().ok_or(FrameError::Empty)?;
        let short = || FrameError::TooShort { frame_type };

        let frame = match frame_type {
            FRAME_AT_COMMAND => {
                if body.len() < 3 {
                    return Err(short());
                }
                Self::AtCommand {
                    frame_id: body[0],
                    command: [body[1], body[2]],
                    parameter: body[3..].to_vec(),
                }
            }
            FRAME_TRANSMIT_REQUEST => {
                if body.len() < 13 {
                    return Err(short());
                }
                Self::TransmitRequest {
                    frame_id: body[0],
                    dest64: array8(&body[1..9]),
                    dest16: [body[9], body[10]],
                    radius: body[11],
                    options: body[12],
                    data: body[13..].to_vec(),
                }
            }
            FRAME_AT_RESPONSE => {
                if body.len() < 4 {
                    return Err(short());
                }
                Self::AtResponse {
                    frame_id: body[0],
                    command: [body[1], body[2]],
                    status: body[3],
                    data: body[4..].to_vec(),
                }
            }
            FRAME_MODEM_STATUS => Self::ModemStatus(*body.first().ok_or_else(short)?),
            FRAME_TRANSMIT_STATUS => {
                if body.len() < 6 {
                    return Err(short());
                }
                Self::TransmitStatus {
                    frame_id: body[0],
                    dest16: [body[1], body[2]],
                    retries: body[3],
                    delivery_status: body[4],
                    discovery_status: body[5],
                }
            }
            FRAME_RECEIVE_PACKET => {
                if body.len() < 11 {
                    return Err(short());
                }
                Self::ReceivePacket {
                    source64: array8(&body[0..8]),
                    source16: [body[8], body[9]],
                    options: body[10],
                    data: body[11..].to_vec(),
                }
            }
            other => Self::Other {
                frame_type: other,
                data: body.to_vec(),
            },
        };
        Ok(frame)
    }
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

/// API frame checksum over the frame data.
pub fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Incremental decoder for the serial byte stream.
///
/// Bytes before a start delimiter are discarded. A frame with a bad checksum
/// is consumed and reported once, so one corrupt frame never blocks the ones
/// behind it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<ApiFrame>, FrameError> {
        match self.buf.iter().position(|&b| b == START_DELIMITER) {
            Some(0) => {}
            Some(start) => {
                log::trace!("Discarding {} bytes before start delimiter", start);
                self.buf.drain(..start);
            }
            None => {
                self.buf.clear();
                return Ok(None);
            }
        }

        if self.buf.len() < 3 {
            return Ok(None);
        }
        let len = usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]));
        if len == 0 || len > MAX_FRAME_DATA {
            // Not a real delimiter; resync on the next one.
            self.buf.drain(..1);
            return Err(FrameError::BadLength(len));
        }
        let total = 3 + len + 1;
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..total).collect();
        let data = &frame[3..3 + len];
        let expected = checksum(data);
        let actual = frame[3 + len];
        if expected != actual {
            return Err(FrameError::Checksum { expected, actual });
        }
        ApiFrame::parse(data).map(Some)
    }
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame data had no type byte.
    Empty,
    /// Length field is zero or larger than [`MAX_FRAME_DATA`].
    BadLength(usize),
    /// Checksum byte does not match the frame data.
    Checksum { expected: u8, actual: u8 },
    /// Frame data shorter than its type requires.
    TooShort { frame_type: u8 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::BadLength(len) => write!(f, "bad frame length {}", len),
            Self::Checksum { expected, actual } => write!(
                f,
                "checksum mismatch (expected 0x{:02X}, got 0x{:02X})",
                expected, actual
            ),
            Self::TooShort { frame_type } => {
                write!(f, "frame 0x{:02X} too short", frame_type)
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_command_wire_format() {
        // "AI" query with frame ID 1, as in the module's reference manual.
        let frame = ApiFrame::AtCommand {
            frame_id: 0x01,
            command: *b"AI",
            parameter: vec![],
        };
        assert_eq!(
            frame.encode(),
            vec![0x7E, 0x00, 0x04, 0x08, 0x01, 0x41, 0x49, 0x6C]
        );
    }

    #[test]
    fn test_decoder_handles_split_and_garbage() {
        let frame = ApiFrame::ModemStatus(0x02);
        let wire = frame.encode();
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x00, 0x13]);
        decoder.push(&wire[..2]);
        assert_eq!(decoder.next_frame(), Ok(None));
        decoder.push(&wire[2..]);
        assert_eq!(decoder.next_frame(), Ok(Some(frame)));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_bad_checksum_consumes_frame() {
        let mut wire = ApiFrame::ModemStatus(0x06).encode();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let good = ApiFrame::ModemStatus(0x02);

        let mut decoder = FrameDecoder::new();
        decoder.push(&wire);
        decoder.push(&good.encode());
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::Checksum { .. })
        ));
        assert_eq!(decoder.next_frame(), Ok(Some(good)));
    }

    #[test]
    fn test_receive_packet_parse() {
        let mut data = vec![FRAME_RECEIVE_PACKET];
        data.extend_from_slice(&[0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]);
        data.extend_from_slice(&[0x12, 0x34, 0x01]);
        data.extend_from_slice(b"rf");
        let frame = ApiFrame::parse(&data).unwrap();
        assert_eq!(
            frame,
            ApiFrame::ReceivePacket {
                source64: [0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A],
                source16: [0x12, 0x34],
                options: 0x01,
                data: b"rf".to_vec(),
            }
        );
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert_eq!(
            ApiFrame::parse(&[FRAME_TRANSMIT_STATUS, 0x01, 0xFF]),
            Err(FrameError::TooShort {
                frame_type: FRAME_TRANSMIT_STATUS
            })
        );
        assert_eq!(ApiFrame::parse(&[]), Err(FrameError::Empty));
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use xbee_sensor_node_macros::tap_test;

    #[tap_test]
    fn decoder_reads_back_encoded_frame() {
        let frame = ApiFrame::AtCommand {
            frame_id: 3,
            command: *b"AI",
            parameter: Vec::new(),
        };
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame.encode());
        assert_eq!(decoder.next_frame(), Ok(Some(frame)));
        assert_eq!(decoder.buffered(), 0);
    }
}
