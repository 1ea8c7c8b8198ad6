//! Message transport.
//!
//! - [`packet`]: packet envelope and application header codec
//! - [`dispatch`]: packet ID to handler table
//! - [`message`]: send, receive and error reports

pub mod dispatch;
pub mod message;
pub mod packet;

pub use dispatch::{DispatchError, DispatchTable, PacketHandler, PACKET_ID_COUNT};
pub use message::{
    ErrorCode, MessageTransport, ReceiveSummary, TransportError, RECEIVE_POLL_INTERVAL,
    RECEIVE_TIMEOUT,
};
pub use packet::{encode_hex, Address, Origin, OriginType, Packet, PacketError, TransmitMode};

/// Application packet IDs.
pub mod packet_ids {
    /// Sensor readings from the node to the gateway.
    pub const SENSOR_READING: u8 = 0x02;
    /// Node error report (payload: one error code byte).
    pub const ERROR_REPORT: u8 = 0x0C;
}
