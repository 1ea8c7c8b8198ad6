//! Sending and receiving application packets.
//!
//! Sends are single attempts: the transport stamps the header, submits the
//! packet once and reports the radio's verdict. Receiving polls the radio for
//! a bounded time, reassembles whatever arrived and drains every completed
//! packet through the dispatch table. Each packet is dropped as soon as its
//! handler returns.

use super::dispatch::{DispatchError, DispatchTable};
use super::packet::{Address, Origin, Packet, PacketError};
use super::packet_ids::ERROR_REPORT;
use crate::hal::{Radio, Timer};
use crate::status::HardwareError;
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;

/// Default time `receive` waits for inbound frames.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay between availability checks while receiving.
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Node error codes reported to the gateway with [`ERROR_REPORT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The node woke after its scheduled wake time and skipped one interval.
    SleepTimeExceeded = 0x01,
}

/// What a successful `receive` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveSummary {
    /// Packets handed to a handler.
    pub handled: usize,
}

/// Builds, sends and receives application packets.
#[derive(Debug)]
pub struct MessageTransport {
    origin: Origin,
    dispatch: DispatchTable,
    poll_interval: Duration,
}

impl MessageTransport {
    /// Transport stamping `origin` on outbound packets.
    pub fn new(origin: Origin, dispatch: DispatchTable) -> Self {
        Self {
            origin,
            dispatch,
            poll_interval: RECEIVE_POLL_INTERVAL,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn dispatch_table_mut(&mut self) -> &mut DispatchTable {
        &mut self.dispatch
    }

    /// Send `payload` to `destination` as a unicast packet with zero hops.
    ///
    /// Never retries. The packet is released on every path.
    pub fn send(
        &mut self,
        radio: &mut dyn Radio,
        destination: Address,
        packet_id: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let packet = Packet::unicast(self.origin.clone(), destination, packet_id, payload)?;
        match radio.send(&packet) {
            Ok(()) => {
                debug!(
                    "Sent packet {} ({} bytes) to {}",
                    packet_id,
                    payload.len(),
                    destination
                );
                Ok(())
            }
            Err(e) => {
                warn!("Sending packet {} to {} failed: {}", packet_id, destination, e);
                Err(TransportError::Hardware(e))
            }
        }
    }

    /// Report a node error to `destination`.
    pub fn send_error(
        &mut self,
        radio: &mut dyn Radio,
        destination: Address,
        code: ErrorCode,
    ) -> Result<(), TransportError> {
        info!("Reporting {:?} to {}", code, destination);
        self.send(radio, destination, ERROR_REPORT, &[code as u8])
    }

    /// Wait up to `timeout` for a complete inbound packet, then dispatch
    /// every pending packet. A partial frame at the deadline is `TimedOut`.
    ///
    /// A reassembly error is returned without draining. When a packet has no
    /// handler the remaining packets are still drained and the first
    /// dispatch error is returned.
    pub fn receive(
        &mut self,
        radio: &mut dyn Radio,
        timer: &mut dyn Timer,
        timeout: Duration,
    ) -> Result<ReceiveSummary, TransportError> {
        let timeout_ms = timeout.as_millis() as u64;
        let start = timer.now_ms();

        // A frame still arriving over the UART leaves nothing pending yet.
        loop {
            if radio.frame_available() {
                radio.reassemble_frames().map_err(|e| {
                    warn!("Frame reassembly failed: {}", e);
                    TransportError::Hardware(e)
                })?;
            }
            if radio.pending_packet_count() > 0 {
                break;
            }
            if timer.elapsed_ms(start) >= timeout_ms {
                debug!("Nothing received within {:?}", timeout);
                return Err(TransportError::TimedOut);
            }
            timer.delay_ms(self.poll_interval.as_millis() as u64);
        }

        let mut summary = ReceiveSummary::default();
        let mut first_error = None;
        while let Some(packet) = radio.pop_packet() {
            match self.dispatch.dispatch(&packet) {
                Ok(()) => summary.handled += 1,
                Err(e) => {
                    error!("Dropping packet from {:?}: {}", packet.origin, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(TransportError::Dispatch(e)),
            None => {
                debug!("Received {} packet(s)", summary.handled);
                Ok(summary)
            }
        }
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The packet could not be built.
    Packet(PacketError),
    /// The radio failed or did not execute the operation.
    Hardware(HardwareError),
    /// An inbound packet had no handler.
    Dispatch(DispatchError),
    /// Nothing arrived before the timeout.
    TimedOut,
}

impl From<PacketError> for TransportError {
    fn from(e: PacketError) -> Self {
        Self::Packet(e)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packet(e) => write!(f, "packet error: {}", e),
            Self::Hardware(e) => write!(f, "radio error: {}", e),
            Self::Dispatch(e) => write!(f, "dispatch error: {}", e),
            Self::TimedOut => write!(f, "receive timed out"),
        }
    }
}

impl std::error::Error for TransportError {}
