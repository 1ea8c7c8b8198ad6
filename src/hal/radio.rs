//! Radio module collaborator.
//!
//! The mesh radio owns routing, association and its own configuration
//! memory. The node drives it through the operations below; each returns the
//! tri-state [`HwResult`].

use crate::status::HwResult;
use crate::transport::Packet;

/// Operations the node consumes from the mesh radio module.
pub trait Radio {
    /// Set the 64-bit PAN identifier.
    fn set_pan(&mut self, pan: &[u8; 8]) -> HwResult<()>;

    /// Set the bitmask of channels scanned while joining.
    fn set_scanning_channels(&mut self, mask: u16) -> HwResult<()>;

    /// Set the energy scan duration exponent.
    fn set_energy_scan_duration(&mut self, exponent: u8) -> HwResult<()>;

    /// Enable or disable coordinator verification on join.
    fn set_channel_verification(&mut self, enabled: bool) -> HwResult<()>;

    /// Set the human-readable node identifier.
    fn set_node_identifier(&mut self, id: &str) -> HwResult<()>;

    /// Commit the current settings to the module's non-volatile memory.
    fn write_config(&mut self) -> HwResult<()>;

    /// Switch the module supply on.
    fn power_on(&mut self) -> HwResult<()>;

    /// Switch the module supply off.
    fn power_off(&mut self) -> HwResult<()>;

    /// Bring a sleeping module back to its active state.
    fn wake(&mut self) -> HwResult<()>;

    /// Read the association indication code (0 = joined).
    fn association_indication(&mut self) -> HwResult<u8>;

    /// Read the operating 64-bit (extended) PAN identifier.
    fn extended_pan(&mut self) -> HwResult<[u8; 8]>;

    /// Read the operating 16-bit PAN identifier.
    fn operating_pan(&mut self) -> HwResult<u16>;

    /// Read the operating channel.
    fn channel(&mut self) -> HwResult<u8>;

    /// Submit a packet for transmission.
    fn send(&mut self, packet: &Packet) -> HwResult<()>;

    /// Whether inbound bytes are waiting to be processed.
    fn frame_available(&mut self) -> bool;

    /// Turn waiting inbound bytes into complete packets.
    fn reassemble_frames(&mut self) -> HwResult<()>;

    /// Number of complete packets waiting to be popped.
    fn pending_packet_count(&self) -> usize;

    /// Take the most recently completed packet.
    fn pop_packet(&mut self) -> Option<Packet>;
}
