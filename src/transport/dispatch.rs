//! Packet ID to handler mapping.
//!
//! Packet IDs index a fixed-size table directly. An ID outside the table or
//! without a handler fails closed with a [`DispatchError`]; the packet is not
//! handed to anyone.

use super::packet::Packet;
use std::fmt;

/// Number of dispatchable packet IDs (`0..PACKET_ID_COUNT`).
pub const PACKET_ID_COUNT: usize = 32;

/// Receives packets of one ID.
pub trait PacketHandler {
    fn handle(&mut self, packet: &Packet);
}

impl<F> PacketHandler for F
where
    F: FnMut(&Packet),
{
    fn handle(&mut self, packet: &Packet) {
        self(packet)
    }
}

/// Fixed table of packet handlers indexed by packet ID.
pub struct DispatchTable {
    handlers: Vec<Option<Box<dyn PacketHandler>>>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("registered", &self.registered_ids())
            .finish()
    }
}

impl DispatchTable {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            handlers: (0..PACKET_ID_COUNT).map(|_| None).collect(),
        }
    }

    /// Register `handler` for `packet_id`, replacing any previous one.
    pub fn register(
        &mut self,
        packet_id: u8,
        handler: impl PacketHandler + 'static,
    ) -> Result<(), DispatchError> {
        let slot = self
            .handlers
            .get_mut(usize::from(packet_id))
            .ok_or(DispatchError::OutOfRange(packet_id))?;
        if slot.is_some() {
            log::debug!("Replacing handler for packet ID {}", packet_id);
        }
        *slot = Some(Box::new(handler));
        Ok(())
    }

    /// Remove the handler for `packet_id`.
    pub fn unregister(&mut self, packet_id: u8) -> bool {
        self.handlers
            .get_mut(usize::from(packet_id))
            .and_then(Option::take)
            .is_some()
    }

    pub fn is_registered(&self, packet_id: u8) -> bool {
        matches!(self.handlers.get(usize::from(packet_id)), Some(Some(_)))
    }

    /// IDs with a handler, ascending.
    pub fn registered_ids(&self) -> Vec<u8> {
        self.handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .map(|(id, _)| id as u8)
            .collect()
    }

    /// Check at configuration time that every `required` ID has a handler.
    pub fn validate(&self, required: &[u8]) -> Result<(), DispatchError> {
        for &id in required {
            if usize::from(id) >= PACKET_ID_COUNT {
                return Err(DispatchError::OutOfRange(id));
            }
            if !self.is_registered(id) {
                return Err(DispatchError::Unmapped(id));
            }
        }
        Ok(())
    }

    /// Hand `packet` to the handler registered for its ID.
    pub fn dispatch(&mut self, packet: &Packet) -> Result<(), DispatchError> {
        let id = packet.packet_id;
        let handler = self
            .handlers
            .get_mut(usize::from(id))
            .ok_or(DispatchError::OutOfRange(id))?
            .as_mut()
            .ok_or(DispatchError::Unmapped(id))?;
        handler.handle(packet);
        Ok(())
    }
}

/// Dispatch configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Packet ID beyond the table.
    OutOfRange(u8),
    /// No handler registered for the packet ID.
    Unmapped(u8),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(id) => write!(
                f,
                "packet ID {} outside dispatch table (0-{})",
                id,
                PACKET_ID_COUNT - 1
            ),
            Self::Unmapped(id) => write!(f, "no handler registered for packet ID {}", id),
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::packet::{Address, Origin};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn packet(id: u8) -> Packet {
        Packet::unicast(Origin::My([0, 1]), Address::BROADCAST, id, b"p").unwrap()
    }

    #[test]
    fn test_dispatch_reaches_registered_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut table = DispatchTable::new();
        table
            .register(7, move |p: &Packet| sink.borrow_mut().push(p.packet_id))
            .unwrap();

        table.dispatch(&packet(7)).unwrap();
        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn test_unmapped_and_out_of_range_fail_closed() {
        let mut table = DispatchTable::new();
        assert_eq!(table.dispatch(&packet(3)), Err(DispatchError::Unmapped(3)));
        assert_eq!(
            table.dispatch(&packet(200)),
            Err(DispatchError::OutOfRange(200))
        );
        assert_eq!(
            table.register(PACKET_ID_COUNT as u8, |_: &Packet| {}),
            Err(DispatchError::OutOfRange(PACKET_ID_COUNT as u8))
        );
    }

    #[test]
    fn test_validate_required_ids() {
        let mut table = DispatchTable::new();
        table.register(1, |_: &Packet| {}).unwrap();
        table.register(12, |_: &Packet| {}).unwrap();
        assert!(table.validate(&[1, 12]).is_ok());
        assert_eq!(table.validate(&[1, 5]), Err(DispatchError::Unmapped(5)));
        assert_eq!(table.registered_ids(), vec![1, 12]);

        assert!(table.unregister(12));
        assert!(!table.unregister(12));
        assert_eq!(table.validate(&[12]), Err(DispatchError::Unmapped(12)));
    }
}
