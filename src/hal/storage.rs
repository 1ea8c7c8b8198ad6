//! Byte-addressed non-volatile store.
//!
//! The node keeps a small EEPROM-style image: the scheduler record and the
//! network identity live at fixed addresses (see `power::record` and
//! `xbee::config`). Backends: [`MemoryStore`] for tests and simulation,
//! `persistence_host::FileStore` on the host and `persistence::NvsStore` on
//! ESP32.
//!
//! # Record Format
//!
//! ```text
//! [magic: 1][length: 1][body: length][checksum: 1]
//! ```
//!
//! The checksum is `0xFF` minus the low byte of the sum of the body bytes.
//! An erased area or a bad checksum reads back as "no record".

use crate::status::{FailureReason, HardwareError, HwResult};
use std::fmt;

/// Value of an erased byte.
pub const ERASED: u8 = 0xFF;

/// Default image size in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Byte-addressed read/write storage that survives power loss.
pub trait NonVolatileStore {
    /// Total addressable bytes.
    fn capacity(&self) -> usize;

    /// Fill `buf` with the bytes starting at `addr`.
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> HwResult<()>;

    /// Write `data` starting at `addr`.
    fn write(&mut self, addr: usize, data: &[u8]) -> HwResult<()>;
}

/// Reject accesses that run past the end of the store.
pub fn check_range(capacity: usize, addr: usize, len: usize) -> HwResult<()> {
    match addr.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(HardwareError::Failed(FailureReason::OutOfRange { addr, len })),
    }
}

/// Largest record body that fits the one-byte length field.
pub const MAX_RECORD_BODY: usize = 255;

/// Bytes a record occupies besides its body.
pub const RECORD_OVERHEAD: usize = 3;

fn record_checksum(body: &[u8]) -> u8 {
    0xFF - body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Write a framed record at `addr`, then read it back to verify.
pub fn write_record(
    store: &mut dyn NonVolatileStore,
    addr: usize,
    magic: u8,
    body: &[u8],
) -> Result<(), StorageError> {
    if body.len() > MAX_RECORD_BODY {
        return Err(StorageError::TooLarge {
            len: body.len(),
            max: MAX_RECORD_BODY,
        });
    }
    let mut framed = Vec::with_capacity(body.len() + RECORD_OVERHEAD);
    framed.push(magic);
    framed.push(body.len() as u8);
    framed.extend_from_slice(body);
    framed.push(record_checksum(body));
    store.write(addr, &framed)?;

    // Flash writes can fail silently; compare what landed.
    let mut verify = vec![0u8; framed.len()];
    store.read(addr, &mut verify)?;
    if verify != framed {
        log::error!("Record at 0x{:04X} verification failed after write", addr);
        return Err(StorageError::VerifyMismatch { addr });
    }
    Ok(())
}

/// Read the framed record at `addr`.
///
/// Returns `Ok(None)` when the area is erased, carries another magic byte or
/// fails its checksum.
pub fn read_record(
    store: &mut dyn NonVolatileStore,
    addr: usize,
    magic: u8,
) -> Result<Option<Vec<u8>>, StorageError> {
    let mut head = [0u8; 2];
    store.read(addr, &mut head)?;
    if head[0] != magic {
        log::debug!("No record with magic 0x{:02X} at 0x{:04X}", magic, addr);
        return Ok(None);
    }
    let len = head[1] as usize;
    let mut rest = vec![0u8; len + 1];
    store.read(addr + 2, &mut rest)?;
    let checksum = rest[len];
    rest.truncate(len);
    if record_checksum(&rest) != checksum {
        log::warn!("Record at 0x{:04X} failed checksum, ignoring", addr);
        return Ok(None);
    }
    Ok(Some(rest))
}

/// Erase the record header at `addr` so it reads back as absent.
pub fn erase_record(store: &mut dyn NonVolatileStore, addr: usize) -> Result<(), StorageError> {
    store.write(addr, &[ERASED, ERASED])?;
    Ok(())
}

/// Errors persisting a framed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store itself failed or was unavailable.
    Hardware(HardwareError),
    /// Record body exceeds the length field.
    TooLarge { len: usize, max: usize },
    /// Read-back after write did not match.
    VerifyMismatch { addr: usize },
}

impl From<HardwareError> for StorageError {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(e) => write!(f, "store error: {}", e),
            Self::TooLarge { len, max } => {
                write!(f, "record too large: {} bytes (max {})", len, max)
            }
            Self::VerifyMismatch { addr } => {
                write!(f, "record at 0x{:04X} did not verify after write", addr)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// In-memory store; contents are lost with the process.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    /// Create an erased store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED; capacity],
        }
    }

    /// Raw image, for inspection in tests.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NonVolatileStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> HwResult<()> {
        check_range(self.bytes.len(), addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> HwResult<()> {
        check_range(self.bytes.len(), addr, data.len())?;
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_erased() {
        let mut store = MemoryStore::new(16);
        let mut buf = [0u8; 4];
        store.read(12, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);
    }

    #[test]
    fn test_write_then_read() {
        let mut store = MemoryStore::new(16);
        store.write(3, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 5];
        store.read(2, &mut buf).unwrap();
        assert_eq!(buf, [ERASED, 1, 2, 3, ERASED]);
    }

    #[test]
    fn test_out_of_range_access_fails() {
        let mut store = MemoryStore::new(16);
        let mut buf = [0u8; 4];
        assert_eq!(
            store.read(14, &mut buf),
            Err(HardwareError::Failed(FailureReason::OutOfRange {
                addr: 14,
                len: 4
            }))
        );
        assert!(store.write(usize::MAX, &[0]).is_err());
    }

    #[test]
    fn test_record_written_and_read_back() {
        let mut store = MemoryStore::new(64);
        write_record(&mut store, 8, 0xA5, &[1, 2, 3]).unwrap();
        assert_eq!(&store.as_bytes()[8..14], &[0xA5, 3, 1, 2, 3, 0xFF - 6]);
        assert_eq!(read_record(&mut store, 8, 0xA5).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_blank_or_foreign_area_has_no_record() {
        let mut store = MemoryStore::new(64);
        assert_eq!(read_record(&mut store, 0, 0xA5).unwrap(), None);
        write_record(&mut store, 0, 0x5A, &[9]).unwrap();
        assert_eq!(read_record(&mut store, 0, 0xA5).unwrap(), None);
    }

    #[test]
    fn test_corrupted_record_is_ignored() {
        let mut store = MemoryStore::new(64);
        write_record(&mut store, 0, 0xA5, &[1, 2, 3]).unwrap();
        store.write(3, &[0x7F]).unwrap();
        assert_eq!(read_record(&mut store, 0, 0xA5).unwrap(), None);
    }

    #[test]
    fn test_erased_record_reads_absent() {
        let mut store = MemoryStore::new(64);
        write_record(&mut store, 0, 0xA5, &[1]).unwrap();
        erase_record(&mut store, 0).unwrap();
        assert_eq!(read_record(&mut store, 0, 0xA5).unwrap(), None);
    }

    #[test]
    fn test_record_past_end_fails() {
        let mut store = MemoryStore::new(8);
        assert!(matches!(
            write_record(&mut store, 4, 0xA5, &[1, 2, 3]),
            Err(StorageError::Hardware(_))
        ));
    }
}
