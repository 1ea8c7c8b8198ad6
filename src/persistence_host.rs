//! File-backed store for host (development) builds.
//!
//! Keeps the node image in a file so the schedule record and network identity
//! persist across runs of `host-node`. Uses `~/.xbee-sensor-node/eeprom.bin`
//! by default.
//!
//! # Usage
//!
//! ```ignore
//! use xbee_sensor_node::persistence_host::FileStore;
//!
//! let mut store = FileStore::open_default()?;
//! let record = ScheduleRecord::load(&mut store)?;
//! ```

use crate::hal::storage::{check_range, NonVolatileStore, DEFAULT_CAPACITY, ERASED};
use crate::status::{FailureReason, HardwareError, HwResult};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default image path.
///
/// Returns `~/.xbee-sensor-node/eeprom.bin`
pub fn default_store_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".xbee-sensor-node")
        .join("eeprom.bin"))
}

/// Node image persisted in a file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileStore {
    /// Open the image at `path`.
    ///
    /// A missing file, or one of the wrong size, reads as an erased image.
    pub fn open(path: &Path) -> io::Result<Self> {
        let image = match fs::read(path) {
            Ok(bytes) if bytes.len() == DEFAULT_CAPACITY => {
                info!("Loaded node image from {:?}", path);
                bytes
            }
            Ok(bytes) => {
                log::warn!(
                    "Image at {:?} has {} bytes, expected {}; starting erased",
                    path,
                    bytes.len(),
                    DEFAULT_CAPACITY
                );
                vec![ERASED; DEFAULT_CAPACITY]
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No image at {:?}, starting erased", path);
                vec![ERASED; DEFAULT_CAPACITY]
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            image,
        })
    }

    /// Open the image at the default path.
    pub fn open_default() -> io::Result<Self> {
        let path = default_store_path()?;
        Self::open(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> io::Result<()> {
        // Create parent directory if needed
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, &self.image)?;

        // Verify write by reading back
        let read_back = fs::read(&self.path)?;
        if read_back != self.image {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Image verification failed: wrote {} bytes, read {} bytes",
                    self.image.len(),
                    read_back.len()
                ),
            ));
        }
        Ok(())
    }
}

impl NonVolatileStore for FileStore {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> HwResult<()> {
        check_range(self.image.len(), addr, buf.len())?;
        buf.copy_from_slice(&self.image[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> HwResult<()> {
        check_range(self.image.len(), addr, data.len())?;
        let previous = self.image[addr..addr + data.len()].to_vec();
        self.image[addr..addr + data.len()].copy_from_slice(data);
        if let Err(e) = self.flush() {
            self.image[addr..addr + data.len()].copy_from_slice(&previous);
            return Err(HardwareError::failed(FailureReason::Io(e.to_string())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::RtcTime;
    use crate::power::{ScheduleRecord, WakeSchedule};
    use crate::xbee::{load_identity, save_identity, NetworkIdentity};
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test files even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_store_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("xbee-node-test-{}-{}.bin", pid, id))
    }

    #[test]
    fn test_missing_file_reads_erased() {
        let path = unique_store_path();
        let mut store = FileStore::open(&path).unwrap();
        let mut buf = [0u8; 4];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);
        assert!(!path.exists());
    }

    #[test]
    fn test_records_survive_reopen() {
        let path = unique_store_path();
        let schedule = WakeSchedule::table(vec![0, 5, 13, 20]).unwrap();
        let record = ScheduleRecord::capture(&schedule, RtcTime::from_secs(125));
        let identity = NetworkIdentity::default().with_node_identifier("node_A");
        {
            let mut store = FileStore::open(&path).unwrap();
            record.store(&mut store).unwrap();
            save_identity(&mut store, &identity).unwrap();
        }

        let mut reopened = FileStore::open(&path).unwrap();
        assert_eq!(ScheduleRecord::load(&mut reopened).unwrap(), Some(record));
        assert_eq!(load_identity(&mut reopened).unwrap(), Some(identity));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_wrong_size_file_starts_erased() {
        let path = unique_store_path();
        fs::write(&path, [0u8; 16]).unwrap();
        let mut store = FileStore::open(&path).unwrap();
        assert_eq!(ScheduleRecord::load(&mut store).unwrap(), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_out_of_range_write_rejected() {
        let path = unique_store_path();
        let mut store = FileStore::open(&path).unwrap();
        assert!(matches!(
            store.write(DEFAULT_CAPACITY - 1, &[0, 0]),
            Err(HardwareError::Failed(FailureReason::OutOfRange { .. }))
        ));
    }
}
