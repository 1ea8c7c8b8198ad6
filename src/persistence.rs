//! NVS-backed store for the node image.
//!
//! The schedule record and the network identity live in a small byte image
//! (see [`NonVolatileStore`]). On ESP32 the whole image is kept as one blob in
//! Non-Volatile Storage: reads come from a RAM copy, every write rewrites the
//! blob and reads it back to catch silent flash failures.
//!
//! # Usage
//!
//! ```ignore
//! use xbee_sensor_node::persistence::NvsStore;
//!
//! let store = NvsStore::open()?;
//! let record = ScheduleRecord::load(&mut store)?;
//! ```

use crate::hal::storage::{check_range, NonVolatileStore, DEFAULT_CAPACITY, ERASED};
use crate::status::{FailureReason, HardwareError, HwResult};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_sys::EspError;
use log::{debug, info};
use std::sync::Mutex;

/// NVS namespace of the node image.
const NVS_NAMESPACE: &str = "xbee-node";

/// NVS key of the image blob.
const IMAGE_KEY: &str = "eeprom";

static PARTITION: Mutex<Option<EspDefaultNvsPartition>> = Mutex::new(None);

/// Shared handle to the default NVS partition.
///
/// `EspDefaultNvsPartition::take()` succeeds only once per boot; later
/// callers get a clone of the first handle.
pub fn default_partition() -> Result<EspDefaultNvsPartition, EspError> {
    let mut slot = PARTITION.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}

/// Byte image persisted in NVS.
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
    image: Vec<u8>,
}

impl NvsStore {
    /// Open the default NVS partition and load the image.
    ///
    /// A missing or wrongly sized blob reads as an erased image.
    pub fn open() -> Result<Self, EspError> {
        let nvs = EspNvs::new(default_partition()?, NVS_NAMESPACE, true)?;
        Self::with_nvs(nvs)
    }

    /// Load the image from an already opened namespace.
    pub fn with_nvs(nvs: EspNvs<NvsDefault>) -> Result<Self, EspError> {
        let mut image = vec![ERASED; DEFAULT_CAPACITY];
        let mut buf = vec![0u8; DEFAULT_CAPACITY];
        match nvs.get_raw(IMAGE_KEY, &mut buf) {
            Ok(Some(bytes)) if bytes.len() == DEFAULT_CAPACITY => {
                image.copy_from_slice(bytes);
                info!("Loaded {} byte image from NVS", DEFAULT_CAPACITY);
            }
            Ok(Some(bytes)) => {
                log::warn!(
                    "Stored image has {} bytes, expected {}; starting erased",
                    bytes.len(),
                    DEFAULT_CAPACITY
                );
            }
            Ok(None) => debug!("No image in NVS, starting erased"),
            Err(e) => {
                log::warn!("Failed to read image from NVS: {:?}", e);
                return Err(e);
            }
        }
        Ok(Self { nvs, image })
    }

    /// Remove the blob; the image reads as erased afterwards.
    pub fn clear(&mut self) -> Result<(), EspError> {
        self.nvs.remove(IMAGE_KEY)?;
        self.image.fill(ERASED);
        log::warn!("Node image cleared from NVS");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EspError> {
        self.nvs.set_raw(IMAGE_KEY, &self.image)?;

        // Read back and verify to catch silent flash write failures
        let mut verify = vec![0u8; self.image.len()];
        let read = self
            .nvs
            .get_raw(IMAGE_KEY, &mut verify)?
            .ok_or_else(|| {
                log::error!("Image not found after save - possible flash failure");
                EspError::from_infallible::<{ esp_idf_sys::ESP_ERR_NVS_NOT_FOUND }>()
            })?;
        if read != self.image.as_slice() {
            log::error!("Image verification failed - data mismatch after save");
            return Err(EspError::from_infallible::<
                { esp_idf_sys::ESP_ERR_INVALID_CRC },
            >());
        }
        Ok(())
    }
}

impl NonVolatileStore for NvsStore {
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
        self.flush().map_err(|e| {
            self.image[addr..addr + data.len()].copy_from_slice(&previous);
            HardwareError::failed(FailureReason::Io(format!("NVS write: {:?}", e)))
        })
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::power::{ScheduleRecord, WakeSchedule};
    use crate::hal::RtcTime;
    use xbee_sensor_node_macros::tap_test;

    #[tap_test]
    fn test_nvs_image_survives_reopen() {
        let mut store = NvsStore::open().expect("Failed to open NVS");
        let schedule = WakeSchedule::table(vec![0, 60, 120]).expect("table");
        let record = ScheduleRecord::capture(&schedule, RtcTime::from_secs(3600));
        record.store(&mut store).expect("Failed to store record");
        drop(store);

        let mut reopened = NvsStore::open().expect("Failed to reopen NVS");
        assert_eq!(ScheduleRecord::load(&mut reopened).expect("load"), Some(record));
    }

    #[tap_test]
    fn test_nvs_clear_erases_image() {
        let mut store = NvsStore::open().expect("Failed to open NVS");
        store.write(0, &[1, 2, 3]).expect("write");
        store.clear().expect("clear");
        let mut buf = [0u8; 3];
        store.read(0, &mut buf).expect("read");
        assert_eq!(buf, [ERASED; 3]);
    }

    #[tap_test]
    fn test_nvs_out_of_range_rejected() {
        let mut store = NvsStore::open().expect("Failed to open NVS");
        let end = store.capacity();
        assert!(store.write(end - 1, &[0, 0]).is_err());
    }
}
