//! Network identity and radio defaults.
//!
//! [`NetworkIdentity`] is everything the node pushes into the radio module at
//! setup. The module keeps its own copy in non-volatile memory; the node
//! additionally keeps one in its store (see `persistence`) so it can tell
//! whether a re-configuration is needed after a reset.
//!
//! # Example
//!
//! ```
//! use xbee_sensor_node::xbee::NetworkIdentity;
//!
//! let identity = NetworkIdentity::new([0, 0, 0, 0, 0, 0, 0x13, 0x02])
//!     .with_node_identifier("node_A")
//!     .with_gateway([0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]);
//! assert!(identity.validate().is_ok());
//! ```

use crate::hal::storage::{self, NonVolatileStore, StorageError};
use crate::transport::packet::MAX_NODE_ID_LEN;
use std::fmt;
use std::time::Duration;

/// Default PAN identifier.
pub const DEFAULT_PAN_ID: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x13, 0x02];

/// Scan channels 0x0B to 0x18 (0x19 and 0x1A excluded).
pub const DEFAULT_SCAN_CHANNELS: u16 = 0x3FFF;

/// Energy scan duration exponent.
pub const DEFAULT_ENERGY_SCAN_DURATION: u8 = 3;

/// Largest energy scan duration exponent accepted by the module.
pub const MAX_ENERGY_SCAN_DURATION: u8 = 7;

/// Settle time after switching the module on, before the first command.
pub const POWER_ON_SETTLE: Duration = Duration::from_secs(1);

/// Off time when power-cycling the module to apply settings.
pub const POWER_CYCLE_OFF_TIME: Duration = Duration::from_secs(3);

/// Completed inbound packets the driver buffers before dropping new ones.
pub const INBOUND_QUEUE_CAPACITY: usize = 5;

/// Serialized identity format version.
const IDENTITY_FORMAT_VERSION: u8 = 1;

/// Store address of the identity record.
pub const IDENTITY_RECORD_ADDR: usize = 0x40;

/// Magic byte of the identity record.
const IDENTITY_RECORD_MAGIC: u8 = 0x1D;

/// A radio setting written during configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    PanId,
    ScanChannels,
    EnergyScanDuration,
    ChannelVerification,
    NodeIdentifier,
    WriteConfig,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PanId => "PAN id",
            Self::ScanChannels => "scanning channels",
            Self::EnergyScanDuration => "energy scan duration",
            Self::ChannelVerification => "channel verification",
            Self::NodeIdentifier => "node identifier",
            Self::WriteConfig => "write config",
        };
        f.write_str(name)
    }
}

/// Network membership settings for the radio module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    /// 64-bit PAN identifier.
    pub pan_id: [u8; 8],
    /// Bitmask of channels scanned while joining.
    pub scan_channels: u16,
    /// Energy scan duration exponent (0-7).
    pub energy_scan_duration: u8,
    /// Verify the coordinator on join (rescan when it is gone).
    pub channel_verification: bool,
    /// Optional human-readable node identifier.
    pub node_identifier: Option<String>,
    /// Optional 64-bit address of the gateway readings are sent to.
    pub gateway: Option<[u8; 8]>,
}

impl Default for NetworkIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_PAN_ID)
    }
}

impl NetworkIdentity {
    /// Identity for `pan_id` with default scan settings and verification on.
    pub fn new(pan_id: [u8; 8]) -> Self {
        Self {
            pan_id,
            scan_channels: DEFAULT_SCAN_CHANNELS,
            energy_scan_duration: DEFAULT_ENERGY_SCAN_DURATION,
            channel_verification: true,
            node_identifier: None,
            gateway: None,
        }
    }

    pub fn with_node_identifier(mut self, id: impl Into<String>) -> Self {
        self.node_identifier = Some(id.into());
        self
    }

    pub fn with_gateway(mut self, gateway: [u8; 8]) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Validate the identity before it is pushed to the radio.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.scan_channels == 0 {
            return Err(IdentityError::NoScanChannels);
        }
        if self.energy_scan_duration > MAX_ENERGY_SCAN_DURATION {
            return Err(IdentityError::ScanDurationOutOfRange {
                value: self.energy_scan_duration,
                max: MAX_ENERGY_SCAN_DURATION,
            });
        }
        if let Some(id) = &self.node_identifier {
            if id.is_empty() || id.len() > MAX_NODE_ID_LEN {
                return Err(IdentityError::NodeIdLength {
                    len: id.len(),
                    max: MAX_NODE_ID_LEN,
                });
            }
            if !id.bytes().all(|b| b.is_ascii_graphic() || b == b' ') || id.contains('#') {
                return Err(IdentityError::NodeIdCharacters);
            }
        }
        Ok(())
    }

    /// Serialize for the node's store.
    ///
    /// Format: `[version:1][pan:8][sc:2 BE][sd:1][jv:1][has_gw:1][gw:8]?[ni_len:1][ni:N]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let ni = self.node_identifier.as_deref().unwrap_or("");
        let mut bytes = Vec::with_capacity(24 + ni.len());
        bytes.push(IDENTITY_FORMAT_VERSION);
        bytes.extend_from_slice(&self.pan_id);
        bytes.extend_from_slice(&self.scan_channels.to_be_bytes());
        bytes.push(self.energy_scan_duration);
        bytes.push(self.channel_verification as u8);
        match &self.gateway {
            Some(gw) => {
                bytes.push(1);
                bytes.extend_from_slice(gw);
            }
            None => bytes.push(0),
        }
        bytes.push(ni.len() as u8);
        bytes.extend_from_slice(ni.as_bytes());
        bytes
    }

    /// Deserialize and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let mut reader = ByteReader::new(bytes);

        let version = reader.u8()?;
        if version != IDENTITY_FORMAT_VERSION {
            return Err(IdentityError::UnsupportedVersion(version));
        }
        let mut pan_id = [0u8; 8];
        pan_id.copy_from_slice(reader.take(8)?);
        let scan_channels = u16::from_be_bytes([reader.u8()?, reader.u8()?]);
        let energy_scan_duration = reader.u8()?;
        let channel_verification = reader.u8()? != 0;
        let gateway = match reader.u8()? {
            0 => None,
            _ => {
                let mut gw = [0u8; 8];
                gw.copy_from_slice(reader.take(8)?);
                Some(gw)
            }
        };
        let ni_len = reader.u8()? as usize;
        let node_identifier = if ni_len == 0 {
            None
        } else {
            let raw = reader.take(ni_len)?;
            Some(
                String::from_utf8(raw.to_vec())
                    .map_err(|_| IdentityError::InvalidFormat("node identifier not UTF-8"))?,
            )
        };

        let identity = Self {
            pan_id,
            scan_channels,
            energy_scan_duration,
            channel_verification,
            node_identifier,
            gateway,
        };
        identity.validate()?;
        Ok(identity)
    }
}

/// Save the identity to the node's store with read-back verification.
pub fn save_identity(
    store: &mut dyn NonVolatileStore,
    identity: &NetworkIdentity,
) -> Result<(), StorageError> {
    storage::write_record(
        store,
        IDENTITY_RECORD_ADDR,
        IDENTITY_RECORD_MAGIC,
        &identity.to_bytes(),
    )?;
    log::info!("Network identity saved and verified");
    Ok(())
}

/// Load the identity from the node's store.
///
/// Returns `Ok(None)` if nothing is stored or the stored data is invalid.
pub fn load_identity(
    store: &mut dyn NonVolatileStore,
) -> Result<Option<NetworkIdentity>, StorageError> {
    let Some(body) = storage::read_record(store, IDENTITY_RECORD_ADDR, IDENTITY_RECORD_MAGIC)?
    else {
        return Ok(None);
    };
    match NetworkIdentity::from_bytes(&body) {
        Ok(identity) => Ok(Some(identity)),
        Err(e) => {
            log::error!("Failed to parse stored identity: {}", e);
            Ok(None)
        }
    }
}

/// Cursor over a byte slice that reports truncation as an [`IdentityError`].
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IdentityError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(IdentityError::InvalidFormat("truncated"));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IdentityError> {
        Ok(self.take(1)?[0])
    }
}

/// Network identity validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Scan channel mask selects no channel.
    NoScanChannels,
    /// Energy scan duration exponent out of range.
    ScanDurationOutOfRange { value: u8, max: u8 },
    /// Node identifier empty or too long.
    NodeIdLength { len: usize, max: usize },
    /// Node identifier contains non-printable characters or `#`.
    NodeIdCharacters,
    /// Serialized identity has an unknown version.
    UnsupportedVersion(u8),
    /// Serialized identity is malformed.
    InvalidFormat(&'static str),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoScanChannels => write!(f, "scan channel mask is empty"),
            Self::ScanDurationOutOfRange { value, max } => {
                write!(f, "energy scan duration {} out of range (max {})", value, max)
            }
            Self::NodeIdLength { len, max } => {
                write!(f, "node identifier length {} invalid (1-{})", len, max)
            }
            Self::NodeIdCharacters => write!(f, "node identifier has invalid characters"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported identity format version {}", v),
            Self::InvalidFormat(msg) => write!(f, "invalid identity format: {}", msg),
        }
    }
}

impl std::error::Error for IdentityError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let identity = NetworkIdentity::default();
        assert_eq!(identity.pan_id, DEFAULT_PAN_ID);
        assert_eq!(identity.scan_channels, 0x3FFF);
        assert_eq!(identity.energy_scan_duration, 3);
        assert!(identity.channel_verification);
        assert!(identity.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut identity = NetworkIdentity::default();
        identity.scan_channels = 0;
        assert_eq!(identity.validate(), Err(IdentityError::NoScanChannels));

        let mut identity = NetworkIdentity::default();
        identity.energy_scan_duration = 8;
        assert!(matches!(
            identity.validate(),
            Err(IdentityError::ScanDurationOutOfRange { value: 8, .. })
        ));

        let identity = NetworkIdentity::default().with_node_identifier("");
        assert!(matches!(
            identity.validate(),
            Err(IdentityError::NodeIdLength { len: 0, .. })
        ));

        let identity = NetworkIdentity::default().with_node_identifier("bad#id");
        assert_eq!(identity.validate(), Err(IdentityError::NodeIdCharacters));
    }

    #[test]
    fn test_serialization_preserves_optional_fields() {
        let identity = NetworkIdentity::new([1, 2, 3, 4, 5, 6, 7, 8])
            .with_node_identifier("roof sensor")
            .with_gateway([9; 8]);
        let restored = NetworkIdentity::from_bytes(&identity.to_bytes()).unwrap();
        assert_eq!(restored, identity);

        let bare = NetworkIdentity::default();
        let restored = NetworkIdentity::from_bytes(&bare.to_bytes()).unwrap();
        assert_eq!(restored.gateway, None);
        assert_eq!(restored.node_identifier, None);
    }

    #[test]
    fn test_from_bytes_rejects_truncated_and_unknown_version() {
        let bytes = NetworkIdentity::default().to_bytes();
        assert_eq!(
            NetworkIdentity::from_bytes(&bytes[..5]),
            Err(IdentityError::InvalidFormat("truncated"))
        );
        let mut wrong_version = bytes.clone();
        wrong_version[0] = 9;
        assert_eq!(
            NetworkIdentity::from_bytes(&wrong_version),
            Err(IdentityError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_identity_store_roundtrip() {
        let mut store = crate::hal::MemoryStore::default();
        assert_eq!(load_identity(&mut store).unwrap(), None);

        let identity = NetworkIdentity::default()
            .with_node_identifier("node_A")
            .with_gateway([1, 2, 3, 4, 5, 6, 7, 8]);
        save_identity(&mut store, &identity).unwrap();
        assert_eq!(load_identity(&mut store).unwrap(), Some(identity));
    }
}
