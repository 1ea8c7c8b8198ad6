//! Runtime node configuration.
//!
//! The firmware is configured with compile-time defaults; the host binary can
//! override them with a JSON file:
//!
//! ```json
//! {
//!   "identity": {
//!     "pan_id": "0000000000001302",
//!     "node_identifier": "node_A",
//!     "gateway": "0013A2004069737A"
//!   },
//!   "schedule": { "table": [0, 5, 13, 20] },
//!   "board": "weather_station",
//!   "receive_timeout_secs": 20,
//!   "required_packet_ids": [5],
//!   "source": { "type": "node_id", "value": "node_A" }
//! }
//! ```
//!
//! Every field is optional. [`NodeConfig::validate`] converts the file into
//! domain types once, so errors surface at startup instead of mid-cycle.

use crate::power::{BoardVariant, ScheduleError, WakeSchedule};
use crate::transport::{encode_hex, Address, Origin, PacketError, RECEIVE_TIMEOUT};
use crate::xbee::{
    IdentityError, NetworkIdentity, DEFAULT_ENERGY_SCAN_DURATION, DEFAULT_PAN_ID,
    DEFAULT_SCAN_CHANNELS,
};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Gateway the node reports to when none is configured.
pub const DEFAULT_GATEWAY: [u8; 8] = [0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A];

/// Wake interval when no schedule is configured.
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(60);

/// Network identity section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentitySection {
    /// 16 hex digits.
    pub pan_id: String,
    pub scan_channels: u16,
    pub energy_scan_duration: u8,
    pub channel_verification: bool,
    pub node_identifier: Option<String>,
    /// 16 hex digits.
    pub gateway: Option<String>,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            pan_id: encode_hex(&DEFAULT_PAN_ID),
            scan_channels: DEFAULT_SCAN_CHANNELS,
            energy_scan_duration: DEFAULT_ENERGY_SCAN_DURATION,
            channel_verification: true,
            node_identifier: None,
            gateway: None,
        }
    }
}

/// Wake schedule section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ScheduleSection {
    /// Fixed interval in seconds.
    FixedSecs(u64),
    /// Strictly increasing offsets in seconds.
    Table(Vec<u32>),
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self::FixedSecs(DEFAULT_WAKE_INTERVAL.as_secs())
    }
}

/// Board variant in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardSection {
    Indoor,
    WeatherStation,
}

impl From<BoardSection> for BoardVariant {
    fn from(board: BoardSection) -> Self {
        match board {
            BoardSection::Indoor => BoardVariant::Indoor,
            BoardSection::WeatherStation => BoardVariant::WeatherStation,
        }
    }
}

/// How outbound packets identify the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SourceSection {
    /// 16-bit network address, 4 hex digits.
    My(String),
    /// 64-bit hardware address, 16 hex digits.
    Mac(String),
    /// Node identifier string.
    NodeId(String),
}

/// Node configuration as read from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub identity: IdentitySection,
    pub schedule: ScheduleSection,
    /// Board variant; the compiled-in variant when absent.
    pub board: Option<BoardSection>,
    pub receive_timeout_secs: Option<u64>,
    /// Packet IDs that must have a handler before the node starts.
    pub required_packet_ids: Vec<u8>,
    /// Source identification; the node identifier (or the unknown network
    /// address) when absent.
    pub source: Option<SourceSection>,
}

/// [`NodeConfig`] converted into domain types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub identity: NetworkIdentity,
    pub gateway: Address,
    pub schedule: WakeSchedule,
    pub board: BoardVariant,
    pub receive_timeout: Duration,
    pub required_packet_ids: Vec<u8>,
    pub source: Origin,
}

impl NodeConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse the JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded node configuration from {}", path.display());
        Ok(config)
    }

    /// Read `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Convert into domain types, checking every field.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let gateway = match &self.identity.gateway {
            Some(text) => parse_hex8("identity.gateway", text)?,
            None => DEFAULT_GATEWAY,
        };

        let mut identity = NetworkIdentity::new(parse_hex8("identity.pan_id", &self.identity.pan_id)?)
            .with_gateway(gateway);
        identity.scan_channels = self.identity.scan_channels;
        identity.energy_scan_duration = self.identity.energy_scan_duration;
        identity.channel_verification = self.identity.channel_verification;
        if let Some(id) = &self.identity.node_identifier {
            identity = identity.with_node_identifier(id.clone());
        }
        identity.validate()?;

        let schedule = match &self.schedule {
            ScheduleSection::FixedSecs(secs) => WakeSchedule::fixed(Duration::from_secs(*secs))?,
            ScheduleSection::Table(offsets) => WakeSchedule::table(offsets.clone())?,
        };

        let source = match &self.source {
            Some(SourceSection::My(text)) => match Address::from_hex(text)? {
                Address::Short(b) => Origin::My(b),
                Address::Long(_) => return Err(ConfigError::InvalidField("source")),
            },
            Some(SourceSection::Mac(text)) => match Address::from_hex(text)? {
                Address::Long(b) => Origin::Mac(b),
                Address::Short(_) => return Err(ConfigError::InvalidField("source")),
            },
            Some(SourceSection::NodeId(id)) => Origin::NodeId(id.clone()),
            None => match &identity.node_identifier {
                Some(id) => Origin::NodeId(id.clone()),
                None => Origin::My([0xFF, 0xFE]),
            },
        };
        source.validate()?;

        Ok(ValidatedConfig {
            identity,
            gateway: Address::Long(gateway),
            schedule,
            board: self.board.map(BoardVariant::from).unwrap_or_else(BoardVariant::compiled),
            receive_timeout: self
                .receive_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(RECEIVE_TIMEOUT),
            required_packet_ids: self.required_packet_ids.clone(),
            source,
        })
    }
}

fn parse_hex8(field: &'static str, text: &str) -> Result<[u8; 8], ConfigError> {
    match Address::from_hex(text) {
        Ok(Address::Long(bytes)) => Ok(bytes),
        _ => Err(ConfigError::InvalidField(field)),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file is not valid configuration JSON.
    Parse(String),
    /// A field has the wrong shape.
    InvalidField(&'static str),
    Identity(IdentityError),
    Schedule(ScheduleError),
    Source(PacketError),
}

impl From<IdentityError> for ConfigError {
    fn from(e: IdentityError) -> Self {
        Self::Identity(e)
    }
}

impl From<ScheduleError> for ConfigError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

impl From<PacketError> for ConfigError {
    fn from(e: PacketError) -> Self {
        Self::Source(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read configuration: {}", e),
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
            Self::InvalidField(field) => write!(f, "invalid value for {}", field),
            Self::Identity(e) => write!(f, "invalid network identity: {}", e),
            Self::Schedule(e) => write!(f, "invalid wake schedule: {}", e),
            Self::Source(e) => write!(f, "invalid source address: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = NodeConfig::from_json("{}").unwrap().validate().unwrap();
        assert_eq!(config.identity.pan_id, DEFAULT_PAN_ID);
        assert_eq!(config.identity.gateway, Some(DEFAULT_GATEWAY));
        assert_eq!(config.gateway, Address::Long(DEFAULT_GATEWAY));
        assert_eq!(
            config.schedule,
            WakeSchedule::fixed(DEFAULT_WAKE_INTERVAL).unwrap()
        );
        assert_eq!(config.receive_timeout, RECEIVE_TIMEOUT);
        assert_eq!(config.source, Origin::My([0xFF, 0xFE]));
        assert_eq!(config.board, BoardVariant::compiled());
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "identity": {
                "pan_id": "0000000000004242",
                "node_identifier": "node_A",
                "gateway": "0013A20040697300"
            },
            "schedule": { "table": [0, 5, 13, 20] },
            "board": "weather_station",
            "receive_timeout_secs": 5,
            "required_packet_ids": [5]
        }"#;
        let config = NodeConfig::from_json(json).unwrap().validate().unwrap();
        assert_eq!(config.identity.pan_id, [0, 0, 0, 0, 0, 0, 0x42, 0x42]);
        assert_eq!(config.identity.node_identifier.as_deref(), Some("node_A"));
        assert_eq!(config.schedule.next_offset(), Duration::from_secs(5));
        assert_eq!(config.board, BoardVariant::WeatherStation);
        assert_eq!(config.receive_timeout, Duration::from_secs(5));
        assert_eq!(config.required_packet_ids, vec![5]);
        assert_eq!(config.source, Origin::NodeId("node_A".into()));
    }

    #[test]
    fn test_explicit_source() {
        let json = r#"{ "source": { "type": "my", "value": "1234" } }"#;
        let config = NodeConfig::from_json(json).unwrap().validate().unwrap();
        assert_eq!(config.source, Origin::My([0x12, 0x34]));

        let json = r#"{ "source": { "type": "my", "value": "0013A20040697300" } }"#;
        assert_eq!(
            NodeConfig::from_json(json).unwrap().validate(),
            Err(ConfigError::InvalidField("source"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_pan = r#"{ "identity": { "pan_id": "1302" } }"#;
        assert_eq!(
            NodeConfig::from_json(bad_pan).unwrap().validate(),
            Err(ConfigError::InvalidField("identity.pan_id"))
        );

        let bad_table = r#"{ "schedule": { "table": [0, 5, 5] } }"#;
        assert!(matches!(
            NodeConfig::from_json(bad_table).unwrap().validate(),
            Err(ConfigError::Schedule(_))
        ));

        let no_channels = r#"{ "identity": { "scan_channels": 0 } }"#;
        assert_eq!(
            NodeConfig::from_json(no_channels).unwrap().validate(),
            Err(ConfigError::Identity(IdentityError::NoScanChannels))
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(matches!(
            NodeConfig::from_json(r#"{ "wake": 10 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("xbee-sensor-node-no-such-config.json");
        assert_eq!(
            NodeConfig::load_or_default(&path).unwrap(),
            NodeConfig::default()
        );
    }
}
