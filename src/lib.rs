//! XBee/ZigBee battery sensor node firmware library.
//!
//! The node joins a ZigBee network through an XBee module, sends its sensor
//! readings to a gateway and sleeps between wakes on a fixed interval or a
//! cyclic wake table. Everything except [`platform`] and [`persistence`] is
//! platform-independent and tested on the host against the simulated
//! hardware in [`hal::sim`].
//!
//! - [`association`]: radio configuration and association tracking
//! - [`power`]: wake schedule and low-power modes
//! - [`transport`]: packet send/receive and dispatch by packet ID
//! - [`node`]: the duty cycle tying them together

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as xbee_sensor_node;

pub mod association;
pub mod config;
pub mod hal;
pub mod node;
#[cfg(feature = "esp32")]
pub mod persistence;
pub mod persistence_host;
#[cfg(feature = "esp32")]
pub mod platform;
pub mod power;
pub mod status;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod transport;
pub mod xbee;

// Re-export commonly used items
pub use association::{AssociationManager, AssociationMode, AssociationOutcome, AssociationState};
pub use config::{ConfigError, NodeConfig, ValidatedConfig};
pub use node::{BootReason, CycleReport, Devices, ModeSelection, NodeError, SensorNode};
pub use power::{PowerMode, PowerScheduler, WakeSchedule};
pub use status::{FailureReason, HardwareError, HwResult};
pub use transport::{Address, DispatchTable, MessageTransport, Packet};
pub use xbee::{NetworkIdentity, XBeeRadio};

// Re-export testing items (only with tap-tests feature)
#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
