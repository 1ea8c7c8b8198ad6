//! XBee ZigBee module support.
//!
//! - [`config`]: network identity pushed into the module, radio defaults
//! - [`frame`]: API frame codec
//! - [`driver`]: [`Radio`](crate::hal::Radio) implementation over a serial link

pub mod config;
pub mod driver;
pub mod frame;

pub use config::{
    load_identity, save_identity, ConfigField, IdentityError, NetworkIdentity,
    DEFAULT_ENERGY_SCAN_DURATION, DEFAULT_PAN_ID, DEFAULT_SCAN_CHANNELS, INBOUND_QUEUE_CAPACITY,
    POWER_CYCLE_OFF_TIME, POWER_ON_SETTLE,
};
pub use driver::{ModulePins, SerialLink, XBeeRadio};
pub use frame::{ApiFrame, FrameDecoder, FrameError};
