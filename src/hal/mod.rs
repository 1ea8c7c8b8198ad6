//! Hardware collaborators.
//!
//! The node never talks to a peripheral singleton directly. Radio, clock,
//! sleep primitives, timer and store are traits passed in explicitly, so the
//! same duty cycle runs against the ESP32 platform (`platform`), the XBee
//! driver (`xbee`) or the simulated collaborators in [`sim`].

pub mod clock;
pub mod power;
pub mod radio;
pub mod sim;
pub mod storage;
pub mod timer;

pub use clock::{RealTimeClock, RtcMode, RtcTime};
pub use power::{Interrupt, PowerControl, RadioSleepPolicy, SleepQuantum, WakeCause, WakeSources};
pub use radio::Radio;
pub use storage::{MemoryStore, NonVolatileStore, StorageError};
pub use timer::{SystemTimer, Timer};
