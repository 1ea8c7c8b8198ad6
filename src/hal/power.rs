//! Hardware sleep primitives.

use super::clock::RtcTime;
use std::fmt;

/// Watchdog sleep quanta supported by `Sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepQuantum {
    OneSecond,
    TwoSeconds,
    EightSeconds,
}

impl SleepQuantum {
    /// Length of the quantum in seconds.
    pub const fn as_secs(self) -> u32 {
        match self {
            Self::OneSecond => 1,
            Self::TwoSeconds => 2,
            Self::EightSeconds => 8,
        }
    }
}

/// What happens to the radio module while the node sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioSleepPolicy {
    /// Radio supply switched off; powered on again after wake.
    #[default]
    PowerOff,
    /// Radio left in its own sleep mode (keeps its association); woken after wake.
    RadioSleep,
}

impl RadioSleepPolicy {
    /// Whether the radio loses power under this policy.
    pub fn powers_radio_off(self) -> bool {
        matches!(self, Self::PowerOff)
    }
}

/// External interrupt lines that may end a sleep early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Rain gauge (tipping bucket) pulse.
    RainGauge,
    /// Any other board interrupt, identified by its line number.
    Other(u8),
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RainGauge => write!(f, "rain gauge"),
            Self::Other(line) => write!(f, "interrupt line {}", line),
        }
    }
}

/// Extra wake sources enabled during `DeepSleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeSources {
    /// Wake on rain gauge pulses.
    pub rain_gauge: bool,
}

/// Why a sleep primitive returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// The RTC alarm fired.
    Alarm,
    /// The watchdog quantum elapsed.
    Watchdog,
    /// An external interrupt fired before the timer.
    External(Interrupt),
}

/// Hardware low-power primitives.
///
/// `hibernate` does not return on real hardware: the process image is lost
/// and execution restarts at the firmware entry point. Simulated
/// implementations return so tests can drive the wake entry point directly.
pub trait PowerControl {
    /// Sleep for one watchdog quantum. The process image is kept.
    fn sleep(&mut self, quantum: SleepQuantum, radio: RadioSleepPolicy) -> WakeCause;

    /// Sleep until the RTC alarm at `alarm` (or an enabled interrupt).
    /// The process image is kept.
    fn deep_sleep(
        &mut self,
        alarm: RtcTime,
        radio: RadioSleepPolicy,
        sources: WakeSources,
    ) -> WakeCause;

    /// Power everything down except the RTC until `alarm`.
    fn hibernate(&mut self, alarm: RtcTime) -> WakeCause;
}
