//! Real-time clock collaborator.
//!
//! The RTC keeps running through every low-power mode and is the only time
//! base that survives `Hibernate`. Wake targets are absolute RTC times.

use crate::status::HwResult;
use std::fmt;
use std::time::Duration;

/// Absolute RTC time, in whole seconds since the clock epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RtcTime(u32);

impl RtcTime {
    /// Create a time from seconds since the clock epoch.
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    /// Create a time from days, hours, minutes and seconds.
    pub const fn from_dhms(days: u32, hours: u32, minutes: u32, seconds: u32) -> Self {
        Self(days * 86_400 + hours * 3_600 + minutes * 60 + seconds)
    }

    /// Seconds since the clock epoch.
    pub const fn as_secs(self) -> u32 {
        self.0
    }

    /// Second within the current minute (0-59).
    pub const fn second(self) -> u32 {
        self.0 % 60
    }

    /// Whether this time lies exactly on a minute boundary.
    pub const fn is_minute_boundary(self) -> bool {
        self.second() == 0
    }

    /// This time shifted forward by `offset`, saturating at the clock limit.
    pub fn plus(self, offset: Duration) -> Self {
        let secs = u32::try_from(offset.as_secs()).unwrap_or(u32::MAX);
        Self(self.0.saturating_add(secs))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_since(self, earlier: RtcTime) -> Duration {
        Duration::from_secs(u64::from(self.0.saturating_sub(earlier.0)))
    }
}

impl fmt::Display for RtcTime {
    /// Alarm notation `dd:hh:mm:ss`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.0 / 86_400;
        let hours = (self.0 / 3_600) % 24;
        let minutes = (self.0 / 60) % 60;
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            days,
            hours,
            minutes,
            self.second()
        )
    }
}

/// RTC operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcMode {
    /// Time keeping only, alarm output disabled.
    Normal,
    /// Alarm armed to wake the node.
    Alarm,
}

/// Real-time clock operations used by the scheduler.
pub trait RealTimeClock {
    /// Power the clock's bus interface up.
    fn power_on(&mut self) -> HwResult<()>;

    /// Power the clock's bus interface down (time keeping continues).
    fn power_off(&mut self) -> HwResult<()>;

    /// Select the operating mode.
    fn set_mode(&mut self, mode: RtcMode) -> HwResult<()>;

    /// Read the current time.
    fn time(&mut self) -> HwResult<RtcTime>;

    /// Arm the alarm at an absolute time.
    fn set_alarm(&mut self, at: RtcTime) -> HwResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_alarm_notation() {
        assert_eq!(RtcTime::from_dhms(1, 2, 3, 4).to_string(), "01:02:03:04");
    }

    #[test]
    fn test_minute_boundary() {
        assert!(RtcTime::from_dhms(0, 0, 5, 0).is_minute_boundary());
        assert!(!RtcTime::from_dhms(0, 0, 5, 1).is_minute_boundary());
    }

    #[test]
    fn test_arithmetic_saturates() {
        let t = RtcTime::from_secs(100);
        assert_eq!(t.plus(Duration::from_secs(20)).as_secs(), 120);
        assert_eq!(
            RtcTime::from_secs(50).saturating_since(t),
            Duration::ZERO
        );
        assert_eq!(RtcTime::from_secs(u32::MAX).plus(Duration::from_secs(5)).as_secs(), u32::MAX);
    }
}
