//! Wake schedules.
//!
//! A schedule says how long the node sleeps before the next duty cycle:
//! either a fixed interval or the gaps of a table of strictly increasing
//! offsets. A table walks its pairs `(offsets[i], offsets[i + 1])` and wraps
//! back to the first pair after the last one, so `[0, 5, 13, 20]` sleeps
//! 5 s, 8 s, 7 s, 5 s, 8 s, ...
//!
//! The index moves when the node wakes, not when the next wake is computed.

use crate::hal::StorageError;
use crate::status::HardwareError;
use std::fmt;
use std::time::Duration;

/// Most pairs a table may hold; the persisted record counts them in one byte.
pub const MAX_TABLE_PAIRS: usize = u8::MAX as usize;

/// Table of wake offsets in seconds with the index of the current pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeTable {
    offsets: Vec<u32>,
    index: usize,
}

impl WakeTable {
    /// Table over `offsets`, starting at the first pair.
    ///
    /// Needs at least two strictly increasing offsets and at most
    /// [`MAX_TABLE_PAIRS`] pairs.
    pub fn new(offsets: Vec<u32>) -> Result<Self, ScheduleError> {
        if offsets.len() < 2 {
            return Err(ScheduleError::TooFewOffsets(offsets.len()));
        }
        if offsets.len() - 1 > MAX_TABLE_PAIRS {
            return Err(ScheduleError::TooManyPairs(offsets.len() - 1));
        }
        if let Some(i) = offsets.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ScheduleError::NotIncreasing { index: i + 1 });
        }
        Ok(Self { offsets, index: 0 })
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of `(offsets[i], offsets[i + 1])` pairs.
    pub fn pairs(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Select the pair at `index`.
    pub fn set_index(&mut self, index: usize) -> Result<(), ScheduleError> {
        if index >= self.pairs() {
            return Err(ScheduleError::IndexOutOfRange {
                index,
                pairs: self.pairs(),
            });
        }
        self.index = index;
        Ok(())
    }

    /// Gap of the current pair.
    pub fn current_gap(&self) -> Duration {
        let gap = self.offsets[self.index + 1] - self.offsets[self.index];
        Duration::from_secs(u64::from(gap))
    }

    /// Move to the next pair, wrapping to the first after the last.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.pairs();
    }
}

/// When the node should wake next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeSchedule {
    /// Same sleep every cycle.
    FixedInterval(Duration),
    /// Gaps of an offset table.
    Table(WakeTable),
}

impl WakeSchedule {
    /// Fixed interval schedule; the interval must be at least one second.
    pub fn fixed(interval: Duration) -> Result<Self, ScheduleError> {
        if interval.as_secs() == 0 {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(Self::FixedInterval(interval))
    }

    /// Table schedule over `offsets` (seconds).
    pub fn table(offsets: Vec<u32>) -> Result<Self, ScheduleError> {
        WakeTable::new(offsets).map(Self::Table)
    }

    /// Sleep length before the next wake. Does not move the index.
    pub fn next_offset(&self) -> Duration {
        match self {
            Self::FixedInterval(interval) => *interval,
            Self::Table(table) => table.current_gap(),
        }
    }

    /// Step to the next entry (no-op for a fixed interval).
    pub fn advance(&mut self) {
        if let Self::Table(table) = self {
            table.advance();
        }
    }

    /// Current table index, `None` for a fixed interval.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::FixedInterval(_) => None,
            Self::Table(table) => Some(table.index()),
        }
    }

    /// Number of table pairs, zero for a fixed interval.
    pub fn pairs(&self) -> usize {
        match self {
            Self::FixedInterval(_) => 0,
            Self::Table(table) => table.pairs(),
        }
    }
}

/// Scheduling errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A table needs at least two offsets.
    TooFewOffsets(usize),
    /// A table holds more than [`MAX_TABLE_PAIRS`] pairs.
    TooManyPairs(usize),
    /// `offsets[index]` is not greater than its predecessor.
    NotIncreasing { index: usize },
    /// Table index has no pair.
    IndexOutOfRange { index: usize, pairs: usize },
    /// Fixed interval shorter than one second.
    ZeroInterval,
    /// The real-time clock could not be read or set.
    Clock(HardwareError),
    /// The schedule record could not be persisted.
    Storage(StorageError),
}

impl From<StorageError> for ScheduleError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewOffsets(n) => write!(f, "wake table needs at least 2 offsets, got {}", n),
            Self::TooManyPairs(n) => {
                write!(f, "wake table has {} pairs, at most {} allowed", n, MAX_TABLE_PAIRS)
            }
            Self::NotIncreasing { index } => {
                write!(f, "wake table offset {} does not increase", index)
            }
            Self::IndexOutOfRange { index, pairs } => {
                write!(f, "wake table index {} out of range ({} pairs)", index, pairs)
            }
            Self::ZeroInterval => write!(f, "wake interval must be at least one second"),
            Self::Clock(e) => write!(f, "clock error: {}", e),
            Self::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ScheduleError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_table_gaps_then_wrap() {
        let mut schedule = WakeSchedule::table(vec![0, 5, 13, 20]).unwrap();
        let mut gaps = Vec::new();
        for _ in 0..5 {
            gaps.push(schedule.next_offset());
            schedule.advance();
        }
        assert_eq!(gaps, vec![secs(5), secs(8), secs(7), secs(5), secs(8)]);
    }

    #[test]
    fn test_computing_does_not_advance() {
        let schedule = WakeSchedule::table(vec![0, 5, 13]).unwrap();
        assert_eq!(schedule.next_offset(), secs(5));
        assert_eq!(schedule.next_offset(), secs(5));
        assert_eq!(schedule.index(), Some(0));
    }

    #[test]
    fn test_fixed_interval() {
        let mut schedule = WakeSchedule::fixed(secs(30)).unwrap();
        schedule.advance();
        assert_eq!(schedule.next_offset(), secs(30));
        assert_eq!(schedule.index(), None);
        assert_eq!(
            WakeSchedule::fixed(Duration::from_millis(500)),
            Err(ScheduleError::ZeroInterval)
        );
    }

    #[test]
    fn test_table_validation() {
        assert_eq!(
            WakeSchedule::table(vec![10]),
            Err(ScheduleError::TooFewOffsets(1))
        );
        assert_eq!(
            WakeSchedule::table(vec![0, 5, 5, 9]),
            Err(ScheduleError::NotIncreasing { index: 2 })
        );
        let too_long: Vec<u32> = (0..=MAX_TABLE_PAIRS as u32 + 1).collect();
        assert_eq!(
            WakeSchedule::table(too_long),
            Err(ScheduleError::TooManyPairs(MAX_TABLE_PAIRS + 1))
        );
    }

    #[test]
    fn test_set_index_bounds() {
        let mut table = WakeTable::new(vec![0, 5, 13, 20]).unwrap();
        assert!(table.set_index(2).is_ok());
        assert_eq!(table.current_gap(), secs(7));
        assert_eq!(
            table.set_index(3),
            Err(ScheduleError::IndexOutOfRange { index: 3, pairs: 3 })
        );
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use xbee_sensor_node_macros::tap_test;

    #[tap_test]
    fn table_wraps_on_device() {
        let mut table = WakeTable::new(vec![0, 5, 13]).expect("valid table");
        table.advance();
        assert_eq!(table.current_gap(), Duration::from_secs(8));
        table.advance();
        assert_eq!(table.index(), 0);
    }
}
