//! Scheduler state persisted across power loss.
//!
//! Hibernate keeps only the RTC running; the node restarts from its entry
//! point and rebuilds the scheduler from this record.
//!
//! Body layout (big-endian):
//!
//! ```text
//! [index: 2][wake target secs: 4][table pairs: 1]
//! ```
//!
//! `table pairs` is zero for a fixed interval. A record whose pair count
//! does not match the configured schedule is ignored, so a firmware update
//! that changes the table never resumes at a stale index.

use super::schedule::WakeSchedule;
use crate::hal::clock::RtcTime;
use crate::hal::storage::{self, NonVolatileStore, StorageError};

/// Store address of the schedule record.
pub const SCHEDULE_RECORD_ADDR: usize = 0x00;

const SCHEDULE_RECORD_MAGIC: u8 = 0x5C;

const BODY_LEN: usize = 7;

/// Persisted scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRecord {
    /// Current wake table index (0 for a fixed interval).
    pub index: u16,
    /// Absolute wake target.
    pub target: RtcTime,
    /// Pair count of the table the index belongs to.
    pub table_pairs: u8,
}

impl ScheduleRecord {
    /// Snapshot `schedule` with its wake `target`.
    pub fn capture(schedule: &WakeSchedule, target: RtcTime) -> Self {
        // Tables hold at most MAX_TABLE_PAIRS pairs, so both fit.
        Self {
            index: u16::try_from(schedule.index().unwrap_or(0)).unwrap_or(u16::MAX),
            target,
            table_pairs: u8::try_from(schedule.pairs()).unwrap_or(u8::MAX),
        }
    }

    /// Whether the record belongs to `schedule`.
    pub fn matches(&self, schedule: &WakeSchedule) -> bool {
        usize::from(self.table_pairs) == schedule.pairs()
            && usize::from(self.index) < schedule.pairs().max(1)
    }

    fn to_bytes(self) -> [u8; BODY_LEN] {
        let mut body = [0u8; BODY_LEN];
        body[..2].copy_from_slice(&self.index.to_be_bytes());
        body[2..6].copy_from_slice(&self.target.as_secs().to_be_bytes());
        body[6] = self.table_pairs;
        body
    }

    fn from_bytes(body: &[u8]) -> Option<Self> {
        if body.len() != BODY_LEN {
            return None;
        }
        Some(Self {
            index: u16::from_be_bytes([body[0], body[1]]),
            target: RtcTime::from_secs(u32::from_be_bytes([body[2], body[3], body[4], body[5]])),
            table_pairs: body[6],
        })
    }

    /// Write the record, verifying it reads back.
    pub fn store(&self, store: &mut dyn NonVolatileStore) -> Result<(), StorageError> {
        storage::write_record(
            store,
            SCHEDULE_RECORD_ADDR,
            SCHEDULE_RECORD_MAGIC,
            &self.to_bytes(),
        )
    }

    /// Read the record; `None` if absent, corrupted or of another layout.
    pub fn load(store: &mut dyn NonVolatileStore) -> Result<Option<Self>, StorageError> {
        let body = storage::read_record(store, SCHEDULE_RECORD_ADDR, SCHEDULE_RECORD_MAGIC)?;
        Ok(body.and_then(|b| Self::from_bytes(&b)))
    }

    /// Forget the stored record.
    pub fn clear(store: &mut dyn NonVolatileStore) -> Result<(), StorageError> {
        storage::erase_record(store, SCHEDULE_RECORD_ADDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MemoryStore;
    use std::time::Duration;

    #[test]
    fn test_store_and_load() {
        let mut store = MemoryStore::default();
        assert_eq!(ScheduleRecord::load(&mut store).unwrap(), None);

        let record = ScheduleRecord {
            index: 2,
            target: RtcTime::from_dhms(0, 1, 2, 3),
            table_pairs: 3,
        };
        record.store(&mut store).unwrap();
        assert_eq!(ScheduleRecord::load(&mut store).unwrap(), Some(record));

        ScheduleRecord::clear(&mut store).unwrap();
        assert_eq!(ScheduleRecord::load(&mut store).unwrap(), None);
    }

    #[test]
    fn test_record_must_match_schedule() {
        let mut table = WakeSchedule::table(vec![0, 5, 13, 20]).unwrap();
        table.advance();
        let record = ScheduleRecord::capture(&table, RtcTime::from_secs(100));
        assert_eq!(record.index, 1);
        assert!(record.matches(&table));

        let shorter = WakeSchedule::table(vec![0, 5]).unwrap();
        assert!(!record.matches(&shorter));

        let fixed = WakeSchedule::fixed(Duration::from_secs(60)).unwrap();
        let fixed_record = ScheduleRecord::capture(&fixed, RtcTime::from_secs(60));
        assert!(fixed_record.matches(&fixed));
        assert!(!fixed_record.matches(&table));
    }

    #[test]
    fn test_largest_table_keeps_its_index() {
        let offsets: Vec<u32> = (0..=crate::power::MAX_TABLE_PAIRS as u32).collect();
        let mut table = WakeSchedule::table(offsets).unwrap();
        for _ in 0..254 {
            table.advance();
        }
        let record = ScheduleRecord::capture(&table, RtcTime::from_secs(10));
        assert_eq!(record.index, 254);
        assert_eq!(record.table_pairs, 255);
        assert!(record.matches(&table));
    }
}
