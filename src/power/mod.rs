//! Power management.
//!
//! - [`schedule`]: fixed-interval and table wake schedules
//! - [`record`]: scheduler state persisted across hibernation
//! - [`strategy`]: board-specific sleep policies
//! - [`scheduler`]: mode selection, exceeded-schedule guard, sleep accumulation

pub mod record;
pub mod schedule;
pub mod scheduler;
pub mod strategy;

pub use record::ScheduleRecord;
pub use schedule::{ScheduleError, WakeSchedule, WakeTable, MAX_TABLE_PAIRS};
pub use scheduler::{
    EnterOutcome, PowerMode, PowerScheduler, SleepHardware, WakeTarget, AUTO_SLEEP_THRESHOLD,
};
pub use strategy::{BoardVariant, IndoorStrategy, SleepPlan, SleepStrategy, WeatherStationStrategy};
