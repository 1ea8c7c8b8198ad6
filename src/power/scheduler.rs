//! Duty-cycle power scheduler.
//!
//! Modes, lightest to heaviest:
//!
//! | Mode | Process image | Timer | Wake sources |
//! |------|---------------|-------|--------------|
//! | `Sleep` | kept | watchdog quanta (8 s, 2 s, 1 s) | watchdog |
//! | `DeepSleep` | kept | RTC alarm | alarm, enabled interrupts |
//! | `Hibernate` | lost | RTC alarm | alarm |
//!
//! The scheduler keeps an absolute wake target. Every wake re-arms it from
//! the wake time with the schedule's next offset. Entering a mode after the
//! target has passed skips one schedule step instead of sleeping.

use super::record::ScheduleRecord;
use super::schedule::{ScheduleError, WakeSchedule};
use super::strategy::{SleepPlan, SleepStrategy};
use crate::hal::{
    NonVolatileStore, PowerControl, Radio, RadioSleepPolicy, RealTimeClock, RtcMode, RtcTime,
    SleepQuantum, StorageError, WakeCause,
};
use log::{debug, error, info, warn};
use std::time::Duration;

/// Offsets up to this long use `Sleep` in automatic mode selection.
pub const AUTO_SLEEP_THRESHOLD: Duration = Duration::from_secs(20);

/// Seconds covered by one 8 s + 2 s pair of watchdog quanta.
const COARSE_STEP_SECS: u64 = 10;

/// Low-power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Sleep,
    DeepSleep,
    Hibernate,
}

/// Next wake computed by [`PowerScheduler::arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeTarget {
    pub offset: Duration,
    pub at: RtcTime,
}

/// What [`PowerScheduler::enter_mode`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    /// Slept and woke up at `at`.
    Woke {
        mode: PowerMode,
        cause: WakeCause,
        at: RtcTime,
    },
    /// The wake target had already passed; nothing slept.
    Skipped { missed_by: Duration },
}

/// Hardware the scheduler drives while entering and leaving a mode.
pub struct SleepHardware<'a> {
    pub radio: &'a mut dyn Radio,
    pub clock: &'a mut dyn RealTimeClock,
    pub power: &'a mut dyn PowerControl,
    pub store: &'a mut dyn NonVolatileStore,
}

/// Chooses low-power modes and tracks the wake schedule.
pub struct PowerScheduler {
    schedule: WakeSchedule,
    target: Option<RtcTime>,
    awake_at: Option<RtcTime>,
    strategy: Box<dyn SleepStrategy>,
}

impl PowerScheduler {
    /// Scheduler at the start of `schedule`, without a wake target.
    pub fn new(schedule: WakeSchedule, strategy: Box<dyn SleepStrategy>) -> Self {
        Self {
            schedule,
            target: None,
            awake_at: None,
            strategy,
        }
    }

    /// Scheduler resumed from the record in `store`.
    ///
    /// Falls back to the start of `schedule` when no matching record exists.
    pub fn restore(
        schedule: WakeSchedule,
        strategy: Box<dyn SleepStrategy>,
        store: &mut dyn NonVolatileStore,
    ) -> Self {
        let mut scheduler = Self::new(schedule, strategy);
        scheduler.restore_from(store);
        scheduler
    }

    pub fn schedule(&self) -> &WakeSchedule {
        &self.schedule
    }

    /// Absolute wake target, once armed.
    pub fn target(&self) -> Option<RtcTime> {
        self.target
    }

    /// RTC time of the last wake.
    pub fn awake_at(&self) -> Option<RtcTime> {
        self.awake_at
    }

    pub fn strategy_mut(&mut self) -> &mut dyn SleepStrategy {
        self.strategy.as_mut()
    }

    /// How the board sleeps when `mode` is requested with `radio`.
    pub fn plan(&self, mode: PowerMode, radio: RadioSleepPolicy) -> SleepPlan {
        self.strategy.plan(mode, radio)
    }

    /// Sleep length before the next wake. Does not move the schedule.
    pub fn compute_next_wake(&self) -> Duration {
        self.schedule.next_offset()
    }

    /// Arm the wake target from the current RTC time.
    pub fn arm(&mut self, clock: &mut dyn RealTimeClock) -> Result<WakeTarget, ScheduleError> {
        let now = read_clock(clock)?;
        let at = self.arm_from(now);
        Ok(WakeTarget {
            offset: self.compute_next_wake(),
            at,
        })
    }

    /// Remember the current RTC time as the moment the node woke.
    pub fn mark_awake(&mut self, clock: &mut dyn RealTimeClock) -> Result<RtcTime, ScheduleError> {
        let now = read_clock(clock)?;
        self.awake_at = Some(now);
        Ok(now)
    }

    /// Mode for the next offset: `Sleep` with the radio in its own sleep
    /// for short offsets, `Hibernate` otherwise.
    pub fn auto_mode(&self) -> (PowerMode, RadioSleepPolicy) {
        if self.compute_next_wake() <= AUTO_SLEEP_THRESHOLD {
            (PowerMode::Sleep, RadioSleepPolicy::RadioSleep)
        } else {
            (PowerMode::Hibernate, RadioSleepPolicy::PowerOff)
        }
    }

    /// [`enter_mode`](Self::enter_mode) with [`auto_mode`](Self::auto_mode).
    pub fn enter_auto(&mut self, hw: &mut SleepHardware<'_>) -> Result<EnterOutcome, ScheduleError> {
        let (mode, radio) = self.auto_mode();
        self.enter_mode(mode, radio, hw)
    }

    /// Sleep in `mode` until the wake target.
    ///
    /// Returns once the node is awake again with clock and radio restored and
    /// the schedule advanced. On real hardware `Hibernate` does not return;
    /// the firmware restarts and calls [`restore`](Self::restore) and
    /// [`wake_from_hibernate`](Self::wake_from_hibernate).
    pub fn enter_mode(
        &mut self,
        mode: PowerMode,
        radio: RadioSleepPolicy,
        hw: &mut SleepHardware<'_>,
    ) -> Result<EnterOutcome, ScheduleError> {
        let now = read_clock(hw.clock)?;
        let target = match self.target {
            Some(target) => target,
            None => self.arm_from(now),
        };

        if now >= target {
            let missed_by = now.saturating_since(target);
            warn!(
                "Wake target {} already passed at {}, skipping one schedule step",
                target, now
            );
            self.schedule.advance();
            self.arm_from(now);
            if let Err(e) = self.persist(hw.store) {
                warn!("Failed to store schedule after skip: {}", e);
            }
            return Ok(EnterOutcome::Skipped { missed_by });
        }

        let plan = self.strategy.plan(mode, radio);
        info!(
            "{:?} at {} until {} ({} board)",
            plan.mode,
            now,
            target,
            self.strategy.name()
        );
        match plan.mode {
            PowerMode::Hibernate => self.hibernate(target, hw),
            PowerMode::DeepSleep => self.deep_sleep(target, plan, hw),
            PowerMode::Sleep => self.sleep(now, plan, hw),
        }
    }

    /// Wake entry after hibernation: restore clock and radio, step the schedule.
    pub fn wake_from_hibernate(&mut self, hw: &mut SleepHardware<'_>) -> Result<RtcTime, ScheduleError> {
        if let Err(e) = hw.radio.power_on() {
            warn!("Radio power on after hibernate failed: {}", e);
        }
        let at = self.on_wake(hw.clock)?;
        if let Err(e) = self.persist(hw.store) {
            warn!("Failed to store schedule after wake: {}", e);
        }
        info!("Awake from hibernate at {}", at);
        Ok(at)
    }

    fn hibernate(
        &mut self,
        target: RtcTime,
        hw: &mut SleepHardware<'_>,
    ) -> Result<EnterOutcome, ScheduleError> {
        if let Err(e) = self.persist(hw.store) {
            error!("Cannot store schedule ({}), using DeepSleep instead of Hibernate", e);
            let plan = SleepPlan {
                mode: PowerMode::DeepSleep,
                radio: RadioSleepPolicy::PowerOff,
                sources: Default::default(),
            };
            return self.deep_sleep(target, plan, hw);
        }
        arm_alarm(hw.clock, target)?;
        if let Err(e) = hw.radio.power_off() {
            warn!("Radio power off failed: {}", e);
        }

        let cause = hw.power.hibernate(target);

        // Only simulated hardware gets here; the process image is gone on a
        // real board, so resume from the store exactly like a restart.
        self.target = None;
        self.restore_from(hw.store);
        let at = self.wake_from_hibernate(hw)?;
        Ok(EnterOutcome::Woke {
            mode: PowerMode::Hibernate,
            cause,
            at,
        })
    }

    fn deep_sleep(
        &mut self,
        target: RtcTime,
        plan: SleepPlan,
        hw: &mut SleepHardware<'_>,
    ) -> Result<EnterOutcome, ScheduleError> {
        if let Err(e) = self.persist(hw.store) {
            warn!("Failed to store schedule before DeepSleep: {}", e);
        }
        arm_alarm(hw.clock, target)?;
        if plan.radio.powers_radio_off() {
            if let Err(e) = hw.radio.power_off() {
                warn!("Radio power off failed: {}", e);
            }
        }

        let cause = loop {
            let cause = hw.power.deep_sleep(target, plan.radio, plan.sources);
            let WakeCause::External(interrupt) = cause else {
                break cause;
            };
            self.strategy.on_interrupt(interrupt);
            let now = read_clock(hw.clock)?;
            if now >= target {
                break cause;
            }
            debug!("Woken at {} by {}, sleeping until {}", now, interrupt, target);
        };

        restore_radio(plan.radio, hw.radio);
        let at = self.on_wake(hw.clock)?;
        info!("Awake from DeepSleep at {}", at);
        Ok(EnterOutcome::Woke {
            mode: PowerMode::DeepSleep,
            cause,
            at,
        })
    }

    /// Accumulate watchdog quanta: 8 s + 2 s pairs while more than ten
    /// seconds remain, then single seconds stopping early on a minute
    /// boundary. The time left is re-read from the RTC after every step, so
    /// a quantum cut short by an interrupt is not counted as slept.
    fn sleep(
        &mut self,
        now: RtcTime,
        plan: SleepPlan,
        hw: &mut SleepHardware<'_>,
    ) -> Result<EnterOutcome, ScheduleError> {
        let awake_for = now.saturating_since(self.awake_at.unwrap_or(now));
        let end = now.plus(self.compute_next_wake().saturating_sub(awake_for));
        let mut remaining = end.saturating_since(now).as_secs();
        debug!("Sleeping until {} ({} s already awake)", end, awake_for.as_secs());

        if plan.radio.powers_radio_off() {
            if let Err(e) = hw.radio.power_off() {
                warn!("Radio power off failed: {}", e);
            }
        }

        let mut cause = WakeCause::Watchdog;
        while remaining > COARSE_STEP_SECS {
            for quantum in [SleepQuantum::EightSeconds, SleepQuantum::TwoSeconds] {
                cause = hw.power.sleep(quantum, plan.radio);
                self.note_early_wake(cause);
            }
            remaining = end.saturating_since(read_clock(hw.clock)?).as_secs();
        }
        while remaining > 1 {
            if read_clock(hw.clock)?.is_minute_boundary() {
                break;
            }
            cause = hw.power.sleep(SleepQuantum::OneSecond, plan.radio);
            self.note_early_wake(cause);
            remaining = end.saturating_since(read_clock(hw.clock)?).as_secs();
        }

        restore_radio(plan.radio, hw.radio);
        let at = self.on_wake(hw.clock)?;
        info!("Awake from Sleep at {}", at);
        Ok(EnterOutcome::Woke {
            mode: PowerMode::Sleep,
            cause,
            at,
        })
    }

    fn note_early_wake(&mut self, cause: WakeCause) {
        if let WakeCause::External(interrupt) = cause {
            self.strategy.on_interrupt(interrupt);
        }
    }

    /// Clock back to normal mode, schedule stepped, target re-armed.
    fn on_wake(&mut self, clock: &mut dyn RealTimeClock) -> Result<RtcTime, ScheduleError> {
        let at = read_clock(clock)?;
        clock.set_mode(RtcMode::Normal).map_err(ScheduleError::Clock)?;
        self.awake_at = Some(at);
        self.schedule.advance();
        self.arm_from(at);
        Ok(at)
    }

    fn arm_from(&mut self, now: RtcTime) -> RtcTime {
        let at = now.plus(self.compute_next_wake());
        self.target = Some(at);
        at
    }

    fn persist(&self, store: &mut dyn NonVolatileStore) -> Result<(), StorageError> {
        ScheduleRecord::capture(&self.schedule, self.target.unwrap_or_default()).store(store)
    }

    fn restore_from(&mut self, store: &mut dyn NonVolatileStore) {
        match ScheduleRecord::load(store) {
            Ok(Some(record)) if record.matches(&self.schedule) => {
                if let WakeSchedule::Table(table) = &mut self.schedule {
                    if let Err(e) = table.set_index(usize::from(record.index)) {
                        warn!("Stored schedule index rejected: {}", e);
                        return;
                    }
                }
                self.target = Some(record.target);
                info!(
                    "Restored schedule at index {} with target {}",
                    record.index, record.target
                );
            }
            Ok(Some(_)) => warn!("Stored schedule does not match configuration, starting over"),
            Ok(None) => info!("No stored schedule, starting at the first entry"),
            Err(e) => warn!("Failed to read stored schedule: {}", e),
        }
    }
}

fn read_clock(clock: &mut dyn RealTimeClock) -> Result<RtcTime, ScheduleError> {
    clock.power_on().map_err(ScheduleError::Clock)?;
    clock.time().map_err(ScheduleError::Clock)
}

fn arm_alarm(clock: &mut dyn RealTimeClock, at: RtcTime) -> Result<(), ScheduleError> {
    clock.set_alarm(at).map_err(ScheduleError::Clock)?;
    clock.set_mode(RtcMode::Alarm).map_err(ScheduleError::Clock)
}

fn restore_radio(policy: RadioSleepPolicy, radio: &mut dyn Radio) {
    let result = match policy {
        RadioSleepPolicy::PowerOff => radio.power_on(),
        RadioSleepPolicy::RadioSleep => radio.wake(),
    };
    if let Err(e) = result {
        warn!("Radio restore after sleep failed: {}", e);
    }
}
