//! Board-specific sleep policy.
//!
//! Boards differ in which low-power mode they can use and which interrupts
//! may wake them. The scheduler asks the strategy for a [`SleepPlan`] and
//! hands it every early interrupt wake.

use super::scheduler::PowerMode;
use crate::hal::{Interrupt, RadioSleepPolicy, WakeSources};
use log::{debug, info};

/// How the board will actually sleep for a requested mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub mode: PowerMode,
    pub radio: RadioSleepPolicy,
    pub sources: WakeSources,
}

/// Sleep policy of a board variant.
pub trait SleepStrategy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Turn a requested mode into what the board does.
    fn plan(&self, requested: PowerMode, radio: RadioSleepPolicy) -> SleepPlan;

    /// Handle an interrupt that ended a sleep early.
    fn on_interrupt(&mut self, interrupt: Interrupt);

    /// Interrupts handled since the last [`take_interrupt_count`](Self::take_interrupt_count).
    fn take_interrupt_count(&mut self) -> u32;
}

/// Board without external wake sources: modes are used as requested.
#[derive(Debug, Default)]
pub struct IndoorStrategy {
    interrupts: u32,
}

impl SleepStrategy for IndoorStrategy {
    fn name(&self) -> &'static str {
        "indoor"
    }

    fn plan(&self, requested: PowerMode, radio: RadioSleepPolicy) -> SleepPlan {
        let radio = match requested {
            PowerMode::Hibernate => RadioSleepPolicy::PowerOff,
            _ => radio,
        };
        SleepPlan {
            mode: requested,
            radio,
            sources: WakeSources::default(),
        }
    }

    fn on_interrupt(&mut self, interrupt: Interrupt) {
        debug!("Woken early by {}", interrupt);
        self.interrupts += 1;
    }

    fn take_interrupt_count(&mut self) -> u32 {
        std::mem::take(&mut self.interrupts)
    }
}

/// Weather-station board: the rain gauge must be counted while asleep, so
/// the node always uses `DeepSleep` with the gauge as an extra wake source.
#[derive(Debug, Default)]
pub struct WeatherStationStrategy {
    rain_pulses: u32,
}

impl WeatherStationStrategy {
    /// Rain gauge pulses not yet taken.
    pub fn rain_pulses(&self) -> u32 {
        self.rain_pulses
    }
}

impl SleepStrategy for WeatherStationStrategy {
    fn name(&self) -> &'static str {
        "weather-station"
    }

    fn plan(&self, requested: PowerMode, radio: RadioSleepPolicy) -> SleepPlan {
        if requested != PowerMode::DeepSleep {
            debug!("{:?} requested, weather station uses DeepSleep", requested);
        }
        SleepPlan {
            mode: PowerMode::DeepSleep,
            radio,
            sources: WakeSources { rain_gauge: true },
        }
    }

    fn on_interrupt(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::RainGauge => {
                self.rain_pulses = self.rain_pulses.saturating_add(1);
                debug!("Rain gauge pulse ({} pending)", self.rain_pulses);
            }
            other => info!("Unexpected {} during deep sleep", other),
        }
    }

    fn take_interrupt_count(&mut self) -> u32 {
        std::mem::take(&mut self.rain_pulses)
    }
}

/// Board variant selected in the node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardVariant {
    #[default]
    Indoor,
    WeatherStation,
}

impl BoardVariant {
    /// The variant this firmware was built for.
    pub fn compiled() -> Self {
        if cfg!(feature = "board-weather-station") {
            Self::WeatherStation
        } else {
            Self::Indoor
        }
    }

    /// Build the variant's strategy.
    pub fn strategy(self) -> Box<dyn SleepStrategy> {
        match self {
            Self::Indoor => Box::new(IndoorStrategy::default()),
            Self::WeatherStation => Box::new(WeatherStationStrategy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indoor_keeps_requested_mode() {
        let strategy = IndoorStrategy::default();
        let plan = strategy.plan(PowerMode::Sleep, RadioSleepPolicy::RadioSleep);
        assert_eq!(plan.mode, PowerMode::Sleep);
        assert_eq!(plan.radio, RadioSleepPolicy::RadioSleep);
        assert!(!plan.sources.rain_gauge);

        let plan = strategy.plan(PowerMode::Hibernate, RadioSleepPolicy::RadioSleep);
        assert_eq!(plan.radio, RadioSleepPolicy::PowerOff);
    }

    #[test]
    fn test_weather_station_always_deep_sleeps_with_gauge() {
        let strategy = WeatherStationStrategy::default();
        for requested in [PowerMode::Sleep, PowerMode::DeepSleep, PowerMode::Hibernate] {
            let plan = strategy.plan(requested, RadioSleepPolicy::PowerOff);
            assert_eq!(plan.mode, PowerMode::DeepSleep);
            assert!(plan.sources.rain_gauge);
        }
    }

    #[test]
    fn test_weather_station_counts_rain_pulses() {
        let mut strategy = WeatherStationStrategy::default();
        strategy.on_interrupt(Interrupt::RainGauge);
        strategy.on_interrupt(Interrupt::Other(3));
        strategy.on_interrupt(Interrupt::RainGauge);
        assert_eq!(strategy.rain_pulses(), 2);
        assert_eq!(strategy.take_interrupt_count(), 2);
        assert_eq!(strategy.take_interrupt_count(), 0);
    }
}
