//! ESP32 bindings for the hardware traits.
//!
//! - [`UartLink`]: XBee API frames over a UART
//! - [`XBeePins`]: module supply switch and sleep request line
//! - [`EspClock`]: RTC backed by the ESP-IDF system time, which keeps
//!   counting through deep sleep
//! - [`EspPower`]: light sleep for `Sleep`/`DeepSleep`, deep sleep with a
//!   timer wakeup for `Hibernate`
//!
//! Only compiled with the `esp32` feature.

use crate::hal::{
    Interrupt, PowerControl, RadioSleepPolicy, RealTimeClock, RtcMode, RtcTime, SleepQuantum,
    WakeCause, WakeSources,
};
use crate::node::BootReason;
use crate::status::{FailureReason, HardwareError, HwResult};
use crate::xbee::{ModulePins, SerialLink};
use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, InputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::uart::{config::Config as UartConfig, Uart, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_sys::{self as sys, EspError};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Factory baud rate of XBee modules.
pub const XBEE_BAUD_RATE: u32 = 9600;

fn io_error(what: &str, e: EspError) -> HardwareError {
    HardwareError::failed(FailureReason::Io(format!("{}: {:?}", what, e)))
}

// ============================================================================
// UART
// ============================================================================

/// Serial link to the radio module over a UART.
pub struct UartLink {
    uart: UartDriver<'static>,
}

impl UartLink {
    pub fn new(
        uart: impl Peripheral<P = impl Uart> + 'static,
        tx: impl Peripheral<P = impl OutputPin> + 'static,
        rx: impl Peripheral<P = impl InputPin> + 'static,
    ) -> Result<Self, EspError> {
        let config = UartConfig::default().baudrate(Hertz(XBEE_BAUD_RATE));
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &config,
        )?;
        info!("UART opened at {} baud", XBEE_BAUD_RATE);
        Ok(Self { uart })
    }
}

impl SerialLink for UartLink {
    fn write_all(&mut self, mut bytes: &[u8]) -> HwResult<()> {
        while !bytes.is_empty() {
            let written = self
                .uart
                .write(bytes)
                .map_err(|e| io_error("UART write", e))?;
            bytes = &bytes[written..];
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> HwResult<usize> {
        let ticks = TickType::from(timeout).ticks();
        self.uart
            .read(buf, ticks)
            .map_err(|e| io_error("UART read", e))
    }

    fn bytes_available(&mut self) -> bool {
        matches!(self.uart.remaining_read(), Ok(n) if n > 0)
    }
}

// ============================================================================
// Module pins
// ============================================================================

/// Sleep request line, shared between the radio driver (which releases it on
/// wake) and [`EspPower`] (which asserts it before a radio-sleep period).
pub type SleepRequestLine = Rc<RefCell<PinDriver<'static, AnyOutputPin, Output>>>;

/// Open the sleep request line, initially released (module awake).
pub fn sleep_request_line(
    pin: impl Peripheral<P = impl OutputPin> + 'static,
) -> Result<SleepRequestLine, EspError> {
    let mut driver = PinDriver::output(pin.into_ref().map_into::<AnyOutputPin>())?;
    driver.set_low()?;
    Ok(Rc::new(RefCell::new(driver)))
}

/// Supply switch and sleep request line of the XBee module.
pub struct XBeePins {
    power: PinDriver<'static, AnyOutputPin, Output>,
    sleep: SleepRequestLine,
}

impl XBeePins {
    /// `power` drives the module supply switch (high = on).
    pub fn new(
        power: impl Peripheral<P = impl OutputPin> + 'static,
        sleep: SleepRequestLine,
    ) -> Result<Self, EspError> {
        let mut power = PinDriver::output(power.into_ref().map_into::<AnyOutputPin>())?;
        power.set_low()?;
        Ok(Self { power, sleep })
    }
}

impl ModulePins for XBeePins {
    fn set_power(&mut self, on: bool) -> HwResult<()> {
        let result = if on {
            self.power.set_high()
        } else {
            self.power.set_low()
        };
        result.map_err(|e| io_error("radio supply", e))
    }

    fn set_sleep_request(&mut self, asleep: bool) -> HwResult<()> {
        set_line(&self.sleep, asleep)
    }
}

fn set_line(line: &SleepRequestLine, high: bool) -> HwResult<()> {
    let mut pin = line.borrow_mut();
    let result = if high { pin.set_high() } else { pin.set_low() };
    result.map_err(|e| io_error("sleep request", e))
}

// ============================================================================
// Clock
// ============================================================================

/// RTC built on the ESP-IDF system time.
///
/// The system time is kept by the RTC timer, so it survives deep sleep and
/// hibernation. Seconds wrap at `u32::MAX`.
#[derive(Debug)]
pub struct EspClock {
    powered: bool,
    mode: RtcMode,
    alarm: Option<RtcTime>,
}

impl EspClock {
    pub fn new() -> Self {
        Self {
            powered: false,
            mode: RtcMode::Normal,
            alarm: None,
        }
    }

    pub fn alarm(&self) -> Option<RtcTime> {
        self.alarm
    }

    pub fn mode(&self) -> RtcMode {
        self.mode
    }
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

fn system_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl RealTimeClock for EspClock {
    fn power_on(&mut self) -> HwResult<()> {
        self.powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> HwResult<()> {
        self.powered = false;
        Ok(())
    }

    fn set_mode(&mut self, mode: RtcMode) -> HwResult<()> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        self.mode = mode;
        if mode == RtcMode::Normal {
            self.alarm = None;
        }
        Ok(())
    }

    fn time(&mut self) -> HwResult<RtcTime> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        Ok(RtcTime::from_secs(system_secs()))
    }

    fn set_alarm(&mut self, at: RtcTime) -> HwResult<()> {
        if !self.powered {
            return Err(HardwareError::NotExecuted);
        }
        self.alarm = Some(at);
        Ok(())
    }
}

// ============================================================================
// Sleep
// ============================================================================

/// Sleep primitives on ESP-IDF.
pub struct EspPower {
    sleep_request: SleepRequestLine,
    /// RTC GPIO wired to the rain gauge, when the board has one.
    rain_gauge_gpio: Option<i32>,
}

impl EspPower {
    pub fn new(sleep_request: SleepRequestLine) -> Self {
        Self {
            sleep_request,
            rain_gauge_gpio: None,
        }
    }

    /// Enable rain gauge wakeups on RTC GPIO `gpio` (active low).
    pub fn with_rain_gauge(mut self, gpio: i32) -> Self {
        self.rain_gauge_gpio = Some(gpio);
        self
    }

    fn prepare_radio(&self, radio: RadioSleepPolicy) {
        if radio == RadioSleepPolicy::RadioSleep {
            if let Err(e) = set_line(&self.sleep_request, true) {
                warn!("Failed to request radio sleep: {}", e);
            }
        }
    }

    fn arm_timer(&self, duration: Duration) {
        let micros = duration.as_micros().min(u128::from(u64::MAX)) as u64;
        unsafe {
            sys::esp_sleep_disable_wakeup_source(sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_ALL);
            sys::esp_sleep_enable_timer_wakeup(micros);
        }
    }

    fn arm_rain_gauge(&self) {
        if let Some(gpio) = self.rain_gauge_gpio {
            if let Err(e) = sys::esp!(unsafe { sys::esp_sleep_enable_ext0_wakeup(gpio, 0) }) {
                warn!("Failed to enable rain gauge wakeup: {:?}", e);
            }
        }
    }

    fn light_sleep(&self) -> WakeCause {
        if let Err(e) = sys::esp!(unsafe { sys::esp_light_sleep_start() }) {
            warn!("Light sleep rejected: {:?}", e);
        }
        match current_wake_source() {
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => {
                WakeCause::External(Interrupt::RainGauge)
            }
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Alarm,
            other => {
                debug!("Woken by source {}", other);
                WakeCause::External(Interrupt::Other(other as u8))
            }
        }
    }
}

fn current_wake_source() -> sys::esp_sleep_source_t {
    unsafe { sys::esp_sleep_get_wakeup_cause() }
}

impl PowerControl for EspPower {
    fn sleep(&mut self, quantum: SleepQuantum, radio: RadioSleepPolicy) -> WakeCause {
        self.prepare_radio(radio);
        self.arm_timer(Duration::from_secs(u64::from(quantum.as_secs())));
        match self.light_sleep() {
            WakeCause::Alarm => WakeCause::Watchdog,
            other => other,
        }
    }

    fn deep_sleep(
        &mut self,
        alarm: RtcTime,
        radio: RadioSleepPolicy,
        sources: WakeSources,
    ) -> WakeCause {
        self.prepare_radio(radio);
        let now = RtcTime::from_secs(system_secs());
        self.arm_timer(alarm.saturating_since(now));
        if sources.rain_gauge {
            self.arm_rain_gauge();
        }
        self.light_sleep()
    }

    fn hibernate(&mut self, alarm: RtcTime) -> WakeCause {
        let now = RtcTime::from_secs(system_secs());
        let duration = alarm.saturating_since(now);
        info!("Hibernating for {} s", duration.as_secs());
        self.arm_timer(duration);
        log::logger().flush();
        unsafe { sys::esp_deep_sleep_start() }
    }
}

/// Classify the current boot from the ESP-IDF wakeup cause.
pub fn boot_reason() -> BootReason {
    match current_wake_source() {
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => BootReason::HibernateWake,
        _ => BootReason::PowerOn,
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use xbee_sensor_node_macros::tap_test;

    #[tap_test]
    fn test_clock_requires_power() {
        let mut clock = EspClock::new();
        assert_eq!(clock.time(), Err(HardwareError::NotExecuted));
        clock.power_on().expect("power on");
        assert!(clock.time().is_ok());
    }

    #[tap_test]
    fn test_clock_advances() {
        let mut clock = EspClock::new();
        clock.power_on().expect("power on");
        let start = clock.time().expect("time");
        std::thread::sleep(Duration::from_millis(1100));
        assert!(clock.time().expect("time") > start);
    }

    #[tap_test]
    fn test_normal_mode_disarms_alarm() {
        let mut clock = EspClock::new();
        clock.power_on().expect("power on");
        clock.set_alarm(RtcTime::from_secs(100)).expect("alarm");
        clock.set_mode(RtcMode::Alarm).expect("mode");
        assert_eq!(clock.alarm(), Some(RtcTime::from_secs(100)));
        clock.set_mode(RtcMode::Normal).expect("mode");
        assert_eq!(clock.mode(), RtcMode::Normal);
        assert_eq!(clock.alarm(), None);
    }
}
