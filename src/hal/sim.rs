//! Simulated collaborators for host tests and the `host-node` binary.
//!
//! Every simulated device is a cheap handle around shared state: cloning a
//! [`LoopbackRadio`] or [`SimClock`] yields another view of the same device,
//! so a test can hand one clone to the node and keep another to script and
//! inspect the hardware.
//!
//! Time is a single millisecond counter shared by [`SimClock`], [`SimTimer`]
//! and [`SimPower`]: delays and sleeps advance it, nothing waits for real.

use super::clock::{RealTimeClock, RtcMode, RtcTime};
use super::power::{Interrupt, PowerControl, RadioSleepPolicy, SleepQuantum, WakeCause, WakeSources};
use super::radio::Radio;
use super::timer::Timer;
use crate::status::{FailureReason, HardwareError, HwResult};
use crate::transport::packet::{Address, Origin, Packet, TransmitMode};
use crate::xbee::config::{ConfigField, INBOUND_QUEUE_CAPACITY};
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// Clock and timer
// ============================================================================

#[derive(Debug)]
struct ClockState {
    powered: bool,
    mode: RtcMode,
    alarm: Option<RtcTime>,
}

/// Simulated real-time clock.
///
/// Reads return [`HardwareError::NotExecuted`] until the clock is powered on,
/// like the real part whose bus interface is off after hibernation.
#[derive(Debug, Clone)]
pub struct SimClock {
    now_ms: Rc<Cell<u64>>,
    state: Rc<RefCell<ClockState>>,
}

impl SimClock {
    /// A clock at time zero, powered off.
    pub fn new() -> Self {
        Self::starting_at(RtcTime::default())
    }

    /// A clock at `start`, powered off.
    pub fn starting_at(start: RtcTime) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(u64::from(start.as_secs()) * 1000)),
            state: Rc::new(RefCell::new(ClockState {
                powered: false,
                mode: RtcMode::Normal,
                alarm: None,
            })),
        }
    }

    /// Current time, regardless of power state.
    pub fn now(&self) -> RtcTime {
        RtcTime::from_secs(u32::try_from(self.now_ms.get() / 1000).unwrap_or(u32::MAX))
    }

    /// Let `by` pass (time spent awake doing work).
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .set(self.now_ms.get().saturating_add(by.as_millis() as u64));
    }

    /// Move forward to `at`; never moves backwards.
    pub fn advance_to(&self, at: RtcTime) {
        let target = u64::from(at.as_secs()) * 1000;
        if target > self.now_ms.get() {
            self.now_ms.set(target);
        }
    }

    pub fn alarm(&self) -> Option<RtcTime> {
        self.state.borrow().alarm
    }

    pub fn mode(&self) -> RtcMode {
        self.state.borrow().mode
    }

    pub fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    /// A timer sharing this clock's time base.
    pub fn timer(&self) -> SimTimer {
        SimTimer {
            now_ms: Rc::clone(&self.now_ms),
        }
    }

    /// Sleep primitives that advance this clock.
    pub fn power(&self) -> SimPower {
        SimPower {
            clock: self.clone(),
            interrupts: Rc::new(RefCell::new(Vec::new())),
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn lose_power(&self) {
        let mut state = self.state.borrow_mut();
        state.powered = false;
        state.mode = RtcMode::Normal;
    }

    fn require_power(&self) -> HwResult<()> {
        if self.state.borrow().powered {
            Ok(())
        } else {
            Err(HardwareError::NotExecuted)
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTimeClock for SimClock {
    fn power_on(&mut self) -> HwResult<()> {
        self.state.borrow_mut().powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> HwResult<()> {
        self.state.borrow_mut().powered = false;
        Ok(())
    }

    fn set_mode(&mut self, mode: RtcMode) -> HwResult<()> {
        self.require_power()?;
        self.state.borrow_mut().mode = mode;
        Ok(())
    }

    fn time(&mut self) -> HwResult<RtcTime> {
        self.require_power()?;
        Ok(self.now())
    }

    fn set_alarm(&mut self, at: RtcTime) -> HwResult<()> {
        self.require_power()?;
        self.state.borrow_mut().alarm = Some(at);
        Ok(())
    }
}

/// [`Timer`] over the simulated time base; `delay_ms` returns immediately.
#[derive(Debug, Clone)]
pub struct SimTimer {
    now_ms: Rc<Cell<u64>>,
}

impl Timer for SimTimer {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }
}

// ============================================================================
// Power control
// ============================================================================

/// A sleep primitive invocation recorded by [`SimPower`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Sleep {
        quantum: SleepQuantum,
        radio: RadioSleepPolicy,
    },
    DeepSleep {
        alarm: RtcTime,
        radio: RadioSleepPolicy,
        sources: WakeSources,
    },
    Hibernate {
        alarm: RtcTime,
    },
}

/// Simulated sleep primitives.
///
/// Sleeping advances the shared clock. Interrupts scheduled with
/// [`SimPower::schedule_interrupt`] end a sleep early when enabled.
/// `hibernate` returns (the real one does not) and leaves the clock powered
/// off, so tests continue at the wake entry point.
#[derive(Debug, Clone)]
pub struct SimPower {
    clock: SimClock,
    interrupts: Rc<RefCell<Vec<(RtcTime, Interrupt)>>>,
    events: Rc<RefCell<Vec<PowerEvent>>>,
}

impl SimPower {
    /// Fire `interrupt` at `at`.
    pub fn schedule_interrupt(&self, at: RtcTime, interrupt: Interrupt) {
        let mut irqs = self.interrupts.borrow_mut();
        irqs.push((at, interrupt));
        irqs.sort_by_key(|(t, _)| *t);
    }

    /// Sleep primitives invoked so far.
    pub fn events(&self) -> Vec<PowerEvent> {
        self.events.borrow().clone()
    }

    /// Drain the recorded events.
    pub fn take_events(&self) -> Vec<PowerEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// First interrupt due before `until` that `enabled` accepts.
    /// Disabled interrupts due before `until` are consumed.
    fn next_interrupt(
        &self,
        until: RtcTime,
        enabled: impl Fn(Interrupt) -> bool,
    ) -> Option<(RtcTime, Interrupt)> {
        let mut irqs = self.interrupts.borrow_mut();
        while let Some(&(at, irq)) = irqs.first() {
            if at >= until {
                return None;
            }
            irqs.remove(0);
            if enabled(irq) {
                return Some((at, irq));
            }
            log::debug!("Ignoring disabled {} at {}", irq, at);
        }
        None
    }

    fn record(&self, event: PowerEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl PowerControl for SimPower {
    fn sleep(&mut self, quantum: SleepQuantum, radio: RadioSleepPolicy) -> WakeCause {
        self.record(PowerEvent::Sleep { quantum, radio });
        let until = self
            .clock
            .now()
            .plus(Duration::from_secs(u64::from(quantum.as_secs())));
        match self.next_interrupt(until, |_| true) {
            Some((at, irq)) => {
                self.clock.advance_to(at);
                WakeCause::External(irq)
            }
            None => {
                self.clock.advance_to(until);
                WakeCause::Watchdog
            }
        }
    }

    fn deep_sleep(
        &mut self,
        alarm: RtcTime,
        radio: RadioSleepPolicy,
        sources: WakeSources,
    ) -> WakeCause {
        self.record(PowerEvent::DeepSleep {
            alarm,
            radio,
            sources,
        });
        let enabled = |irq: Interrupt| match irq {
            Interrupt::RainGauge => sources.rain_gauge,
            Interrupt::Other(_) => true,
        };
        match self.next_interrupt(alarm, enabled) {
            Some((at, irq)) => {
                self.clock.advance_to(at);
                WakeCause::External(irq)
            }
            None => {
                self.clock.advance_to(alarm);
                WakeCause::Alarm
            }
        }
    }

    fn hibernate(&mut self, alarm: RtcTime) -> WakeCause {
        self.record(PowerEvent::Hibernate { alarm });
        let _ = self.next_interrupt(alarm, |_| false);
        self.clock.advance_to(alarm);
        self.clock.lose_power();
        WakeCause::Alarm
    }
}

// ============================================================================
// Loopback radio
// ============================================================================

/// Power transitions seen by [`LoopbackRadio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPowerEvent {
    On,
    Off,
    Wake,
}

#[derive(Debug)]
struct LoopbackState {
    present: bool,
    powered: bool,
    pan: [u8; 8],
    scan_channels: u16,
    energy_scan_duration: u8,
    channel_verification: bool,
    node_identifier: Option<String>,
    committed_channel_verification: Option<bool>,
    writes: usize,
    rejected: HashSet<ConfigField>,
    indications: VecDeque<HwResult<u8>>,
    idle_indication: u8,
    extended_pan: [u8; 8],
    operating_pan: u16,
    channel: u8,
    echo: bool,
    air: VecDeque<(Vec<u8>, Address, u8)>,
    pending: Vec<Packet>,
    dropped: usize,
    sent: Vec<Packet>,
    send_errors: VecDeque<HardwareError>,
    reassembly_error: Option<HardwareError>,
    power_events: Vec<RadioPowerEvent>,
}

/// Simulated radio module that echoes every sent packet back to the node.
///
/// The echo arrives as if the destination had answered with the same packet
/// ID and payload: its origin is the destination address. Packets travel
/// through the application header codec in both directions. Completed
/// packets are held LIFO, at most [`INBOUND_QUEUE_CAPACITY`] at a time.
#[derive(Debug, Clone)]
pub struct LoopbackRadio {
    state: Rc<RefCell<LoopbackState>>,
}

impl LoopbackRadio {
    /// A present, powered-off radio that reports "scanning" until scripted.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(LoopbackState {
                present: true,
                powered: false,
                pan: [0; 8],
                scan_channels: 0,
                energy_scan_duration: 0,
                channel_verification: false,
                node_identifier: None,
                committed_channel_verification: None,
                writes: 0,
                rejected: HashSet::new(),
                indications: VecDeque::new(),
                idle_indication: 0xFF,
                extended_pan: [0, 0, 0, 0, 0, 0, 0x13, 0x02],
                operating_pan: 0x1302,
                channel: 0x0C,
                echo: true,
                air: VecDeque::new(),
                pending: Vec::new(),
                dropped: 0,
                sent: Vec::new(),
                send_errors: VecDeque::new(),
                reassembly_error: None,
                power_events: Vec::new(),
            })),
        }
    }

    /// A radio that is not fitted: every command is not executed.
    pub fn absent() -> Self {
        let radio = Self::new();
        radio.state.borrow_mut().present = false;
        radio
    }

    /// A radio that reports "joined" on every poll.
    pub fn joined() -> Self {
        let radio = Self::new();
        radio.set_idle_indication(0x00);
        radio
    }

    /// Queue indication results returned by the next polls.
    pub fn script_indications(&self, results: impl IntoIterator<Item = HwResult<u8>>) {
        self.state.borrow_mut().indications.extend(results);
    }

    /// Indication returned once the script is exhausted.
    pub fn set_idle_indication(&self, code: u8) {
        self.state.borrow_mut().idle_indication = code;
    }

    /// Network parameters reported after joining.
    pub fn set_network(&self, extended_pan: [u8; 8], operating_pan: u16, channel: u8) {
        let mut state = self.state.borrow_mut();
        state.extended_pan = extended_pan;
        state.operating_pan = operating_pan;
        state.channel = channel;
    }

    /// Answer writes of `field` with a failure status.
    pub fn reject(&self, field: ConfigField) {
        self.state.borrow_mut().rejected.insert(field);
    }

    /// Fail the next send with `error`.
    pub fn fail_next_send(&self, error: HardwareError) {
        self.state.borrow_mut().send_errors.push_back(error);
    }

    /// Fail the next reassembly with `error`.
    pub fn fail_next_reassembly(&self, error: HardwareError) {
        self.state.borrow_mut().reassembly_error = Some(error);
    }

    /// Enable or disable echoing sent packets.
    pub fn set_echo(&self, echo: bool) {
        self.state.borrow_mut().echo = echo;
    }

    /// Put raw RF data on the air as if received for `destination`.
    pub fn inject(&self, rf_data: Vec<u8>, destination: Address, hops: u8) {
        self.state
            .borrow_mut()
            .air
            .push_back((rf_data, destination, hops));
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.state.borrow().sent.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn dropped(&self) -> usize {
        self.state.borrow().dropped
    }

    pub fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    pub fn pan(&self) -> [u8; 8] {
        self.state.borrow().pan
    }

    pub fn scan_channels(&self) -> u16 {
        self.state.borrow().scan_channels
    }

    pub fn energy_scan_duration(&self) -> u8 {
        self.state.borrow().energy_scan_duration
    }

    pub fn node_identifier(&self) -> Option<String> {
        self.state.borrow().node_identifier.clone()
    }

    /// Channel verification as currently set (committed or not).
    pub fn channel_verification(&self) -> bool {
        self.state.borrow().channel_verification
    }

    /// Channel verification as of the last successful write.
    pub fn committed_channel_verification(&self) -> Option<bool> {
        self.state.borrow().committed_channel_verification
    }

    /// Successful configuration writes.
    pub fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn power_events(&self) -> Vec<RadioPowerEvent> {
        self.state.borrow().power_events.clone()
    }

    fn command(&self, field: Option<ConfigField>) -> HwResult<()> {
        let state = self.state.borrow();
        if !state.present || !state.powered {
            return Err(HardwareError::NotExecuted);
        }
        match field {
            Some(f) if state.rejected.contains(&f) => {
                Err(HardwareError::failed(FailureReason::CommandStatus(0x01)))
            }
            _ => Ok(()),
        }
    }

    fn echo_of(packet: &Packet) -> Packet {
        Packet {
            mode: TransmitMode::Unicast,
            origin: Origin::from(packet.destination),
            destination: packet.origin.address().unwrap_or(Address::BROADCAST),
            packet_id: packet.packet_id,
            payload: packet.payload.clone(),
            hops: packet.hops,
        }
    }
}

impl Default for LoopbackRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for LoopbackRadio {
    fn set_pan(&mut self, pan: &[u8; 8]) -> HwResult<()> {
        self.command(Some(ConfigField::PanId))?;
        self.state.borrow_mut().pan = *pan;
        Ok(())
    }

    fn set_scanning_channels(&mut self, mask: u16) -> HwResult<()> {
        self.command(Some(ConfigField::ScanChannels))?;
        self.state.borrow_mut().scan_channels = mask;
        Ok(())
    }

    fn set_energy_scan_duration(&mut self, exponent: u8) -> HwResult<()> {
        self.command(Some(ConfigField::EnergyScanDuration))?;
        self.state.borrow_mut().energy_scan_duration = exponent;
        Ok(())
    }

    fn set_channel_verification(&mut self, enabled: bool) -> HwResult<()> {
        self.command(Some(ConfigField::ChannelVerification))?;
        self.state.borrow_mut().channel_verification = enabled;
        Ok(())
    }

    fn set_node_identifier(&mut self, id: &str) -> HwResult<()> {
        self.command(Some(ConfigField::NodeIdentifier))?;
        self.state.borrow_mut().node_identifier = Some(id.to_string());
        Ok(())
    }

    fn write_config(&mut self) -> HwResult<()> {
        self.command(Some(ConfigField::WriteConfig))?;
        let mut state = self.state.borrow_mut();
        state.writes += 1;
        state.committed_channel_verification = Some(state.channel_verification);
        Ok(())
    }

    fn power_on(&mut self) -> HwResult<()> {
        let mut state = self.state.borrow_mut();
        state.powered = true;
        state.power_events.push(RadioPowerEvent::On);
        Ok(())
    }

    fn power_off(&mut self) -> HwResult<()> {
        let mut state = self.state.borrow_mut();
        state.powered = false;
        state.power_events.push(RadioPowerEvent::Off);
        // Uncommitted settings and unread frames are lost with power.
        if let Some(committed) = state.committed_channel_verification {
            state.channel_verification = committed;
        }
        state.air.clear();
        state.pending.clear();
        Ok(())
    }

    fn wake(&mut self) -> HwResult<()> {
        self.command(None)?;
        self.state
            .borrow_mut()
            .power_events
            .push(RadioPowerEvent::Wake);
        Ok(())
    }

    fn association_indication(&mut self) -> HwResult<u8> {
        self.command(None)?;
        let mut state = self.state.borrow_mut();
        let idle = state.idle_indication;
        state.indications.pop_front().unwrap_or(Ok(idle))
    }

    fn extended_pan(&mut self) -> HwResult<[u8; 8]> {
        self.command(None)?;
        Ok(self.state.borrow().extended_pan)
    }

    fn operating_pan(&mut self) -> HwResult<u16> {
        self.command(None)?;
        Ok(self.state.borrow().operating_pan)
    }

    fn channel(&mut self) -> HwResult<u8> {
        self.command(None)?;
        Ok(self.state.borrow().channel)
    }

    fn send(&mut self, packet: &Packet) -> HwResult<()> {
        self.command(None)?;
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.send_errors.pop_front() {
            return Err(error);
        }
        packet
            .encode_rf_data()
            .map_err(|_| HardwareError::failed(FailureReason::Malformed("packet")))?;
        state.sent.push(packet.clone());
        if state.echo {
            let echo = Self::echo_of(packet);
            if let Ok(rf) = echo.encode_rf_data() {
                state.air.push_back((rf, echo.destination, echo.hops));
            }
        }
        Ok(())
    }

    fn frame_available(&mut self) -> bool {
        let state = self.state.borrow();
        state.present && state.powered && !state.air.is_empty()
    }

    fn reassemble_frames(&mut self) -> HwResult<()> {
        self.command(None)?;
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.reassembly_error.take() {
            state.air.clear();
            return Err(error);
        }
        while let Some((rf, destination, hops)) = state.air.pop_front() {
            let packet = Packet::decode_rf_data(&rf, destination, hops).map_err(|e| {
                log::warn!("Discarding undecodable frame: {}", e);
                HardwareError::failed(FailureReason::Malformed("application header"))
            })?;
            if state.pending.len() >= INBOUND_QUEUE_CAPACITY {
                log::warn!("Inbound queue full, dropping packet {}", packet.packet_id);
                state.dropped += 1;
                continue;
            }
            state.pending.push(packet);
        }
        Ok(())
    }

    fn pending_packet_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn pop_packet(&mut self) -> Option<Packet> {
        self.state.borrow_mut().pending.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: Address = Address::Long([0x00, 0x13, 0xA2, 0x00, 0x40, 0x00, 0x00, 0x01]);
    const GATEWAY: Address = Address::Long([0x00, 0x13, 0xA2, 0x00, 0x40, 0x69, 0x73, 0x7A]);

    #[test]
    fn test_clock_requires_power() {
        let mut clock = SimClock::starting_at(RtcTime::from_secs(10));
        assert_eq!(clock.time(), Err(HardwareError::NotExecuted));
        clock.power_on().unwrap();
        assert_eq!(clock.time().unwrap().as_secs(), 10);
    }

    #[test]
    fn test_timer_and_clock_share_time() {
        let clock = SimClock::new();
        let mut timer = clock.timer();
        timer.delay_ms(2_500);
        assert_eq!(clock.now().as_secs(), 2);
        assert_eq!(timer.now_ms(), 2_500);
    }

    #[test]
    fn test_deep_sleep_wakes_on_enabled_interrupt_only() {
        let clock = SimClock::new();
        let mut power = clock.power();
        power.schedule_interrupt(RtcTime::from_secs(5), Interrupt::RainGauge);

        let cause = power.deep_sleep(
            RtcTime::from_secs(20),
            RadioSleepPolicy::PowerOff,
            WakeSources::default(),
        );
        assert_eq!(cause, WakeCause::Alarm);
        assert_eq!(clock.now().as_secs(), 20);

        power.schedule_interrupt(RtcTime::from_secs(25), Interrupt::RainGauge);
        let cause = power.deep_sleep(
            RtcTime::from_secs(40),
            RadioSleepPolicy::PowerOff,
            WakeSources { rain_gauge: true },
        );
        assert_eq!(cause, WakeCause::External(Interrupt::RainGauge));
        assert_eq!(clock.now().as_secs(), 25);
    }

    #[test]
    fn test_hibernate_powers_clock_down() {
        let clock = SimClock::new();
        let mut handle = clock.clone();
        handle.power_on().unwrap();
        let mut power = clock.power();
        assert_eq!(power.hibernate(RtcTime::from_secs(60)), WakeCause::Alarm);
        assert_eq!(clock.now().as_secs(), 60);
        assert!(!clock.is_powered());
        assert_eq!(
            power.events(),
            vec![PowerEvent::Hibernate {
                alarm: RtcTime::from_secs(60)
            }]
        );
    }

    #[test]
    fn test_loopback_echo_comes_from_destination() {
        let mut radio = LoopbackRadio::new();
        radio.power_on().unwrap();
        let packet = Packet::unicast(Origin::from(NODE), GATEWAY, 7, b"X").unwrap();
        radio.send(&packet).unwrap();

        assert!(radio.frame_available());
        radio.reassemble_frames().unwrap();
        let echo = radio.pop_packet().unwrap();
        assert_eq!(echo.origin, Origin::from(GATEWAY));
        assert_eq!(echo.destination, NODE);
        assert_eq!(echo.payload, b"X");
        assert!(radio.pop_packet().is_none());
    }

    #[test]
    fn test_loopback_queue_is_bounded_and_lifo() {
        let mut radio = LoopbackRadio::new();
        radio.power_on().unwrap();
        for id in 0..7u8 {
            let packet = Packet::unicast(Origin::from(NODE), GATEWAY, id, &[]).unwrap();
            radio.send(&packet).unwrap();
        }
        radio.reassemble_frames().unwrap();
        assert_eq!(radio.pending_packet_count(), INBOUND_QUEUE_CAPACITY);
        assert_eq!(radio.dropped(), 2);
        assert_eq!(radio.pop_packet().unwrap().packet_id, 4);
    }

    #[test]
    fn test_absent_radio_executes_nothing() {
        let mut radio = LoopbackRadio::absent();
        radio.power_on().unwrap();
        assert_eq!(radio.association_indication(), Err(HardwareError::NotExecuted));
        assert_eq!(radio.set_pan(&[0; 8]), Err(HardwareError::NotExecuted));
        assert!(!radio.frame_available());
    }

    #[test]
    fn test_rejected_field_fails() {
        let mut radio = LoopbackRadio::new();
        radio.power_on().unwrap();
        radio.reject(ConfigField::ScanChannels);
        assert!(matches!(
            radio.set_scanning_channels(0x3FFF),
            Err(HardwareError::Failed(FailureReason::CommandStatus(_)))
        ));
        assert!(radio.set_energy_scan_duration(3).is_ok());
    }
}
