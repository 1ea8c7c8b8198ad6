//! Sensor node duty cycle.
//!
//! [`SensorNode`] owns the hardware collaborators and the three subsystems
//! and runs one linear cycle per wake period:
//!
//! ```text
//! send reading -> sleep until the next wake -> re-verify association
//!              -> receive and dispatch -> (next cycle)
//! ```
//!
//! A cycle whose wake target has already passed does not sleep: it reports
//! `SleepTimeExceeded` to the gateway once and returns so the caller can start
//! the next cycle immediately.
//!
//! # Example
//!
//! ```ignore
//! let mut node = SensorNode::new(config, devices, dispatch)?;
//! node.start(BootReason::PowerOn)?;
//! loop {
//!     let reading = sensors.sample();
//!     let report = node.run_cycle(&reading)?;
//! }
//! ```

use crate::association::{AssociationManager, AssociationMode, AssociationOutcome};
use crate::config::ValidatedConfig;
use crate::hal::{
    NonVolatileStore, PowerControl, Radio, RadioSleepPolicy, RealTimeClock, RtcMode, RtcTime,
    Timer,
};
use crate::power::{EnterOutcome, PowerMode, PowerScheduler, ScheduleError, SleepHardware};
use crate::status::HardwareError;
use crate::transport::{
    packet_ids, Address, DispatchError, DispatchTable, ErrorCode, MessageTransport,
    ReceiveSummary, TransportError,
};
use crate::xbee::{self, IdentityError, NetworkIdentity};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;

/// Hardware collaborators owned by the node.
pub struct Devices {
    pub radio: Box<dyn Radio>,
    pub clock: Box<dyn RealTimeClock>,
    pub power: Box<dyn PowerControl>,
    pub store: Box<dyn NonVolatileStore>,
    pub timer: Box<dyn Timer>,
}

impl Devices {
    fn sleep_hardware(&mut self) -> SleepHardware<'_> {
        SleepHardware {
            radio: self.radio.as_mut(),
            clock: self.clock.as_mut(),
            power: self.power.as_mut(),
            store: self.store.as_mut(),
        }
    }
}

/// Why the firmware is starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootReason {
    /// Cold start or reset: run the full network setup.
    PowerOn,
    /// RTC alarm ended a hibernation: resume the stored schedule.
    HibernateWake,
}

/// How the node picks its low-power mode each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeSelection {
    /// `Sleep` for short offsets, `Hibernate` otherwise.
    #[default]
    Auto,
    /// Always the given mode and radio policy.
    Fixed(PowerMode, RadioSleepPolicy),
}

/// What one duty cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Outcome of sending the reading.
    pub reading: Result<(), TransportError>,
    /// What the scheduler did.
    pub sleep: EnterOutcome,
    /// Association re-verification after a radio power-off.
    pub association: Option<AssociationOutcome>,
    /// Outcome of the receive window; `None` when the cycle was skipped.
    pub received: Option<Result<ReceiveSummary, TransportError>>,
    /// Sensor interrupts handled while asleep.
    pub interrupts: u32,
}

/// A battery-powered sensor node.
pub struct SensorNode {
    devices: Devices,
    identity: NetworkIdentity,
    gateway: Address,
    receive_timeout: Duration,
    mode: ModeSelection,
    association: AssociationManager,
    scheduler: PowerScheduler,
    transport: MessageTransport,
}

impl SensorNode {
    /// Build a node from validated configuration.
    ///
    /// Fails if a required packet ID has no handler in `dispatch`. A schedule
    /// record in the store is resumed when it matches the configured schedule.
    pub fn new(
        config: ValidatedConfig,
        mut devices: Devices,
        dispatch: DispatchTable,
    ) -> Result<Self, NodeError> {
        dispatch.validate(&config.required_packet_ids)?;
        info!(
            "Handlers registered for packet IDs {:?}",
            dispatch.registered_ids()
        );

        let scheduler =
            PowerScheduler::restore(config.schedule, config.board.strategy(), devices.store.as_mut());
        Ok(Self {
            devices,
            identity: config.identity,
            gateway: config.gateway,
            receive_timeout: config.receive_timeout,
            mode: ModeSelection::Auto,
            association: AssociationManager::new(),
            scheduler,
            transport: MessageTransport::new(config.source, dispatch),
        })
    }

    /// Use `mode` instead of automatic mode selection.
    pub fn with_mode(mut self, mode: ModeSelection) -> Self {
        self.mode = mode;
        self
    }

    pub fn association(&self) -> &AssociationManager {
        &self.association
    }

    pub fn scheduler(&self) -> &PowerScheduler {
        &self.scheduler
    }

    pub fn transport_mut(&mut self) -> &mut MessageTransport {
        &mut self.transport
    }

    pub fn gateway(&self) -> Address {
        self.gateway
    }

    /// Bring the node up after boot.
    ///
    /// A hibernation wake with a stored wake target resumes the schedule;
    /// everything else runs the full [`setup`](Self::setup).
    pub fn start(&mut self, boot: BootReason) -> Result<AssociationOutcome, NodeError> {
        match (boot, self.scheduler.target()) {
            (BootReason::HibernateWake, Some(_)) => self.resume_after_hibernate(),
            (BootReason::HibernateWake, None) => {
                warn!("Hibernation wake without stored schedule, running full setup");
                self.setup()
            }
            (BootReason::PowerOn, _) => self.setup(),
        }
    }

    /// Full network setup.
    ///
    /// Configures and power-cycles the radio, waits for association in setup
    /// mode, starts the RTC, stores the identity and arms the first wake.
    /// Association failure is not fatal; the outcome is returned.
    pub fn setup(&mut self) -> Result<AssociationOutcome, NodeError> {
        let devices = &mut self.devices;
        let report = self.association.configure(
            devices.radio.as_mut(),
            devices.timer.as_mut(),
            &self.identity,
        )?;
        match report.status() {
            Ok(()) => info!("Radio configured"),
            Err(HardwareError::NotExecuted) => warn!("Radio configuration not executed"),
            Err(e) => warn!(
                "Radio configuration incomplete ({}), rejected: {:?}",
                e,
                report.rejected()
            ),
        }

        let outcome = self.association.await_association(
            devices.radio.as_mut(),
            devices.timer.as_mut(),
            AssociationMode::Setup,
        );
        info!("Association after setup: {:?}", outcome);

        devices.clock.power_on().map_err(NodeError::Clock)?;
        devices
            .clock
            .set_mode(RtcMode::Normal)
            .map_err(NodeError::Clock)?;

        if let Err(e) = xbee::save_identity(devices.store.as_mut(), &self.identity) {
            warn!("Failed to store network identity: {}", e);
        }

        self.scheduler.mark_awake(devices.clock.as_mut())?;
        let target = self.scheduler.arm(devices.clock.as_mut())?;
        info!(
            "First wake in {} s at {}",
            target.offset.as_secs(),
            target.at
        );
        Ok(outcome)
    }

    /// Wake entry after a real hibernation (process restarted).
    pub fn resume_after_hibernate(&mut self) -> Result<AssociationOutcome, NodeError> {
        match xbee::load_identity(self.devices.store.as_mut()) {
            Ok(Some(stored)) if stored != self.identity => {
                warn!("Stored network identity differs from configuration, reconfiguring");
                return self.setup();
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read stored network identity: {}", e),
        }

        let at = self
            .scheduler
            .wake_from_hibernate(&mut self.devices.sleep_hardware())?;
        debug!("Resumed at {}", at);
        Ok(self.reverify_association())
    }

    /// One duty cycle: send `reading`, sleep, re-verify, receive.
    pub fn run_cycle(&mut self, reading: &[u8]) -> Result<CycleReport, NodeError> {
        let sent = self.transport.send(
            self.devices.radio.as_mut(),
            self.gateway,
            packet_ids::SENSOR_READING,
            reading,
        );
        if let Err(e) = &sent {
            error!("Reading not delivered: {}", e);
        }

        let (mode, policy) = match self.mode {
            ModeSelection::Auto => self.scheduler.auto_mode(),
            ModeSelection::Fixed(mode, policy) => (mode, policy),
        };
        let plan = self.scheduler.plan(mode, policy);
        let outcome = self
            .scheduler
            .enter_mode(mode, policy, &mut self.devices.sleep_hardware())?;
        let interrupts = self.scheduler.strategy_mut().take_interrupt_count();

        if let EnterOutcome::Skipped { missed_by } = outcome {
            warn!("Wake schedule exceeded by {} s", missed_by.as_secs());
            if let Err(e) = self.transport.send_error(
                self.devices.radio.as_mut(),
                self.gateway,
                ErrorCode::SleepTimeExceeded,
            ) {
                warn!("Error report not delivered: {}", e);
            }
            return Ok(CycleReport {
                reading: sent,
                sleep: outcome,
                association: None,
                received: None,
                interrupts,
            });
        }

        let association = if plan.radio.powers_radio_off() {
            Some(self.reverify_association())
        } else {
            None
        };

        let received = self.transport.receive(
            self.devices.radio.as_mut(),
            self.devices.timer.as_mut(),
            self.receive_timeout,
        );
        match &received {
            Ok(summary) => debug!("Handled {} inbound packet(s)", summary.handled),
            Err(TransportError::TimedOut) => debug!("No inbound packets"),
            Err(e) => warn!("Receive failed: {}", e),
        }

        Ok(CycleReport {
            reading: sent,
            sleep: outcome,
            association,
            received: Some(received),
            interrupts,
        })
    }

    /// Current RTC time.
    pub fn now(&mut self) -> Result<RtcTime, NodeError> {
        self.devices.clock.time().map_err(NodeError::Clock)
    }

    fn reverify_association(&mut self) -> AssociationOutcome {
        let outcome = self.association.await_association(
            self.devices.radio.as_mut(),
            self.devices.timer.as_mut(),
            AssociationMode::Runtime,
        );
        if outcome != AssociationOutcome::Joined {
            warn!("Association after wake: {:?}", outcome);
        }
        outcome
    }
}

/// Errors that stop the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The network identity is invalid.
    Identity(IdentityError),
    /// A required packet ID has no handler.
    Dispatch(DispatchError),
    /// The wake schedule could not be armed or followed.
    Schedule(ScheduleError),
    /// The real-time clock failed.
    Clock(HardwareError),
}

impl From<IdentityError> for NodeError {
    fn from(e: IdentityError) -> Self {
        Self::Identity(e)
    }
}

impl From<DispatchError> for NodeError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

impl From<ScheduleError> for NodeError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(e) => write!(f, "network identity: {}", e),
            Self::Dispatch(e) => write!(f, "dispatch configuration: {}", e),
            Self::Schedule(e) => write!(f, "wake schedule: {}", e),
            Self::Clock(e) => write!(f, "real-time clock: {}", e),
        }
    }
}

impl std::error::Error for NodeError {}
