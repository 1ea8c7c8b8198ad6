//! Network configuration and association state machine.
//!
//! ```text
//! Idle ──await──▶ Scanning ──joined, PAN ok──▶ Associated
//!                    │    └──joined, PAN zero / no radio──▶ NotDetected
//!                    └──timeout──▶ Failed
//! ```
//!
//! Any state may re-enter `Scanning` with another `await_association` call.

use super::indication::{classify, AssociationState, JOINED};
use crate::hal::{Radio, Timer};
use crate::status::{HardwareError, HwResult};
use crate::transport::encode_hex;
use crate::xbee::config::{
    ConfigField, IdentityError, NetworkIdentity, POWER_CYCLE_OFF_TIME, POWER_ON_SETTLE,
};
use log::{debug, info, warn};
use std::time::Duration;

/// Default time allowed for the radio to join.
pub const ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay between indication polls in setup mode.
pub const SETUP_POLL_DELAY: Duration = Duration::from_secs(6);

/// Delay between indication polls at runtime.
pub const RUNTIME_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polling cadence for [`AssociationManager::await_association`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationMode {
    /// First join after configuration; the module needs time between polls.
    Setup,
    /// Re-verification after a wake.
    Runtime,
}

/// Result of waiting for association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationOutcome {
    Joined,
    NotDetected,
    Failed,
}

/// Network parameters read back after joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub operating_pan: u16,
    pub extended_pan: [u8; 8],
    pub channel: u8,
}

/// Per-field outcome of [`AssociationManager::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationReport {
    /// Every attempted write, in order.
    pub fields: Vec<(ConfigField, HwResult<()>)>,
    /// Outcome of the off/on/wake cycle that applies the settings.
    pub power_cycle: HwResult<()>,
}

impl ConfigurationReport {
    /// Aggregate status: any rejected write fails the whole configuration;
    /// otherwise any unexecuted step makes it not executed.
    pub fn status(&self) -> HwResult<()> {
        let results = self
            .fields
            .iter()
            .map(|(_, r)| r)
            .chain(std::iter::once(&self.power_cycle));

        let mut not_executed = false;
        for result in results {
            match result {
                Err(e @ HardwareError::Failed(_)) => return Err(e.clone()),
                Err(HardwareError::NotExecuted) => not_executed = true,
                Ok(()) => {}
            }
        }
        if not_executed {
            Err(HardwareError::NotExecuted)
        } else {
            Ok(())
        }
    }

    /// Fields the radio rejected.
    pub fn rejected(&self) -> Vec<ConfigField> {
        self.fields
            .iter()
            .filter(|(_, r)| matches!(r, Err(HardwareError::Failed(_))))
            .map(|(f, _)| *f)
            .collect()
    }

    /// Outcome for one field, if it was attempted.
    pub fn field(&self, field: ConfigField) -> Option<&HwResult<()>> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, r)| r)
    }
}

/// Drives the radio through configuration and association.
#[derive(Debug, Clone)]
pub struct AssociationManager {
    state: AssociationState,
    timeout: Duration,
    last_indication: Option<u8>,
    network: Option<NetworkParams>,
}

impl Default for AssociationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AssociationManager {
    pub fn new() -> Self {
        Self::with_timeout(ASSOCIATION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: AssociationState::Idle,
            timeout,
            last_indication: None,
            network: None,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Last non-joined indication code seen while polling.
    pub fn last_indication(&self) -> Option<u8> {
        self.last_indication
    }

    /// Network parameters captured at the last successful association.
    pub fn network(&self) -> Option<NetworkParams> {
        self.network
    }

    /// Push `identity` into the radio and power-cycle it.
    ///
    /// Every write is attempted even after a failure. The gateway address is
    /// not a radio setting and is left to the caller.
    pub fn configure(
        &mut self,
        radio: &mut dyn Radio,
        timer: &mut dyn Timer,
        identity: &NetworkIdentity,
    ) -> Result<ConfigurationReport, IdentityError> {
        identity.validate()?;

        if let Err(e) = radio.power_on().and_then(|()| radio.wake()) {
            warn!("Radio power on failed: {}", e);
        }
        timer.delay_ms(POWER_ON_SETTLE.as_millis() as u64);

        let mut fields = vec![
            (ConfigField::PanId, radio.set_pan(&identity.pan_id)),
            (
                ConfigField::ScanChannels,
                radio.set_scanning_channels(identity.scan_channels),
            ),
            (
                ConfigField::EnergyScanDuration,
                radio.set_energy_scan_duration(identity.energy_scan_duration),
            ),
            (
                ConfigField::ChannelVerification,
                radio.set_channel_verification(identity.channel_verification),
            ),
        ];
        if let Some(id) = &identity.node_identifier {
            fields.push((ConfigField::NodeIdentifier, radio.set_node_identifier(id)));
        }
        fields.push((ConfigField::WriteConfig, radio.write_config()));

        for (field, result) in &fields {
            if let Err(e) = result {
                warn!("Setting {} failed: {}", field, e);
            }
        }

        let power_cycle = Self::power_cycle(radio, timer);
        if let Err(e) = &power_cycle {
            warn!("Radio power cycle failed: {}", e);
        }

        self.state = AssociationState::Idle;
        self.network = None;
        Ok(ConfigurationReport {
            fields,
            power_cycle,
        })
    }

    fn power_cycle(radio: &mut dyn Radio, timer: &mut dyn Timer) -> HwResult<()> {
        radio.power_off()?;
        timer.delay_ms(POWER_CYCLE_OFF_TIME.as_millis() as u64);
        radio.power_on()?;
        radio.wake()
    }

    /// Poll the association indication until joined or timed out.
    ///
    /// Returns within the timeout plus at most one poll interval.
    pub fn await_association(
        &mut self,
        radio: &mut dyn Radio,
        timer: &mut dyn Timer,
        mode: AssociationMode,
    ) -> AssociationOutcome {
        let interval = match mode {
            AssociationMode::Setup => SETUP_POLL_DELAY,
            AssociationMode::Runtime => RUNTIME_POLL_INTERVAL,
        };
        let timeout_ms = self.timeout.as_millis() as u64;

        self.state = AssociationState::Scanning;
        let start = timer.now_ms();

        loop {
            match radio.association_indication() {
                Ok(JOINED) => return self.on_joined(radio),
                Ok(code) => {
                    self.last_indication = Some(code);
                    debug!("Association indication {}", classify(code));
                }
                Err(HardwareError::NotExecuted) => {
                    warn!("No radio module detected");
                    self.state = AssociationState::NotDetected;
                    return AssociationOutcome::NotDetected;
                }
                Err(e) => debug!("Association indication read failed: {}", e),
            }

            if timer.elapsed_ms(start) >= timeout_ms {
                warn!(
                    "Association timed out after {:?} (last indication {:?})",
                    self.timeout,
                    self.last_indication.map(classify)
                );
                self.state = AssociationState::Failed;
                return AssociationOutcome::Failed;
            }
            timer.delay_ms(interval.as_millis() as u64);
        }
    }

    fn on_joined(&mut self, radio: &mut dyn Radio) -> AssociationOutcome {
        match radio.extended_pan() {
            Ok(pan) if pan.iter().all(|&b| b == 0) => {
                warn!("No radio module detected (extended PAN is zero)");
                self.state = AssociationState::NotDetected;
                return AssociationOutcome::NotDetected;
            }
            Ok(_) => {}
            Err(HardwareError::NotExecuted) => {
                warn!("No radio module detected");
                self.state = AssociationState::NotDetected;
                return AssociationOutcome::NotDetected;
            }
            Err(e) => {
                warn!("Reading extended PAN failed: {}", e);
                self.state = AssociationState::Failed;
                return AssociationOutcome::Failed;
            }
        }

        // Keep the coordinator we joined even when it is briefly unreachable.
        let persisted = radio
            .set_channel_verification(false)
            .and_then(|()| radio.write_config());
        if let Err(e) = persisted {
            warn!("Disabling channel verification failed: {}", e);
        }

        self.state = AssociationState::Associated;
        self.network = match self.network_params(radio) {
            Ok(params) => {
                info!(
                    "Joined network: operating PAN 0x{:04X}, extended PAN {}, channel 0x{:02X}",
                    params.operating_pan,
                    encode_hex(&params.extended_pan),
                    params.channel
                );
                Some(params)
            }
            Err(e) => {
                warn!("Reading network parameters failed: {}", e);
                None
            }
        };
        AssociationOutcome::Joined
    }

    /// Read the current network parameters from the radio.
    pub fn network_params(&self, radio: &mut dyn Radio) -> HwResult<NetworkParams> {
        Ok(NetworkParams {
            operating_pan: radio.operating_pan()?,
            extended_pan: radio.extended_pan()?,
            channel: radio.channel()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{LoopbackRadio, RadioPowerEvent, SimClock};
    use crate::status::FailureReason;

    fn harness() -> (LoopbackRadio, SimClock) {
        (LoopbackRadio::new(), SimClock::new())
    }

    #[test]
    fn test_configure_writes_every_field_and_power_cycles() {
        let (radio, clock) = harness();
        let mut manager = AssociationManager::new();
        let identity = NetworkIdentity::default().with_node_identifier("node_A");

        let report = manager
            .configure(&mut radio.clone(), &mut clock.timer(), &identity)
            .unwrap();

        assert_eq!(report.status(), Ok(()));
        assert_eq!(report.fields.len(), 6);
        assert_eq!(radio.pan(), identity.pan_id);
        assert_eq!(radio.scan_channels(), 0x3FFF);
        assert_eq!(radio.energy_scan_duration(), 3);
        assert_eq!(radio.node_identifier().as_deref(), Some("node_A"));
        assert_eq!(radio.committed_channel_verification(), Some(true));
        assert_eq!(
            radio.power_events(),
            vec![
                RadioPowerEvent::On,
                RadioPowerEvent::Wake,
                RadioPowerEvent::Off,
                RadioPowerEvent::On,
                RadioPowerEvent::Wake
            ]
        );
        assert_eq!(clock.now().as_secs(), 4);
    }

    #[test]
    fn test_configure_reports_each_rejected_field() {
        let (radio, clock) = harness();
        radio.reject(ConfigField::ScanChannels);
        let mut manager = AssociationManager::new();

        let report = manager
            .configure(&mut radio.clone(), &mut clock.timer(), &NetworkIdentity::default())
            .unwrap();

        assert!(matches!(report.status(), Err(HardwareError::Failed(_))));
        assert_eq!(report.rejected(), vec![ConfigField::ScanChannels]);
        // Later fields were still attempted.
        assert_eq!(report.field(ConfigField::EnergyScanDuration), Some(&Ok(())));
        assert_eq!(report.field(ConfigField::WriteConfig), Some(&Ok(())));
        assert_eq!(report.field(ConfigField::NodeIdentifier), None);
    }

    #[test]
    fn test_configure_absent_radio_is_not_executed() {
        let radio = LoopbackRadio::absent();
        let clock = SimClock::new();
        let mut manager = AssociationManager::new();
        let report = manager
            .configure(&mut radio.clone(), &mut clock.timer(), &NetworkIdentity::default())
            .unwrap();
        assert_eq!(report.status(), Err(HardwareError::NotExecuted));
    }

    #[test]
    fn test_configure_rejects_invalid_identity() {
        let (radio, clock) = harness();
        let mut identity = NetworkIdentity::default();
        identity.scan_channels = 0;
        let result =
            AssociationManager::new().configure(&mut radio.clone(), &mut clock.timer(), &identity);
        assert_eq!(result, Err(IdentityError::NoScanChannels));
        assert!(radio.power_events().is_empty());
    }

    #[test]
    fn test_joined_disables_channel_verification() {
        let radio = LoopbackRadio::new();
        let clock = SimClock::new();
        let mut r = radio.clone();
        r.power_on().unwrap();
        r.set_channel_verification(true).unwrap();
        radio.script_indications([Ok(0xFF), Ok(0x21), Ok(0x00)]);

        let mut manager = AssociationManager::new();
        let outcome = manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Runtime);

        assert_eq!(outcome, AssociationOutcome::Joined);
        assert_eq!(manager.state(), AssociationState::Associated);
        assert_eq!(manager.last_indication(), Some(0x21));
        assert_eq!(radio.committed_channel_verification(), Some(false));
        assert_eq!(
            manager.network(),
            Some(NetworkParams {
                operating_pan: 0x1302,
                extended_pan: [0, 0, 0, 0, 0, 0, 0x13, 0x02],
                channel: 0x0C,
            })
        );
    }

    #[test]
    fn test_zero_extended_pan_is_not_detected() {
        let radio = LoopbackRadio::joined();
        radio.set_network([0; 8], 0, 0);
        let clock = SimClock::new();
        let mut r = radio.clone();
        r.power_on().unwrap();

        let mut manager = AssociationManager::new();
        let outcome = manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Setup);

        assert_eq!(outcome, AssociationOutcome::NotDetected);
        assert_eq!(manager.state(), AssociationState::NotDetected);
        assert_eq!(radio.write_count(), 0);
    }

    #[test]
    fn test_timeout_bounded_by_one_setup_interval() {
        let (radio, clock) = harness();
        let mut r = radio.clone();
        r.power_on().unwrap();
        let mut manager = AssociationManager::new();

        let outcome = manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Setup);

        assert_eq!(outcome, AssociationOutcome::Failed);
        assert_eq!(manager.state(), AssociationState::Failed);
        let elapsed = clock.now().as_secs() as u64;
        assert!(elapsed >= ASSOCIATION_TIMEOUT.as_secs());
        assert!(elapsed <= ASSOCIATION_TIMEOUT.as_secs() + SETUP_POLL_DELAY.as_secs());
        // No persistence on failure.
        assert_eq!(radio.write_count(), 0);
    }

    #[test]
    fn test_runtime_timeout_bounded_by_one_runtime_interval() {
        let (radio, clock) = harness();
        let mut r = radio.clone();
        r.power_on().unwrap();
        let mut timer = clock.timer();
        let mut manager = AssociationManager::with_timeout(Duration::from_secs(2));

        let outcome = manager.await_association(&mut r, &mut timer, AssociationMode::Runtime);

        assert_eq!(outcome, AssociationOutcome::Failed);
        let elapsed = timer.now_ms();
        assert!(elapsed >= 2_000);
        assert!(elapsed <= 2_000 + RUNTIME_POLL_INTERVAL.as_millis() as u64);
    }

    #[test]
    fn test_absent_radio_is_not_detected_immediately() {
        let radio = LoopbackRadio::absent();
        let clock = SimClock::new();
        let mut manager = AssociationManager::new();
        let outcome =
            manager.await_association(&mut radio.clone(), &mut clock.timer(), AssociationMode::Setup);
        assert_eq!(outcome, AssociationOutcome::NotDetected);
        assert_eq!(clock.now().as_secs(), 0);
    }

    #[test]
    fn test_failed_reads_keep_polling() {
        let (radio, clock) = harness();
        let mut r = radio.clone();
        r.power_on().unwrap();
        radio.script_indications([
            Err(HardwareError::failed(FailureReason::Checksum)),
            Ok(0x00),
        ]);
        let mut manager = AssociationManager::new();
        let outcome = manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Runtime);
        assert_eq!(outcome, AssociationOutcome::Joined);
    }

    #[test]
    fn test_scanning_can_be_reentered() {
        let radio = LoopbackRadio::new();
        let clock = SimClock::new();
        let mut r = radio.clone();
        r.power_on().unwrap();
        let mut manager = AssociationManager::with_timeout(Duration::from_secs(1));
        assert_eq!(
            manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Runtime),
            AssociationOutcome::Failed
        );
        radio.set_idle_indication(0x00);
        assert_eq!(
            manager.await_association(&mut r, &mut clock.timer(), AssociationMode::Runtime),
            AssociationOutcome::Joined
        );
    }
}
