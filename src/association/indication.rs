//! Association indication codes.
//!
//! The radio reports its join progress as a one-byte code. [`classify`] maps
//! the documented codes to a [`DiagnosticCategory`]; the category is used for
//! logging only, control flow looks at "joined" versus "not yet".

use std::fmt;

/// Indication code reported once the module has joined a network.
pub const JOINED: u8 = 0x00;

/// Indication code reported while the module is still scanning.
pub const SCANNING: u8 = 0xFF;

/// Meaning of an association indication code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCategory {
    /// 0x00: successfully formed or joined a network.
    Joined,
    /// 0x21: scan found no PANs.
    NoPansFound,
    /// 0x22: scan found no valid PANs for the current settings.
    NoValidPans,
    /// 0x23: valid PAN found but joining is not allowed.
    JoiningNotAllowed,
    /// 0x24: no joinable beacons were found.
    NoJoinableBeacons,
    /// 0x25: unexpected state, node should not be attempting to join.
    UnexpectedState,
    /// 0x27: node joining attempt failed.
    JoinAttemptFailed,
    /// 0x2A: coordinator start attempt failed.
    CoordinatorStartFailed,
    /// 0x2B: checking for an existing coordinator.
    CheckingForCoordinator,
    /// 0x2C: attempt to leave the network failed.
    LeaveFailed,
    /// 0xAB: attempted to join a device that did not respond.
    DeviceNotResponding,
    /// 0xAC: secure join error, network security key received unsecured.
    KeyReceivedUnsecured,
    /// 0xAD: secure join error, network security key not received.
    KeyNotReceived,
    /// 0xAF: secure join error, preconfigured link key does not match.
    WrongLinkKey,
    /// 0xFF: scanning for a ZigBee network.
    Scanning,
    /// Any undocumented code.
    Unknown(u8),
}

/// Map an indication code to its category.
pub fn classify(code: u8) -> DiagnosticCategory {
    use DiagnosticCategory::*;
    match code {
        JOINED => Joined,
        0x21 => NoPansFound,
        0x22 => NoValidPans,
        0x23 => JoiningNotAllowed,
        0x24 => NoJoinableBeacons,
        0x25 => UnexpectedState,
        0x27 => JoinAttemptFailed,
        0x2A => CoordinatorStartFailed,
        0x2B => CheckingForCoordinator,
        0x2C => LeaveFailed,
        0xAB => DeviceNotResponding,
        0xAC => KeyReceivedUnsecured,
        0xAD => KeyNotReceived,
        0xAF => WrongLinkKey,
        SCANNING => Scanning,
        other => Unknown(other),
    }
}

impl DiagnosticCategory {
    /// The indication code this category stands for.
    pub fn code(self) -> u8 {
        use DiagnosticCategory::*;
        match self {
            Joined => JOINED,
            NoPansFound => 0x21,
            NoValidPans => 0x22,
            JoiningNotAllowed => 0x23,
            NoJoinableBeacons => 0x24,
            UnexpectedState => 0x25,
            JoinAttemptFailed => 0x27,
            CoordinatorStartFailed => 0x2A,
            CheckingForCoordinator => 0x2B,
            LeaveFailed => 0x2C,
            DeviceNotResponding => 0xAB,
            KeyReceivedUnsecured => 0xAC,
            KeyNotReceived => 0xAD,
            WrongLinkKey => 0xAF,
            Scanning => SCANNING,
            Unknown(code) => code,
        }
    }

    fn description(self) -> &'static str {
        use DiagnosticCategory::*;
        match self {
            Joined => "successfully formed or joined a network",
            NoPansFound => "scan found no PANs",
            NoValidPans => "scan found no valid PANs based on current SC and ID settings",
            JoiningNotAllowed => "valid PAN found, but joining is currently not allowed",
            NoJoinableBeacons => "no joinable beacons were found",
            UnexpectedState => "unexpected state, node should not be attempting to join",
            JoinAttemptFailed => "node joining attempt failed",
            CoordinatorStartFailed => "coordinator start attempt failed",
            CheckingForCoordinator => "checking for an existing coordinator",
            LeaveFailed => "attempt to leave the network failed",
            DeviceNotResponding => "attempted to join a device that did not respond",
            KeyReceivedUnsecured => "secure join error, network security key received unsecured",
            KeyNotReceived => "secure join error, network security key not received",
            WrongLinkKey => "secure join error, joining device does not have the right preconfigured link key",
            Scanning => "scanning for a ZigBee network",
            Unknown(_) => "unknown indication",
        }
    }
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}: {}", self.code(), self.description())
    }
}

/// Association state of the radio as seen by the node.
///
/// Recomputed after every power-on; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationState {
    /// No association attempt since power-on.
    #[default]
    Idle,
    /// Polling the indication code.
    Scanning,
    /// Joined, with a non-zero extended PAN.
    Associated,
    /// Timed out, or the radio failed while joining.
    Failed,
    /// No radio answered, or it reported an all-zero extended PAN.
    NotDetected,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENTED: [(u8, DiagnosticCategory); 15] = [
        (0x00, DiagnosticCategory::Joined),
        (0x21, DiagnosticCategory::NoPansFound),
        (0x22, DiagnosticCategory::NoValidPans),
        (0x23, DiagnosticCategory::JoiningNotAllowed),
        (0x24, DiagnosticCategory::NoJoinableBeacons),
        (0x25, DiagnosticCategory::UnexpectedState),
        (0x27, DiagnosticCategory::JoinAttemptFailed),
        (0x2A, DiagnosticCategory::CoordinatorStartFailed),
        (0x2B, DiagnosticCategory::CheckingForCoordinator),
        (0x2C, DiagnosticCategory::LeaveFailed),
        (0xAB, DiagnosticCategory::DeviceNotResponding),
        (0xAC, DiagnosticCategory::KeyReceivedUnsecured),
        (0xAD, DiagnosticCategory::KeyNotReceived),
        (0xAF, DiagnosticCategory::WrongLinkKey),
        (0xFF, DiagnosticCategory::Scanning),
    ];

    #[test]
    fn test_every_documented_code_has_one_category() {
        for (code, category) in DOCUMENTED {
            assert_eq!(classify(code), category, "code 0x{:02X}", code);
            assert_eq!(category.code(), code);
        }
    }

    #[test]
    fn test_undocumented_codes_are_unknown() {
        let documented: Vec<u8> = DOCUMENTED.iter().map(|(c, _)| *c).collect();
        for code in 0..=u8::MAX {
            if !documented.contains(&code) {
                assert_eq!(classify(code), DiagnosticCategory::Unknown(code));
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            classify(0x21).to_string(),
            "0x21: scan found no PANs"
        );
        assert_eq!(classify(0x26).to_string(), "0x26: unknown indication");
    }
}
