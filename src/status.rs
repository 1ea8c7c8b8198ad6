//! Tri-state outcome of hardware operations.
//!
//! Every call into the radio module, clock or non-volatile store ends in one
//! of three states:
//!
//! - `Ok(_)`: the operation was executed and succeeded
//! - `Err(HardwareError::Failed(reason))`: the hardware executed the operation
//!   and reported a failure
//! - `Err(HardwareError::NotExecuted)`: the operation could not be attempted
//!   because a precondition was unmet (module absent, not powered, not
//!   responding)
//!
//! Callers react differently to the two error states: `NotExecuted` from the
//! radio means "no radio hardware" (a configuration problem), while `Failed`
//! means "radio present, try again later". The distinction is never folded
//! back into a bare integer.

use std::fmt;

/// Result of a hardware operation.
pub type HwResult<T> = Result<T, HardwareError>;

/// Error states of a hardware operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// The hardware executed the operation and reported a failure.
    Failed(FailureReason),
    /// The operation was not attempted (precondition unmet).
    NotExecuted,
}

impl HardwareError {
    /// Shorthand for `HardwareError::Failed(reason)`.
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed(reason)
    }

    /// Returns true for [`HardwareError::NotExecuted`].
    pub fn is_not_executed(&self) -> bool {
        matches!(self, Self::NotExecuted)
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "hardware operation failed: {}", reason),
            Self::NotExecuted => write!(f, "hardware operation not executed"),
        }
    }
}

impl std::error::Error for HardwareError {}

/// Why a hardware operation that was executed failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The radio answered a configuration command with a non-zero status.
    CommandStatus(u8),
    /// The radio reported a non-zero delivery status for a transmission.
    DeliveryStatus(u8),
    /// A frame from the radio failed its checksum.
    Checksum,
    /// A frame or record could not be decoded.
    Malformed(&'static str),
    /// The storage address range is outside the device.
    OutOfRange { addr: usize, len: usize },
    /// The parameter was rejected before being sent to the hardware.
    InvalidParameter(&'static str),
    /// Underlying I/O error (serial port, file, flash).
    Io(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandStatus(code) => write!(f, "command status 0x{:02X}", code),
            Self::DeliveryStatus(code) => write!(f, "delivery status 0x{:02X}", code),
            Self::Checksum => write!(f, "checksum mismatch"),
            Self::Malformed(what) => write!(f, "malformed {}", what),
            Self::OutOfRange { addr, len } => {
                write!(f, "address range 0x{:04X}+{} out of range", addr, len)
            }
            Self::InvalidParameter(what) => write!(f, "invalid parameter: {}", what),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_executed_is_distinct_from_failed() {
        let failed = HardwareError::failed(FailureReason::CommandStatus(1));
        let not_executed = HardwareError::NotExecuted;
        assert_ne!(failed, not_executed);
        assert!(not_executed.is_not_executed());
        assert!(!failed.is_not_executed());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = HardwareError::failed(FailureReason::DeliveryStatus(0x21));
        assert_eq!(
            err.to_string(),
            "hardware operation failed: delivery status 0x21"
        );
    }
}
