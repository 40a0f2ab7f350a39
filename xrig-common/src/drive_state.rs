//! Decoding of the CiA-402 drive state machine from the status word

use crate::constants::status::TARGET_REACHED;

/// Possible states of a drive's power state machine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriveState {
    /// Drive is initializing, no communication with the power stage yet
    NotReadyToSwitchOn,
    /// Power stage is off and the drive waits for a shutdown command
    SwitchOnDisabled,
    /// Ready to switch on the power stage
    ReadyToSwitchOn,
    /// Power stage is on, operation not enabled
    SwitchedOn,
    /// Normal operation: set points are executed
    OperationEnabled,
    /// A quick stop is in progress or has completed
    QuickStopActive,
    /// The drive is reacting to a fault
    FaultReactionActive,
    /// The drive is in fault and needs a fault reset
    Fault,
    /// The status word does not match any state
    Unknown(u16),
}

impl DriveState {
    /// Decode the state from a status word value
    pub fn from_status_word(status: u16) -> Self {
        use DriveState::*;
        match (status & 0x4F, status & 0x6F) {
            (0x00, _) => NotReadyToSwitchOn,
            (0x40, _) => SwitchOnDisabled,
            (0x0F, _) => FaultReactionActive,
            (0x08, _) => Fault,
            (_, 0x21) => ReadyToSwitchOn,
            (_, 0x23) => SwitchedOn,
            (_, 0x27) => OperationEnabled,
            (_, 0x07) => QuickStopActive,
            _ => Unknown(status),
        }
    }

    /// True if the drive will execute motion commands
    pub fn is_enabled(&self) -> bool {
        *self == DriveState::OperationEnabled
    }

    /// True if the drive needs a fault reset
    pub fn is_fault(&self) -> bool {
        matches!(self, DriveState::Fault | DriveState::FaultReactionActive)
    }
}

impl core::fmt::Display for DriveState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriveState::Unknown(raw) => write!(f, "Unknown(0x{raw:04X})"),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// Returns true if the status word reports the last move as complete
pub fn target_reached(status: u16) -> bool {
    status & TARGET_REACHED != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_states() {
        assert_eq!(DriveState::SwitchOnDisabled, DriveState::from_status_word(0x0250));
        assert_eq!(DriveState::ReadyToSwitchOn, DriveState::from_status_word(0x0231));
        assert_eq!(DriveState::SwitchedOn, DriveState::from_status_word(0x0233));
        assert_eq!(DriveState::OperationEnabled, DriveState::from_status_word(0x0637));
        assert_eq!(DriveState::QuickStopActive, DriveState::from_status_word(0x0217));
        assert_eq!(DriveState::Fault, DriveState::from_status_word(0x0218));
        assert_eq!(DriveState::FaultReactionActive, DriveState::from_status_word(0x021F));
        assert_eq!(DriveState::NotReadyToSwitchOn, DriveState::from_status_word(0x0200));
    }

    #[test]
    fn test_target_reached() {
        assert!(target_reached(0x0637));
        assert!(!target_reached(0x0237));
    }
}
