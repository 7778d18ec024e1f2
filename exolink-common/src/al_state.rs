//! Definitions for the EtherCAT application-layer state machine

/// Bit set in a raw application-layer state word when the slave reports an
/// error alongside its state
pub const AL_ERROR_FLAG: u16 = 0x10;

/// Possible application-layer states for a slave
///
/// Every slave walks Init -> PreOperational -> SafeOperational -> Operational
/// during startup. Mailbox (SDO) traffic is legal from PreOperational on;
/// cyclic process data only in SafeOperational (inputs) and Operational
/// (inputs and outputs).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AlState {
    /// No communication with the slave
    None = 0,
    /// Slave is reset; neither mailbox nor process data available
    Init = 1,
    /// Mailbox communication is available, process data is not
    PreOperational = 2,
    /// Firmware-download state
    Bootstrap = 3,
    /// Inputs are exchanged, outputs are held in a safe state
    SafeOperational = 4,
    /// Full cyclic exchange of inputs and outputs
    Operational = 8,
}

impl core::fmt::Display for AlState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AlState::None => write!(f, "None"),
            AlState::Init => write!(f, "Init"),
            AlState::PreOperational => write!(f, "PreOperational"),
            AlState::Bootstrap => write!(f, "Bootstrap"),
            AlState::SafeOperational => write!(f, "SafeOperational"),
            AlState::Operational => write!(f, "Operational"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
/// An error for [`AlState::try_from()`]
pub struct InvalidAlStateError(pub u16);

impl TryFrom<u16> for AlState {
    type Error = InvalidAlStateError;

    /// Attempt to convert a raw state word to an AlState enum
    ///
    /// The error flag bit is masked off before matching, so a slave
    /// reporting e.g. SafeOperational + error still decodes as
    /// SafeOperational.
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use AlState::*;
        match value & !AL_ERROR_FLAG {
            x if x == None as u16 => Ok(None),
            x if x == Init as u16 => Ok(Init),
            x if x == PreOperational as u16 => Ok(PreOperational),
            x if x == Bootstrap as u16 => Ok(Bootstrap),
            x if x == SafeOperational as u16 => Ok(SafeOperational),
            x if x == Operational as u16 => Ok(Operational),
            _ => Err(InvalidAlStateError(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_state_round_trip() {
        assert_eq!(AlState::try_from(0x08).unwrap(), AlState::Operational);
        assert_eq!(AlState::try_from(0x02).unwrap(), AlState::PreOperational);
        assert!(AlState::try_from(0x07).is_err());
    }

    #[test]
    fn error_flag_is_masked() {
        assert_eq!(AlState::try_from(0x14).unwrap(), AlState::SafeOperational);
        assert_eq!(AlState::try_from(0x11).unwrap(), AlState::Init);
    }
}
