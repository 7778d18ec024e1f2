//! The actuation mode a motor controller is configured for

/// How a motor controller interprets its cyclic output objects
///
/// The mode is fixed at configuration time, before the fieldbus starts. A
/// controller must never be asked to actuate while the mode is still
/// [`ActuationMode::Unknown`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActuationMode {
    /// Mode has not been configured
    #[default]
    Unknown,
    /// Targets are joint angles in radians
    Position,
    /// Targets are torques in drive units
    Torque,
}

impl ActuationMode {
    /// The CiA-402 mode-of-operation number written to the drive (object
    /// 0x6060) for this mode
    ///
    /// Returns None for [`ActuationMode::Unknown`], which has no drive-side
    /// representation.
    pub fn mode_number(&self) -> Option<i8> {
        match self {
            ActuationMode::Unknown => None,
            ActuationMode::Position => Some(8),
            ActuationMode::Torque => Some(10),
        }
    }
}

impl core::fmt::Display for ActuationMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ActuationMode::Unknown => write!(f, "unknown"),
            ActuationMode::Position => write!(f, "position"),
            ActuationMode::Torque => write!(f, "torque"),
        }
    }
}
