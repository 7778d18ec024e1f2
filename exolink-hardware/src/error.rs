//! The hardware error taxonomy
//!
//! Configuration and link errors unwind out of startup entirely; actuation
//! safety and misuse errors abort only the offending command and are
//! surfaced to the caller.

use snafu::Snafu;

use exolink_common::traits::{LinkError, SdoError};
use exolink_common::{ActuationMode, SlaveIndex};

/// Error returned by hardware operations
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HardwareError {
    /// An operation was attempted in an incompatible actuation mode
    #[snafu(display("Invalid actuation mode: {mode}"))]
    InvalidActuationMode {
        /// The mode the controller is configured for
        mode: ActuationMode,
    },
    /// A position target failed soft-limit validation
    #[snafu(display(
        "Position {target_iu} IU is invalid for slave {slave} (soft limits {lower_soft_iu} IU to {upper_soft_iu} IU)"
    ))]
    InvalidActuatePosition {
        /// The rejected target
        target_iu: i32,
        /// Slave the command was destined for
        slave: SlaveIndex,
        /// Lower soft limit of the absolute encoder
        lower_soft_iu: i32,
        /// Upper soft limit of the absolute encoder
        upper_soft_iu: i32,
    },
    /// The absolute encoder read back (near) zero, indicating it has
    /// silently reset since calibration
    #[snafu(display("Encoder of slave {slave} has reset. Read angle {angle_iu} IU"))]
    EncoderReset {
        /// Slave whose encoder reset
        slave: SlaveIndex,
        /// The suspicious reading
        angle_iu: i32,
    },
    /// The joint is positioned outside its mechanical travel
    #[snafu(display(
        "Slave {slave} is outside hard limits (read {angle_iu} IU, limits {lower_iu} IU to {upper_iu} IU)"
    ))]
    OutsideHardLimits {
        /// Slave which reported the position
        slave: SlaveIndex,
        /// The out-of-range reading
        angle_iu: i32,
        /// Lower hard limit
        lower_iu: i32,
        /// Upper hard limit
        upper_iu: i32,
    },
    /// A position target was too far from the current position for one step
    #[snafu(display(
        "Target {target_rad} exceeds max step of {max_rad} from current {current_rad} for slave {slave}"
    ))]
    TargetExceedsMaxStep {
        /// The rejected target in radians
        target_rad: f64,
        /// The current absolute position in radians
        current_rad: f64,
        /// The per-family single-step ceiling
        max_rad: f64,
        /// Slave the command was destined for
        slave: SlaveIndex,
    },
    /// A torque target met or exceeded the per-family ceiling
    #[snafu(display("Target torque {target} exceeds max torque {max}"))]
    TargetTorqueExceedsMax {
        /// The rejected torque
        target: i16,
        /// The per-family ceiling
        max: i16,
    },
    /// The drive entered Fault while a state transition was in progress
    #[snafu(display(
        "Slave {slave} went to fault state while attempting to go to '{target}'. {motion_error}"
    ))]
    DriveFault {
        /// Slave which faulted
        slave: SlaveIndex,
        /// Description of the transition target
        target: &'static str,
        /// Decoded motion-error description
        motion_error: String,
    },
    /// A drive never reached a commanded target state
    #[snafu(display("Slave {slave} did not reach '{target}' (status word 0x{status_word:04X})"))]
    StateTransitionTimeout {
        /// Slave which stalled
        slave: SlaveIndex,
        /// Description of the transition target
        target: &'static str,
        /// The last status word observed
        status_word: u16,
    },
    /// Negotiating or validating a PDO mapping failed
    #[snafu(display("PDO mapping failed: {source}"))]
    PdoMapping {
        /// The underlying mapping failure
        source: crate::pdo_map::PdoMappingError,
    },
    /// Writing the startup settings over the mailbox failed
    #[snafu(display("Failed writing initial settings to slave {slave}"))]
    WritingInitialSettingsFailed {
        /// Slave being configured
        slave: SlaveIndex,
        /// The underlying mailbox failure
        source: SdoError,
    },
    /// The setup file for a drive could not be parsed
    #[snafu(display("Invalid setup file for slave {slave}: {message}"))]
    InvalidSetupFile {
        /// Slave the file belongs to
        slave: SlaveIndex,
        /// What was wrong with it
        message: String,
    },
    /// The link layer failed during startup
    #[snafu(display("EtherCAT link failed: {source}"))]
    Link {
        /// The underlying link failure
        source: LinkError,
    },
    /// Fewer slaves were discovered than the configuration expects
    ///
    /// A wiring or configuration error; fatal and never retried.
    #[snafu(display("Expected {expected} slave(s) while only {found} were found"))]
    NotAllSlavesFound {
        /// Slave count from the configuration
        expected: usize,
        /// Slave count discovered on the wire
        found: usize,
    },
    /// Not all slaves reached Operational within the bounded retry loop
    #[snafu(display("Not all slaves reached operational state"))]
    FailedToReachOperational,
    /// A drive requires a power cycle after its setup was re-downloaded
    #[snafu(display("Controller setup was re-downloaded; a restart is required before actuation"))]
    RestartRequired,
    /// Actuation was requested while the joint does not allow it
    #[snafu(display("Joint {joint} is not allowed to actuate"))]
    NotAllowedToActuate {
        /// Name of the joint
        joint: String,
    },
    /// An operation needing a motor controller was called on a joint without one
    #[snafu(display("Joint {joint} has no motor controller"))]
    MissingMotorController {
        /// Name of the joint
        joint: String,
    },
}

impl From<LinkError> for HardwareError {
    fn from(source: LinkError) -> Self {
        HardwareError::Link { source }
    }
}

/// Result alias used throughout the hardware layer
pub type Result<T> = std::result::Result<T, HardwareError>;
