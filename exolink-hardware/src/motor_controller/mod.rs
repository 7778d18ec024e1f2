//! Motor controllers and their drive-state machine
//!
//! The two supported controller families share one state-machine shape but
//! differ in their PDO object tables and startup configuration, so the
//! family-specific drive logic is modeled as the [`MotorController`]
//! capability trait with two concrete implementations.

mod drive;
mod imotioncube;
mod ingenia;
pub mod motion_error;

pub use imotioncube::IMotionCube;
pub use ingenia::Ingenia;

use std::sync::Arc;

use exolink_common::traits::{PdoIo, SdoIo};
use exolink_common::{ActuationMode, DriveState, SlaveIndex};

use crate::error::Result;

/// A telemetry snapshot of one motor controller
///
/// Suitable for publishing at a rate independent of the fieldbus cycle.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorControllerStates {
    /// Motor phase current in ampere
    pub motor_current: f32,
    /// DC-link voltage of the controller in volt
    pub controller_voltage: f32,
    /// Motor voltage reading, in drive units
    pub motor_voltage: f32,
    /// Raw absolute encoder value
    pub absolute_position_iu: i32,
    /// Raw incremental encoder value
    pub incremental_position_iu: i32,
    /// Raw absolute encoder velocity
    pub absolute_velocity_iu: i32,
    /// Raw incremental encoder velocity
    pub incremental_velocity_iu: i32,
    /// Raw status word
    pub status_word: u16,
    /// Drive state decoded from the status word
    pub drive_state: DriveState,
    /// Raw motion error register
    pub motion_error: u16,
    /// Decoded motion error description
    pub motion_error_description: String,
    /// Raw detailed error register
    pub detailed_error: u16,
    /// Decoded detailed error description
    pub detailed_error_description: String,
    /// Raw second detailed error register, on families that have one
    pub second_detailed_error: Option<u16>,
    /// Decoded second detailed error description
    pub second_detailed_error_description: Option<String>,
    /// Drive temperature in drive units, on families that report it
    pub drive_temperature: Option<u16>,
}

/// The capability interface of a motor controller
///
/// Exactly one implementation exists per controller family; joints own
/// their controller as a boxed trait object. Methods reading cyclic data
/// are only meaningful after [`MotorController::initialize`] has negotiated
/// the PDO offsets and bound the process image.
pub trait MotorController: Send {
    /// Negotiate PDO mappings and write the startup configuration
    ///
    /// Pre-operational only. Returns true when the controller setup was
    /// re-downloaded and a restart is required before actuation.
    fn initialize(
        &mut self,
        sdo: &mut dyn SdoIo,
        pdo: Arc<dyn PdoIo>,
        cycle_time_ms: u8,
    ) -> Result<bool>;

    /// Walk the drive to OperationEnabled, holding the current position
    fn prepare_actuation(&mut self) -> Result<()>;

    /// Command a target angle in radians (position mode only)
    fn actuate_rad(&mut self, target_rad: f64) -> Result<()>;

    /// Command a target torque in drive units (torque mode only)
    fn actuate_torque(&mut self, target_torque: i16) -> Result<()>;

    /// Absolute joint angle in radians
    fn angle_rad_absolute(&self) -> f64;

    /// Incremental (motor side) angle in radians
    fn angle_rad_incremental(&self) -> f64;

    /// Joint velocity from the absolute encoder in rad/s
    fn velocity_rad_absolute(&self) -> f64;

    /// Joint velocity from the incremental encoder in rad/s
    fn velocity_rad_incremental(&self) -> f64;

    /// Whether the incremental encoder resolves finer steps than the
    /// absolute one
    fn incremental_more_precise(&self) -> bool;

    /// Actual torque in drive units
    fn torque(&self) -> i16;

    /// Motor phase current in ampere
    fn motor_current(&self) -> f32;

    /// Motor voltage in drive units
    fn motor_voltage(&self) -> f32;

    /// DC-link voltage in volt
    fn controller_voltage(&self) -> f32;

    /// Raw status word from the latest cyclic frame
    fn status_word(&self) -> u16;

    /// Drive state decoded from the latest status word
    fn drive_state(&self) -> DriveState {
        DriveState::from_status_word(self.status_word())
    }

    /// Full telemetry snapshot
    fn states(&self) -> MotorControllerStates;

    /// Zero the control word and trigger the device reset register
    fn reset(&mut self, sdo: &mut dyn SdoIo) -> Result<()>;

    /// The configured actuation mode
    fn actuation_mode(&self) -> ActuationMode;

    /// The fieldbus index of this controller
    fn slave_index(&self) -> SlaveIndex;
}
