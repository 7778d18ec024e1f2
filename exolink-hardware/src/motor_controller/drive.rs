//! Shared drive mechanics used by both controller families
//!
//! Everything here is family-agnostic: cyclic register access through the
//! negotiated offsets, the CiA-402 enable walk, actuation validation, and
//! the startup settings common to both families. The variants supply the
//! object tables, ceilings and any extra configuration of their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use snafu::ResultExt;

use exolink_common::traits::{PdoIo, SdoIo};
use exolink_common::{ActuationMode, DriveState, ObjectName, SlaveIndex, TargetState};

use crate::error::{
    DriveFaultSnafu, EncoderResetSnafu, InvalidActuatePositionSnafu, InvalidActuationModeSnafu,
    OutsideHardLimitsSnafu, Result, StateTransitionTimeoutSnafu, TargetExceedsMaxStepSnafu,
    TargetTorqueExceedsMaxSnafu, WritingInitialSettingsFailedSnafu,
};
use crate::motor_controller::motion_error::{describe_error, ErrorRegister};
use crate::motor_controller::MotorControllerStates;
use crate::Encoder;

/// An absolute reading at or below this is treated as a silently reset encoder
const ENCODER_RESET_THRESHOLD_IU: i32 = 2;

/// Upper bound on control-word retries while waiting for a state transition
///
/// At one retry per millisecond this bounds a transition to a few seconds; a
/// drive that has not answered by then is not going to.
const STATE_TRANSITION_RETRIES: u32 = 5000;

/// Peak current of the drive, in ampere (drive datasheet)
const PEAK_CURRENT: f32 = 40.0;
/// Conversion parameter between drive IU and physical units (CoE manual)
const IU_CONVERSION_CONST: f32 = 65520.0;
/// Maximum measurable DC-link voltage (CoE manual)
const V_DC_MAX_MEASURABLE: f32 = 102.3;

/// The family-agnostic core of a motor controller
pub(crate) struct Drive {
    slave: SlaveIndex,
    actuation_mode: ActuationMode,
    absolute_encoder: Encoder,
    incremental_encoder: Encoder,
    max_target_step_rad: f64,
    max_target_torque: i16,
    miso_offsets: HashMap<ObjectName, usize>,
    mosi_offsets: HashMap<ObjectName, usize>,
    pdo: Option<Arc<dyn PdoIo>>,
}

impl Drive {
    pub(crate) fn new(
        slave: SlaveIndex,
        absolute_encoder: Encoder,
        incremental_encoder: Encoder,
        actuation_mode: ActuationMode,
        max_target_step_rad: f64,
        max_target_torque: i16,
    ) -> Self {
        Self {
            slave,
            actuation_mode,
            absolute_encoder,
            incremental_encoder,
            max_target_step_rad,
            max_target_torque,
            miso_offsets: HashMap::new(),
            mosi_offsets: HashMap::new(),
            pdo: None,
        }
    }

    /// Bind the process image and the offsets produced by PDO negotiation
    pub(crate) fn bind(
        &mut self,
        pdo: Arc<dyn PdoIo>,
        miso_offsets: HashMap<ObjectName, usize>,
        mosi_offsets: HashMap<ObjectName, usize>,
    ) {
        self.pdo = Some(pdo);
        self.miso_offsets = miso_offsets;
        self.mosi_offsets = mosi_offsets;
    }

    pub(crate) fn slave(&self) -> SlaveIndex {
        self.slave
    }

    pub(crate) fn actuation_mode(&self) -> ActuationMode {
        self.actuation_mode
    }

    fn input_offset(&self, name: ObjectName) -> Option<(&Arc<dyn PdoIo>, usize)> {
        match (&self.pdo, self.miso_offsets.get(&name)) {
            (Some(pdo), Some(offset)) => Some((pdo, *offset)),
            _ => {
                error!(
                    "Slave {}: {name:?} read before PDO offsets were bound",
                    self.slave
                );
                None
            }
        }
    }

    fn input_u16(&self, name: ObjectName) -> u16 {
        self.input_offset(name)
            .map(|(pdo, offset)| pdo.read_u16(self.slave, offset))
            .unwrap_or(0)
    }

    fn input_i16(&self, name: ObjectName) -> i16 {
        self.input_offset(name)
            .map(|(pdo, offset)| pdo.read_i16(self.slave, offset))
            .unwrap_or(0)
    }

    fn input_i32(&self, name: ObjectName) -> i32 {
        self.input_offset(name)
            .map(|(pdo, offset)| pdo.read_i32(self.slave, offset))
            .unwrap_or(0)
    }

    fn output(&self, name: ObjectName) -> Option<(&Arc<dyn PdoIo>, usize)> {
        match (&self.pdo, self.mosi_offsets.get(&name)) {
            (Some(pdo), Some(offset)) => Some((pdo, *offset)),
            _ => {
                error!(
                    "Slave {}: {name:?} written before PDO offsets were bound",
                    self.slave
                );
                None
            }
        }
    }

    pub(crate) fn status_word(&self) -> u16 {
        self.input_u16(ObjectName::StatusWord)
    }

    pub(crate) fn set_control_word(&self, control_word: u16) {
        if let Some((pdo, offset)) = self.output(ObjectName::ControlWord) {
            pdo.write_u16(self.slave, offset, control_word);
        }
    }

    pub(crate) fn motion_error(&self) -> u16 {
        self.input_u16(ObjectName::MotionErrorRegister)
    }

    pub(crate) fn detailed_error(&self) -> u16 {
        self.input_u16(ObjectName::DetailedErrorRegister)
    }

    /// Only mapped by the Ingenia family
    pub(crate) fn second_detailed_error(&self) -> u16 {
        self.input_u16(ObjectName::SecondDetailedErrorRegister)
    }

    /// Only mapped by the IMotionCube family
    pub(crate) fn drive_temperature(&self) -> u16 {
        self.input_u16(ObjectName::DriveTemperature)
    }

    pub(crate) fn angle_iu_absolute(&self) -> i32 {
        self.input_i32(ObjectName::ActualPosition)
    }

    pub(crate) fn angle_iu_incremental(&self) -> i32 {
        self.input_i32(ObjectName::MotorPosition)
    }

    pub(crate) fn angle_rad_absolute(&self) -> f64 {
        self.absolute_encoder.iu_to_rad(self.angle_iu_absolute())
    }

    pub(crate) fn angle_rad_incremental(&self) -> f64 {
        self.incremental_encoder
            .iu_to_rad(self.angle_iu_incremental())
    }

    pub(crate) fn velocity_iu_absolute(&self) -> i32 {
        self.input_i32(ObjectName::ActualVelocity)
    }

    pub(crate) fn velocity_iu_incremental(&self) -> i32 {
        self.input_i32(ObjectName::MotorVelocity)
    }

    /// Velocity registers report IU per second
    pub(crate) fn velocity_rad_absolute(&self) -> f64 {
        self.velocity_iu_absolute() as f64 * self.absolute_encoder.rad_per_iu()
    }

    pub(crate) fn velocity_rad_incremental(&self) -> f64 {
        self.velocity_iu_incremental() as f64 * self.incremental_encoder.rad_per_iu()
    }

    pub(crate) fn incremental_more_precise(&self) -> bool {
        self.incremental_encoder.rad_per_iu() < self.absolute_encoder.rad_per_iu()
    }

    pub(crate) fn torque(&self) -> i16 {
        self.input_i16(ObjectName::ActualTorque)
    }

    pub(crate) fn motor_current(&self) -> f32 {
        let current_iu = self.input_i16(ObjectName::ActualTorque);
        (2.0 * PEAK_CURRENT / IU_CONVERSION_CONST) * current_iu as f32
    }

    pub(crate) fn controller_voltage(&self) -> f32 {
        let voltage_iu = self.input_u16(ObjectName::DcLinkVoltage);
        (V_DC_MAX_MEASURABLE / IU_CONVERSION_CONST) * voltage_iu as f32
    }

    pub(crate) fn motor_voltage(&self) -> f32 {
        self.input_u16(ObjectName::MotorVoltage) as f32
    }

    /// Repeatedly command a target state until the drive reports it
    ///
    /// While waiting to reach OperationEnabled, a decoded Fault aborts
    /// immediately: a drive fault must not be silently looped on.
    pub(crate) fn go_to_target_state(&self, target: &TargetState) -> Result<()> {
        debug!("Slave {}: try to go to '{}'", self.slave, target.description);

        let mut status = 0;
        for _ in 0..STATE_TRANSITION_RETRIES {
            self.set_control_word(target.control_word);
            status = self.status_word();
            if target.is_reached(status) {
                debug!("Slave {}: reached '{}'", self.slave, target.description);
                return Ok(());
            }
            if target.state == TargetState::OPERATION_ENABLED.state
                && DriveState::from_status_word(status) == DriveState::Fault
            {
                let motion_error = describe_error(self.motion_error(), ErrorRegister::MotionError);
                error!(
                    "Slave {} went to fault while attempting '{}'. MER: {}DER: {}",
                    self.slave,
                    target.description,
                    motion_error,
                    describe_error(self.detailed_error(), ErrorRegister::DetailedError),
                );
                return DriveFaultSnafu {
                    slave: self.slave,
                    target: target.description,
                    motion_error,
                }
                .fail();
            }
            thread::sleep(Duration::from_millis(1));
        }

        StateTransitionTimeoutSnafu {
            slave: self.slave,
            target: target.description,
            status_word: status,
        }
        .fail()
    }

    /// Walk the drive to OperationEnabled, holding the current position
    pub(crate) fn prepare_actuation(&mut self) -> Result<()> {
        if self.actuation_mode == ActuationMode::Unknown {
            return InvalidActuationModeSnafu {
                mode: self.actuation_mode,
            }
            .fail();
        }

        // Fault reset, then the mandatory enable walk
        self.set_control_word(TargetState::SWITCH_ON_DISABLED.control_word);
        self.go_to_target_state(&TargetState::SWITCH_ON_DISABLED)?;
        self.go_to_target_state(&TargetState::READY_TO_SWITCH_ON)?;
        self.go_to_target_state(&TargetState::SWITCHED_ON)?;

        let angle = self.angle_iu_absolute();
        if angle.abs() <= ENCODER_RESET_THRESHOLD_IU {
            return EncoderResetSnafu {
                slave: self.slave,
                angle_iu: angle,
            }
            .fail();
        }
        if !self.absolute_encoder.is_within_hard_limits_iu(angle) {
            return OutsideHardLimitsSnafu {
                slave: self.slave,
                angle_iu: angle,
                lower_iu: self.absolute_encoder.lower_hard_limit_iu(),
                upper_iu: self.absolute_encoder.upper_hard_limit_iu(),
            }
            .fail();
        }

        // Command a hold so enabling the power stage does not move the joint
        match self.actuation_mode {
            ActuationMode::Position => self.actuate_iu(angle)?,
            ActuationMode::Torque => self.actuate_torque(0)?,
            ActuationMode::Unknown => unreachable!(),
        }

        self.go_to_target_state(&TargetState::OPERATION_ENABLED)?;
        info!("Slave {}: prepared for actuation", self.slave);
        Ok(())
    }

    pub(crate) fn actuate_rad(&mut self, target_rad: f64) -> Result<()> {
        if self.actuation_mode != ActuationMode::Position {
            return InvalidActuationModeSnafu {
                mode: self.actuation_mode,
            }
            .fail();
        }

        let current_rad = self.angle_rad_absolute();
        if (target_rad - current_rad).abs() > self.max_target_step_rad {
            return TargetExceedsMaxStepSnafu {
                target_rad,
                current_rad,
                max_rad: self.max_target_step_rad,
                slave: self.slave,
            }
            .fail();
        }

        self.actuate_iu(self.absolute_encoder.rad_to_iu(target_rad))
    }

    fn actuate_iu(&mut self, target_iu: i32) -> Result<()> {
        let current_iu = self.angle_iu_absolute();
        if !self
            .absolute_encoder
            .is_valid_target_iu(current_iu, target_iu)
        {
            return InvalidActuatePositionSnafu {
                target_iu,
                slave: self.slave,
                lower_soft_iu: self.absolute_encoder.lower_soft_limit_iu(),
                upper_soft_iu: self.absolute_encoder.upper_soft_limit_iu(),
            }
            .fail();
        }

        if let Some((pdo, offset)) = self.output(ObjectName::TargetPosition) {
            pdo.write_i32(self.slave, offset, target_iu);
        }
        Ok(())
    }

    pub(crate) fn actuate_torque(&mut self, target_torque: i16) -> Result<()> {
        if self.actuation_mode != ActuationMode::Torque {
            return InvalidActuationModeSnafu {
                mode: self.actuation_mode,
            }
            .fail();
        }

        if target_torque.abs() >= self.max_target_torque {
            return TargetTorqueExceedsMaxSnafu {
                target: target_torque,
                max: self.max_target_torque,
            }
            .fail();
        }

        if let Some((pdo, offset)) = self.output(ObjectName::TargetTorque) {
            pdo.write_i16(self.slave, offset, target_torque);
        }
        Ok(())
    }

    /// The startup settings shared by both controller families
    ///
    /// Pre-operational only.
    pub(crate) fn write_initial_settings(
        &self,
        sdo: &mut dyn SdoIo,
        cycle_time_ms: u8,
    ) -> Result<()> {
        let mode_number = self.actuation_mode.mode_number().ok_or_else(|| {
            InvalidActuationModeSnafu {
                mode: self.actuation_mode,
            }
            .build()
        })?;
        let ctx = WritingInitialSettingsFailedSnafu { slave: self.slave };

        // Mode of operation
        sdo.write_i8(self.slave, 0x6060, 0, mode_number).context(ctx)?;
        // Software position limits
        sdo.write_i32(
            self.slave,
            0x607D,
            1,
            self.absolute_encoder.lower_soft_limit_iu(),
        )
        .context(ctx)?;
        sdo.write_i32(
            self.slave,
            0x607D,
            2,
            self.absolute_encoder.upper_soft_limit_iu(),
        )
        .context(ctx)?;
        // Quick stop option code
        sdo.write_i16(self.slave, 0x605A, 0, 6).context(ctx)?;
        // Quick stop deceleration
        sdo.write_u32(self.slave, 0x6085, 0, 0x7FFF_FFFF).context(ctx)?;
        // Abort connection option code
        sdo.write_i16(self.slave, 0x6007, 0, 1).context(ctx)?;
        // Cycle time of the drive in the form x * 10^y
        sdo.write_u8(self.slave, 0x60C2, 1, cycle_time_ms).context(ctx)?;
        sdo.write_i8(self.slave, 0x60C2, 2, -3).context(ctx)?;

        Ok(())
    }

    /// Zero the control word and trigger the device reset register
    pub(crate) fn reset(&mut self, sdo: &mut dyn SdoIo) -> Result<()> {
        self.set_control_word(0);
        debug!("Slave {}: trying to reset drive", self.slave);
        sdo.write_u16(self.slave, 0x2080, 0, 1)
            .context(WritingInitialSettingsFailedSnafu { slave: self.slave })?;
        Ok(())
    }

    /// The family-agnostic part of the telemetry snapshot
    pub(crate) fn states(&self) -> MotorControllerStates {
        let status_word = self.status_word();
        let motion_error = self.motion_error();
        let detailed_error = self.detailed_error();
        MotorControllerStates {
            motor_current: self.motor_current(),
            controller_voltage: self.controller_voltage(),
            motor_voltage: self.motor_voltage(),
            absolute_position_iu: self.angle_iu_absolute(),
            incremental_position_iu: self.angle_iu_incremental(),
            absolute_velocity_iu: self.velocity_iu_absolute(),
            incremental_velocity_iu: self.velocity_iu_incremental(),
            status_word,
            drive_state: DriveState::from_status_word(status_word),
            motion_error,
            motion_error_description: describe_error(motion_error, ErrorRegister::MotionError),
            detailed_error,
            detailed_error_description: describe_error(detailed_error, ErrorRegister::DetailedError),
            second_detailed_error: None,
            second_detailed_error_description: None,
            drive_temperature: None,
        }
    }
}
