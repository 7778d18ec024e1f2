//! The iMOTIONCUBE controller family

use std::collections::HashMap;
use std::sync::Arc;

use exolink_common::objects::ObjectDictionary;
use exolink_common::traits::{PdoIo, SdoIo};
use exolink_common::{
    ActuationMode, DataDirection, ObjectDescriptor, ObjectName, SlaveIndex,
};
use snafu::ResultExt;

use crate::error::{InvalidActuationModeSnafu, PdoMappingSnafu, Result};
use crate::motor_controller::drive::Drive;
use crate::motor_controller::{MotorController, MotorControllerStates};
use crate::pdo_map::PdoMap;
use crate::Encoder;

/// Largest allowed distance between a position target and the current
/// position, in radians
pub const MAX_TARGET_STEP_RAD: f64 = 0.393;

/// Torque ceiling in drive units
pub const MAX_TARGET_TORQUE_IU: i16 = 23_500;

/// The object table of the iMOTIONCUBE family
static OBJECT_DICTIONARY: &[(ObjectName, ObjectDescriptor)] = &[
    (ObjectName::StatusWord, ObjectDescriptor::new(0x6041, 16)),
    (ObjectName::ActualPosition, ObjectDescriptor::new(0x6064, 32)),
    (ObjectName::ActualVelocity, ObjectDescriptor::new(0x6069, 32)),
    (ObjectName::ActualTorque, ObjectDescriptor::new(0x6077, 16)),
    (ObjectName::MotionErrorRegister, ObjectDescriptor::new(0x2000, 16)),
    (ObjectName::DetailedErrorRegister, ObjectDescriptor::new(0x2002, 16)),
    (ObjectName::DcLinkVoltage, ObjectDescriptor::new(0x2055, 16)),
    (ObjectName::DriveTemperature, ObjectDescriptor::new(0x2058, 16)),
    (ObjectName::MotorPosition, ObjectDescriptor::new(0x2088, 32)),
    (ObjectName::MotorVelocity, ObjectDescriptor::new(0x2087, 32)),
    (ObjectName::MotorVoltage, ObjectDescriptor::new(0x2109, 16)),
    (ObjectName::CurrentLimit, ObjectDescriptor::new(0x207F, 16)),
    (ObjectName::ControlWord, ObjectDescriptor::new(0x6040, 16)),
    (ObjectName::TargetPosition, ObjectDescriptor::new(0x607A, 32)),
    (ObjectName::TargetTorque, ObjectDescriptor::new(0x6071, 16)),
    (ObjectName::QuickStopDeceleration, ObjectDescriptor::new(0x6085, 32)),
    (ObjectName::QuickStopOption, ObjectDescriptor::new(0x605A, 16)),
];

/// An iMOTIONCUBE motor controller
pub struct IMotionCube {
    drive: Drive,
}

impl IMotionCube {
    /// Create a controller for the given slave
    ///
    /// The controller takes exclusive ownership of its encoders; they are
    /// never referenced from outside it.
    pub fn new(
        slave: SlaveIndex,
        absolute_encoder: Encoder,
        incremental_encoder: Encoder,
        actuation_mode: ActuationMode,
    ) -> Self {
        Self {
            drive: Drive::new(
                slave,
                absolute_encoder,
                incremental_encoder,
                actuation_mode,
                MAX_TARGET_STEP_RAD,
                MAX_TARGET_TORQUE_IU,
            ),
        }
    }

    /// The object dictionary of this family
    pub fn dictionary() -> ObjectDictionary {
        OBJECT_DICTIONARY
    }

    fn map_miso_pdos(&self, sdo: &mut dyn SdoIo) -> Result<HashMap<ObjectName, usize>> {
        let mut map = PdoMap::new(OBJECT_DICTIONARY);
        map.add_object(ObjectName::StatusWord).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::ActualPosition).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::ActualTorque).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::MotionErrorRegister).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::DetailedErrorRegister).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::DcLinkVoltage).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::DriveTemperature).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::MotorVoltage).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::MotorPosition).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::MotorVelocity).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::ActualVelocity).context(PdoMappingSnafu)?;
        map.map(sdo, self.drive.slave(), DataDirection::Miso)
            .context(PdoMappingSnafu)
    }

    fn map_mosi_pdos(&self, sdo: &mut dyn SdoIo) -> Result<HashMap<ObjectName, usize>> {
        let mut map = PdoMap::new(OBJECT_DICTIONARY);
        map.add_object(ObjectName::ControlWord).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::TargetPosition).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::TargetTorque).context(PdoMappingSnafu)?;
        map.map(sdo, self.drive.slave(), DataDirection::Mosi)
            .context(PdoMappingSnafu)
    }
}

impl MotorController for IMotionCube {
    fn initialize(
        &mut self,
        sdo: &mut dyn SdoIo,
        pdo: Arc<dyn PdoIo>,
        cycle_time_ms: u8,
    ) -> Result<bool> {
        if self.drive.actuation_mode() == ActuationMode::Unknown {
            return InvalidActuationModeSnafu {
                mode: self.drive.actuation_mode(),
            }
            .fail();
        }

        let miso = self.map_miso_pdos(sdo)?;
        let mosi = self.map_mosi_pdos(sdo)?;
        self.drive.bind(pdo, miso, mosi);
        self.drive.write_initial_settings(sdo, cycle_time_ms)?;
        Ok(false)
    }

    fn prepare_actuation(&mut self) -> Result<()> {
        self.drive.prepare_actuation()
    }

    fn actuate_rad(&mut self, target_rad: f64) -> Result<()> {
        self.drive.actuate_rad(target_rad)
    }

    fn actuate_torque(&mut self, target_torque: i16) -> Result<()> {
        self.drive.actuate_torque(target_torque)
    }

    fn angle_rad_absolute(&self) -> f64 {
        self.drive.angle_rad_absolute()
    }

    fn angle_rad_incremental(&self) -> f64 {
        self.drive.angle_rad_incremental()
    }

    fn velocity_rad_absolute(&self) -> f64 {
        self.drive.velocity_rad_absolute()
    }

    fn velocity_rad_incremental(&self) -> f64 {
        self.drive.velocity_rad_incremental()
    }

    fn incremental_more_precise(&self) -> bool {
        self.drive.incremental_more_precise()
    }

    fn torque(&self) -> i16 {
        self.drive.torque()
    }

    fn motor_current(&self) -> f32 {
        self.drive.motor_current()
    }

    fn motor_voltage(&self) -> f32 {
        self.drive.motor_voltage()
    }

    fn controller_voltage(&self) -> f32 {
        self.drive.controller_voltage()
    }

    fn status_word(&self) -> u16 {
        self.drive.status_word()
    }

    fn states(&self) -> MotorControllerStates {
        let mut states = self.drive.states();
        states.drive_temperature = Some(self.drive.drive_temperature());
        states
    }

    fn reset(&mut self, sdo: &mut dyn SdoIo) -> Result<()> {
        self.drive.reset(sdo)
    }

    fn actuation_mode(&self) -> ActuationMode {
        self.drive.actuation_mode()
    }

    fn slave_index(&self) -> SlaveIndex {
        self.drive.slave()
    }
}
