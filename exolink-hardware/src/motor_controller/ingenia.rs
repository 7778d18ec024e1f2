//! The Ingenia controller family
//!
//! Functionally a drop-in for the iMOTIONCUBE, with two differences: its
//! drive setup lives in a downloadable setup file whose checksum is
//! verified against the drive at startup, and it reports a second detailed
//! error register.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use snafu::ResultExt;

use exolink_common::objects::ObjectDictionary;
use exolink_common::traits::{PdoIo, SdoIo};
use exolink_common::{
    ActuationMode, DataDirection, ObjectDescriptor, ObjectName, SlaveIndex,
};

use crate::error::{
    InvalidActuationModeSnafu, InvalidSetupFileSnafu, PdoMappingSnafu, Result,
    WritingInitialSettingsFailedSnafu,
};
use crate::motor_controller::drive::Drive;
use crate::motor_controller::motion_error::{describe_error, ErrorRegister};
use crate::motor_controller::{MotorController, MotorControllerStates};
use crate::pdo_map::PdoMap;
use crate::Encoder;

/// Largest allowed distance between a position target and the current
/// position, in radians
pub const MAX_TARGET_STEP_RAD: f64 = 0.393;

/// Torque ceiling in drive units
pub const MAX_TARGET_TORQUE_IU: i16 = 23_500;

/// The object table of the Ingenia family
static OBJECT_DICTIONARY: &[(ObjectName, ObjectDescriptor)] = &[
    (ObjectName::StatusWord, ObjectDescriptor::new(0x6041, 16)),
    (ObjectName::ActualPosition, ObjectDescriptor::new(0x6064, 32)),
    (ObjectName::ActualVelocity, ObjectDescriptor::new(0x6069, 32)),
    (ObjectName::ActualTorque, ObjectDescriptor::new(0x6077, 16)),
    (ObjectName::MotionErrorRegister, ObjectDescriptor::new(0x2000, 16)),
    (ObjectName::DetailedErrorRegister, ObjectDescriptor::new(0x2002, 16)),
    (ObjectName::SecondDetailedErrorRegister, ObjectDescriptor::new(0x2009, 16)),
    (ObjectName::DcLinkVoltage, ObjectDescriptor::new(0x2055, 16)),
    (ObjectName::MotorPosition, ObjectDescriptor::new(0x2088, 32)),
    (ObjectName::MotorVelocity, ObjectDescriptor::new(0x2087, 32)),
    (ObjectName::MotorVoltage, ObjectDescriptor::new(0x2108, 16)),
    (ObjectName::ControlWord, ObjectDescriptor::new(0x6040, 16)),
    (ObjectName::TargetPosition, ObjectDescriptor::new(0x607A, 32)),
    (ObjectName::TargetTorque, ObjectDescriptor::new(0x6071, 16)),
    (ObjectName::QuickStopDeceleration, ObjectDescriptor::new(0x6085, 32)),
    (ObjectName::QuickStopOption, ObjectDescriptor::new(0x605A, 16)),
];

/// Parsed summary of a setup file: the memory range it covers and the
/// 16-bit sum of its data words
struct SetupChecksum {
    start_address: u16,
    end_address: u16,
    sum: u16,
}

/// An Ingenia motor controller
pub struct Ingenia {
    drive: Drive,
    setup_file: Option<String>,
}

impl Ingenia {
    /// Create a controller for the given slave
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
            setup_file: None,
        }
    }

    /// Create a controller whose drive setup is verified against a setup
    /// file at startup
    ///
    /// The file contents are the drive vendor's `.sw` format: a start
    /// address followed by one hexadecimal data word per line, terminated
    /// by an empty line.
    pub fn with_setup_file(
        slave: SlaveIndex,
        absolute_encoder: Encoder,
        incremental_encoder: Encoder,
        actuation_mode: ActuationMode,
        setup_file: String,
    ) -> Self {
        let mut controller = Self::new(slave, absolute_encoder, incremental_encoder, actuation_mode);
        controller.setup_file = Some(setup_file);
        controller
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
        map.add_object(ObjectName::SecondDetailedErrorRegister).context(PdoMappingSnafu)?;
        map.add_object(ObjectName::DcLinkVoltage).context(PdoMappingSnafu)?;
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

    fn parse_hex_word(&self, token: &str) -> Result<u16> {
        u16::from_str_radix(token.trim(), 16).map_err(|_| {
            InvalidSetupFileSnafu {
                slave: self.drive.slave(),
                message: format!("'{}' is not a hexadecimal word", token.trim()),
            }
            .build()
        })
    }

    /// Compute the checksum of the setup file the way the drive does: the
    /// wrapping 16-bit sum of all data words
    fn compute_setup_checksum(&self, setup_file: &str) -> Result<SetupChecksum> {
        let mut lines = setup_file.split('\n');
        let first = lines.next().ok_or_else(|| {
            InvalidSetupFileSnafu {
                slave: self.drive.slave(),
                message: "setup file is empty".to_string(),
            }
            .build()
        })?;
        let start_address = self.parse_hex_word(first)?;

        // The address line counts toward the covered range but not the sum
        let mut word_count: u16 = 1;
        let mut sum: u16 = 0;
        for line in lines {
            if line.trim().is_empty() {
                return Ok(SetupChecksum {
                    start_address,
                    end_address: word_count.wrapping_add(start_address).wrapping_sub(1),
                    sum,
                });
            }
            sum = sum.wrapping_add(self.parse_hex_word(line)?);
            word_count += 1;
        }

        InvalidSetupFileSnafu {
            slave: self.drive.slave(),
            message: "setup file has no terminating empty line".to_string(),
        }
        .fail()
    }

    /// Ask the drive to checksum the setup's memory range and compare it
    /// against the file
    fn verify_setup(&self, sdo: &mut dyn SdoIo, setup_file: &str) -> Result<bool> {
        let checksum = self.compute_setup_checksum(setup_file)?;
        let ctx = WritingInitialSettingsFailedSnafu {
            slave: self.drive.slave(),
        };

        let range = ((checksum.end_address as u32) << 16) | checksum.start_address as u32;
        sdo.write_u32(self.drive.slave(), 0x2069, 0, range).context(ctx)?;
        let drive_sum = sdo.read_u16(self.drive.slave(), 0x206A, 0).context(ctx)?;

        debug!(
            "Setup file checksum is {}, drive checksum is {}",
            checksum.sum, drive_sum
        );
        Ok(checksum.sum == drive_sum)
    }

    /// Stream the setup file into the drive's configuration memory
    fn download_setup(&self, sdo: &mut dyn SdoIo, setup_file: &str) -> Result<()> {
        let ctx = WritingInitialSettingsFailedSnafu {
            slave: self.drive.slave(),
        };

        let mut lines = setup_file.split('\n');
        let first = lines.next().ok_or_else(|| {
            InvalidSetupFileSnafu {
                slave: self.drive.slave(),
                message: "setup file is empty".to_string(),
            }
            .build()
        })?;
        let memory_location = self.parse_hex_word(first)?;

        // Write configuration: target location, 16-bit words, auto increment
        let write_config = ((memory_location as u32) << 16) | 9;
        sdo.write_u32(self.drive.slave(), 0x2064, 0, write_config).context(ctx)?;

        let words: Vec<&str> = lines.take_while(|line| !line.trim().is_empty()).collect();
        for pair in words.chunks(2) {
            let low = self.parse_hex_word(pair[0])? as u32;
            let data = if pair.len() == 2 {
                ((self.parse_hex_word(pair[1])? as u32) << 16) | low
            } else {
                low
            };
            sdo.write_u32(self.drive.slave(), 0x2065, 0, data).context(ctx)?;
        }
        Ok(())
    }

    /// Returns true when the setup had to be re-downloaded, in which case
    /// the drive needs a restart before it may actuate
    fn verify_or_download_setup(&self, sdo: &mut dyn SdoIo, setup_file: &str) -> Result<bool> {
        if self.verify_setup(sdo, setup_file)? {
            debug!(
                "Setup file for slave {} matches the drive setup",
                self.drive.slave()
            );
            return Ok(false);
        }

        warn!(
            "Setup file for slave {} differs from the drive setup, downloading",
            self.drive.slave()
        );
        self.download_setup(sdo, setup_file)?;
        if self.verify_setup(sdo, setup_file)? {
            info!("Writing the setup data succeeded");
            Ok(true)
        } else {
            error!("Writing the setup data failed");
            InvalidSetupFileSnafu {
                slave: self.drive.slave(),
                message: "downloaded setup failed checksum verification".to_string(),
            }
            .fail()
        }
    }
}

impl MotorController for Ingenia {
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

        if let Some(setup_file) = self.setup_file.as_deref() {
            if self.verify_or_download_setup(sdo, setup_file)? {
                // The new setup only takes effect after a drive restart;
                // the remaining settings are written on the next startup
                return Ok(true);
            }
        }

        self.drive.write_initial_settings(sdo, cycle_time_ms)?;

        // Route the motor voltage through the drive's filter object so it
        // shows up on the mapped register
        let ctx = WritingInitialSettingsFailedSnafu {
            slave: self.drive.slave(),
        };
        sdo.write_i16(self.drive.slave(), 0x2108, 1, 0x0232).context(ctx)?;
        sdo.write_i16(self.drive.slave(), 0x2108, 2, 32767).context(ctx)?;

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
        let second = self.drive.second_detailed_error();
        states.second_detailed_error = Some(second);
        states.second_detailed_error_description = Some(describe_error(
            second,
            ErrorRegister::SecondDetailedError,
        ));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Ingenia {
        let absolute = Encoder::new(17, 2000, 60000, 4000, 0.03).unwrap();
        let incremental = Encoder::incremental(12).unwrap();
        Ingenia::with_setup_file(
            SlaveIndex::new(1).unwrap(),
            absolute,
            incremental,
            ActuationMode::Position,
            "1A2B\n0001\n0002\nFFFF\n\n".to_string(),
        )
    }

    #[test]
    fn setup_checksum_sums_data_words() {
        let controller = controller();
        let checksum = controller
            .compute_setup_checksum("1A2B\n0001\n0002\nFFFF\n\n")
            .unwrap();
        assert_eq!(checksum.start_address, 0x1A2B);
        // Three data words plus the address line, minus one
        assert_eq!(checksum.end_address, 0x1A2B + 3);
        assert_eq!(checksum.sum, 0x0001u16.wrapping_add(0x0002).wrapping_add(0xFFFF));
    }

    #[test]
    fn setup_checksum_wraps() {
        let controller = controller();
        let checksum = controller
            .compute_setup_checksum("0010\nFFFF\nFFFF\n\n")
            .unwrap();
        assert_eq!(checksum.sum, 0xFFFEu16);
    }

    #[test]
    fn setup_without_terminator_is_rejected() {
        let controller = controller();
        assert!(controller.compute_setup_checksum("0010\n0001").is_err());
    }

    #[test]
    fn setup_with_garbage_is_rejected() {
        let controller = controller();
        assert!(controller
            .compute_setup_checksum("0010\nzzzz\n\n")
            .is_err());
    }
}
