//! A single actuated joint of the exoskeleton

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use exolink_common::traits::{PdoIo, SdoIo};
use exolink_common::{ActuationMode, SlaveIndex};

use crate::error::{MissingMotorControllerSnafu, NotAllowedToActuateSnafu, Result};
use crate::motor_controller::{MotorController, MotorControllerStates};
use crate::temperature::TemperatureGes;

/// Winding resistance of the joint motors in ohm
const MOTOR_RESISTANCE: f64 = 0.05;
/// Motor velocity constant in rpm/V
const MOTOR_VELOCITY_CONSTANT: f64 = 355.0;

/// The controller readings compared cycle-over-cycle to detect stale data
#[derive(Clone, Copy, PartialEq)]
struct ControllerReadings {
    controller_voltage: f32,
    motor_voltage: f32,
    motor_current: f32,
    absolute_position: f64,
    incremental_position: f64,
    absolute_velocity: f64,
    incremental_velocity: f64,
}

/// One joint: a motor controller plus an optional temperature sensor
///
/// A joint with neither sub-device is legal but inert. The joint applies
/// the actuation-allowed gate before any command reaches the controller,
/// and blends the two encoder signals into a single position/velocity
/// estimate that stays continuous between fieldbus updates.
pub struct Joint {
    name: String,
    net_number: u8,
    allow_actuation: bool,
    controller: Option<Box<dyn MotorController>>,
    temperature_ges: Option<TemperatureGes>,
    position: f64,
    velocity: f64,
    incremental_position: f64,
    absolute_position: f64,
    previous_readings: Option<ControllerReadings>,
}

impl Joint {
    /// Create an inert joint with no sub-devices
    pub fn new(name: impl Into<String>, net_number: u8) -> Self {
        Self::with_devices(name, net_number, false, None, None)
    }

    /// Create a joint with its sub-devices
    pub fn with_devices(
        name: impl Into<String>,
        net_number: u8,
        allow_actuation: bool,
        controller: Option<Box<dyn MotorController>>,
        temperature_ges: Option<TemperatureGes>,
    ) -> Self {
        Self {
            name: name.into(),
            net_number,
            allow_actuation,
            controller,
            temperature_ges,
            position: 0.0,
            velocity: 0.0,
            incremental_position: 0.0,
            absolute_position: 0.0,
            previous_readings: None,
        }
    }

    /// Initialize the sub-devices while the fieldbus is pre-operational
    ///
    /// Returns true when a controller requires a restart before actuation
    /// (propagated from a setup re-download).
    pub fn initialize(
        &mut self,
        sdo: &mut dyn SdoIo,
        pdo: &Arc<dyn PdoIo>,
        cycle_time_ms: u8,
    ) -> Result<bool> {
        let mut restart_required = false;
        if let Some(controller) = &mut self.controller {
            restart_required |= controller.initialize(sdo, pdo.clone(), cycle_time_ms)?;
        }
        if let Some(ges) = &mut self.temperature_ges {
            ges.initialize(pdo.clone());
        }
        Ok(restart_required)
    }

    /// Walk the controller to OperationEnabled and prime the position caches
    pub fn prepare_actuation(&mut self) -> Result<()> {
        if !self.can_actuate() {
            return NotAllowedToActuateSnafu {
                joint: self.name.clone(),
            }
            .fail();
        }
        info!("[{}] Preparing for actuation", self.name);
        let controller = self.controller.as_mut().unwrap();
        controller.prepare_actuation()?;
        info!("[{}] Successfully prepared for actuation", self.name);

        self.incremental_position = controller.angle_rad_incremental();
        self.absolute_position = controller.angle_rad_absolute();
        self.position = self.absolute_position;
        self.velocity = 0.0;
        Ok(())
    }

    /// Command a target angle in radians
    pub fn actuate_rad(&mut self, target_rad: f64) -> Result<()> {
        if !self.can_actuate() {
            return NotAllowedToActuateSnafu {
                joint: self.name.clone(),
            }
            .fail();
        }
        self.controller.as_mut().unwrap().actuate_rad(target_rad)
    }

    /// Command a target torque in drive units
    pub fn actuate_torque(&mut self, target_torque: i16) -> Result<()> {
        if !self.can_actuate() {
            return NotAllowedToActuateSnafu {
                joint: self.name.clone(),
            }
            .fail();
        }
        self.controller
            .as_mut()
            .unwrap()
            .actuate_torque(target_torque)
    }

    /// Check whether fresh cyclic data arrived for this joint
    ///
    /// Compares the latest controller readings against the previous cycle's
    /// cached values and always updates the cache. Slave and master cycle
    /// rates need not match exactly, so a cycle without changed data means
    /// this slave produced nothing new, not that the link failed.
    pub fn received_data_update(&mut self) -> bool {
        let Some(controller) = &self.controller else {
            return false;
        };

        let readings = ControllerReadings {
            controller_voltage: controller.controller_voltage(),
            motor_voltage: controller.motor_voltage(),
            motor_current: controller.motor_current(),
            absolute_position: controller.angle_rad_absolute(),
            incremental_position: controller.angle_rad_incremental(),
            absolute_velocity: controller.velocity_rad_absolute(),
            incremental_velocity: controller.velocity_rad_incremental(),
        };
        let updated = self.previous_readings != Some(readings);
        self.previous_readings = Some(readings);
        updated
    }

    /// Update the blended position and velocity estimates
    ///
    /// On fresh data the estimates come from whichever encoder has the
    /// finer resolution; otherwise the position is dead-reckoned with the
    /// last known velocity so telemetry stays continuous between fieldbus
    /// updates without fabricating precision.
    pub fn read_encoders(&mut self, elapsed: Duration) {
        if self.controller.is_none() {
            return;
        }

        if self.received_data_update() {
            let controller = self.controller.as_ref().unwrap();
            let incremental_change =
                controller.angle_rad_incremental() - self.incremental_position;

            if controller.incremental_more_precise() {
                self.velocity = controller.velocity_rad_incremental();
                self.position += incremental_change;
            } else {
                self.velocity = controller.velocity_rad_absolute();
                self.position = controller.angle_rad_absolute();
            }
            self.incremental_position += incremental_change;
            self.absolute_position = controller.angle_rad_absolute();
        } else {
            let dt = elapsed.as_secs_f64();
            self.position += self.velocity * dt;
            self.incremental_position += self.velocity * dt;
            self.absolute_position += self.velocity * dt;
        }
    }

    /// The blended joint position in radians
    pub fn position(&self) -> f64 {
        self.position
    }

    /// The blended joint velocity in rad/s
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// The incremental-encoder position estimate in radians
    pub fn incremental_position(&self) -> f64 {
        self.incremental_position
    }

    /// The absolute-encoder position estimate in radians
    pub fn absolute_position(&self) -> f64 {
        self.absolute_position
    }

    /// Velocity estimate from the motor's back EMF, in rad/s
    pub fn voltage_velocity(&self) -> Option<f64> {
        let controller = self.controller.as_ref()?;
        let rpm_to_rad = PI / 30.0;
        let electric_constant = MOTOR_VELOCITY_CONSTANT * rpm_to_rad;
        Some(
            (controller.motor_voltage() as f64
                + controller.motor_current() as f64 * MOTOR_RESISTANCE)
                / electric_constant,
        )
    }

    /// Actual torque in drive units
    pub fn torque(&self) -> Option<i16> {
        self.controller.as_ref().map(|c| c.torque())
    }

    /// The latest temperature reading, if a sensor is fitted
    pub fn temperature(&self) -> Option<f32> {
        self.temperature_ges.as_ref().map(|ges| ges.temperature())
    }

    /// Full controller telemetry snapshot
    pub fn motor_controller_states(&self) -> Option<MotorControllerStates> {
        self.controller.as_ref().map(|c| c.states())
    }

    /// Zero the control word and reset the controller over the mailbox
    pub fn reset_motor_controller(&mut self, sdo: &mut dyn SdoIo) -> Result<()> {
        match &mut self.controller {
            Some(controller) => controller.reset(sdo),
            None => MissingMotorControllerSnafu {
                joint: self.name.clone(),
            }
            .fail(),
        }
    }

    /// The configured actuation mode
    pub fn actuation_mode(&self) -> ActuationMode {
        self.controller
            .as_ref()
            .map(|c| c.actuation_mode())
            .unwrap_or(ActuationMode::Unknown)
    }

    /// Allow or disallow actuation of this joint
    pub fn set_allow_actuation(&mut self, allow: bool) {
        self.allow_actuation = allow;
    }

    /// Whether actuation commands are currently accepted
    pub fn can_actuate(&self) -> bool {
        self.allow_actuation && self.controller.is_some()
    }

    /// Whether the joint has a motor controller
    pub fn has_motor_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Whether the joint has a temperature sensor
    pub fn has_temperature_ges(&self) -> bool {
        self.temperature_ges.is_some()
    }

    /// The controller's fieldbus index
    pub fn motor_controller_slave_index(&self) -> Option<SlaveIndex> {
        self.controller.as_ref().map(|c| c.slave_index())
    }

    /// The temperature sensor's fieldbus index
    pub fn temperature_ges_slave_index(&self) -> Option<SlaveIndex> {
        self.temperature_ges.as_ref().map(|ges| ges.slave_index())
    }

    /// The joint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The power net this joint is fed from
    pub fn net_number(&self) -> u8 {
        self.net_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HardwareError;
    use assertables::assert_in_delta;

    /// A controller stub with fixed readings
    struct StubController {
        absolute_position: f64,
        incremental_position: f64,
        absolute_velocity: f64,
        incremental_velocity: f64,
        incremental_more_precise: bool,
    }

    impl StubController {
        fn boxed(incremental_more_precise: bool) -> Box<Self> {
            Box::new(Self {
                absolute_position: 0.5,
                incremental_position: 0.1,
                absolute_velocity: 0.2,
                incremental_velocity: 0.3,
                incremental_more_precise,
            })
        }
    }

    impl MotorController for StubController {
        fn initialize(
            &mut self,
            _sdo: &mut dyn SdoIo,
            _pdo: Arc<dyn PdoIo>,
            _cycle_time_ms: u8,
        ) -> Result<bool> {
            Ok(false)
        }

        fn prepare_actuation(&mut self) -> Result<()> {
            Ok(())
        }

        fn actuate_rad(&mut self, _target_rad: f64) -> Result<()> {
            Ok(())
        }

        fn actuate_torque(&mut self, _target_torque: i16) -> Result<()> {
            Ok(())
        }

        fn angle_rad_absolute(&self) -> f64 {
            self.absolute_position
        }

        fn angle_rad_incremental(&self) -> f64 {
            self.incremental_position
        }

        fn velocity_rad_absolute(&self) -> f64 {
            self.absolute_velocity
        }

        fn velocity_rad_incremental(&self) -> f64 {
            self.incremental_velocity
        }

        fn incremental_more_precise(&self) -> bool {
            self.incremental_more_precise
        }

        fn torque(&self) -> i16 {
            7
        }

        fn motor_current(&self) -> f32 {
            1.5
        }

        fn motor_voltage(&self) -> f32 {
            24.0
        }

        fn controller_voltage(&self) -> f32 {
            48.0
        }

        fn status_word(&self) -> u16 {
            0x0627
        }

        fn states(&self) -> MotorControllerStates {
            unimplemented!("not needed by these tests")
        }

        fn reset(&mut self, _sdo: &mut dyn SdoIo) -> Result<()> {
            Ok(())
        }

        fn actuation_mode(&self) -> ActuationMode {
            ActuationMode::Position
        }

        fn slave_index(&self) -> SlaveIndex {
            SlaveIndex::new(1).unwrap()
        }
    }

    fn joint_with_stub(incremental_more_precise: bool) -> Joint {
        Joint::with_devices(
            "left_knee",
            1,
            true,
            Some(StubController::boxed(incremental_more_precise)),
            None,
        )
    }

    #[test]
    fn first_data_update_is_always_fresh() {
        let mut joint = joint_with_stub(false);
        assert!(joint.received_data_update());
        assert!(!joint.received_data_update());
    }

    #[test]
    fn inert_joint_never_reports_fresh_data() {
        let mut joint = Joint::new("inert", 0);
        assert!(!joint.received_data_update());
    }

    #[test]
    fn stale_data_is_dead_reckoned() {
        let mut joint = joint_with_stub(false);
        // First read consumes the initial "fresh" state and snaps to the
        // absolute encoder
        joint.read_encoders(Duration::from_millis(4));
        assert_in_delta!(joint.position(), 0.5, 1e-12);
        assert_in_delta!(joint.velocity(), 0.2, 1e-12);

        // No new data: position advances by velocity * dt
        joint.read_encoders(Duration::from_millis(100));
        assert_in_delta!(joint.position(), 0.5 + 0.2 * 0.1, 1e-12);
    }

    #[test]
    fn finer_incremental_encoder_drives_the_estimate() {
        let mut joint = joint_with_stub(true);
        joint.read_encoders(Duration::from_millis(4));
        assert_in_delta!(joint.velocity(), 0.3, 1e-12);
    }

    #[test]
    fn actuation_requires_the_allow_flag() {
        let mut joint = joint_with_stub(false);
        joint.set_allow_actuation(false);
        assert!(matches!(
            joint.actuate_rad(0.1),
            Err(HardwareError::NotAllowedToActuate { .. })
        ));
        assert!(matches!(
            joint.actuate_torque(10),
            Err(HardwareError::NotAllowedToActuate { .. })
        ));
    }

    #[test]
    fn actuation_requires_a_controller() {
        let mut joint = Joint::with_devices("inert", 0, true, None, None);
        assert!(!joint.can_actuate());
        assert!(matches!(
            joint.actuate_rad(0.1),
            Err(HardwareError::NotAllowedToActuate { .. })
        ));
    }

    #[test]
    fn voltage_velocity_uses_motor_constants() {
        let joint = joint_with_stub(false);
        let expected = (24.0 + 1.5 * 0.05) / (355.0 * PI / 30.0);
        assert_in_delta!(joint.voltage_velocity().unwrap(), expected, 1e-9);
    }
}
