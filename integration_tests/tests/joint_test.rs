use std::time::Duration;

use assertables::assert_in_delta;
use integration_tests::prelude::*;
use integration_tests::utils::{incremental_encoder, test_encoder};
use exolink_hardware::{IMotionCube, Joint, TemperatureGes};

#[test]
fn joint_temperature_comes_from_the_ges() {
    let controller = IMotionCube::new(
        SlaveIndex::new(1).unwrap(),
        test_encoder(),
        incremental_encoder(),
        ActuationMode::Position,
    );
    let ges = TemperatureGes::new(SlaveIndex::new(2).unwrap(), 0);
    let joint = Joint::with_devices("left_knee", 1, true, Some(Box::new(controller)), Some(ges));

    let link = SimLink::new(2);
    let handle = link.handle();
    let mut robot = sim_robot(vec![joint], link, 2);
    robot.start_communication(false).unwrap();

    handle.set_input_f32(2, 0, 36.5);
    let joint = robot.joint("left_knee").unwrap();
    assert!(joint.has_temperature_ges());
    assert_in_delta!(joint.temperature().unwrap(), 36.5, 1e-6);
}

#[test]
fn joint_without_ges_has_no_temperature() {
    let link = SimLink::new(1);
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();
    assert_eq!(robot.joint("left_knee").unwrap().temperature(), None);
}

#[test]
fn read_encoders_follows_fresh_cyclic_data() {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();
    handle.set_position_iu(1, 5000);

    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();
    let encoder = test_encoder();
    assert_in_delta!(
        robot.joint("left_knee").unwrap().position(),
        encoder.iu_to_rad(5000),
        1e-9
    );

    // The slave reports a new position; the estimate follows the absolute
    // encoder (it is finer than the 12-bit incremental one)
    handle.set_position_iu(1, 6000);
    robot.wait_for_update();
    let cycle = robot.cycle_time();
    let joint = robot.joint("left_knee").unwrap();
    joint.read_encoders(cycle);
    assert_in_delta!(joint.position(), encoder.iu_to_rad(6000), 1e-9);

    // No new data: the position is dead-reckoned from the last velocity,
    // which the simulated drive reports as zero
    joint.read_encoders(cycle);
    assert_in_delta!(joint.position(), encoder.iu_to_rad(6000), 1e-9);
}

#[test]
fn stale_cycles_dead_reckon_with_the_last_velocity() {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();
    handle.set_position_iu(1, 5000);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    let joint = robot.joint("left_knee").unwrap();
    // Consume the fresh reading, then hold the sim state constant
    joint.read_encoders(Duration::from_millis(4));
    let before = joint.position();
    joint.read_encoders(Duration::from_millis(4));
    // Velocity is zero, so the dead-reckoned position does not move
    assert_in_delta!(joint.position(), before, 1e-12);
}

#[test]
fn reset_clears_the_latched_drive_state() {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();

    robot.reset_motor_controllers().unwrap();
    // The reset command was written to the device reset register
    assert_eq!(handle.object(1, 0x2080, 0), Some(1u16.to_le_bytes().to_vec()));
}
