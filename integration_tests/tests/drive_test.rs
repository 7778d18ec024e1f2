use integration_tests::prelude::*;

/// A mid-range position: well inside the soft limits of the test encoder
const SAFE_POSITION_IU: i32 = 5000;

fn started_robot(joint: Joint, position_iu: i32) -> (Robot<SimLink>, SimHandle) {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![joint], link, 1);
    robot.start_communication(false).unwrap();
    handle.set_position_iu(1, position_iu);
    (robot, handle)
}

#[test]
fn prepare_actuation_walks_the_enable_sequence() {
    let (mut robot, handle) = started_robot(position_joint("left_knee", 1), SAFE_POSITION_IU);

    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    // The drive ended up operation enabled, holding the current position
    assert_eq!(handle.status_word(1) & 0x6F, 0x27);
    assert_eq!(handle.target_position(1), SAFE_POSITION_IU);
}

#[test]
fn prepare_actuation_rejects_a_reset_encoder() {
    // An absolute encoder reading (near) zero after power up means it lost
    // its calibration; actuating from an unknown position is refused
    let (mut robot, _handle) = started_robot(position_joint("left_knee", 1), 0);

    let result = robot.joint("left_knee").unwrap().prepare_actuation();
    assert!(matches!(result, Err(HardwareError::EncoderReset { .. })));
}

#[test]
fn prepare_actuation_rejects_a_position_outside_hard_limits() {
    let (mut robot, _handle) = started_robot(position_joint("left_knee", 1), 70_000);

    let result = robot.joint("left_knee").unwrap().prepare_actuation();
    assert!(matches!(
        result,
        Err(HardwareError::OutsideHardLimits { .. })
    ));
}

#[test]
fn drive_fault_during_enable_aborts() {
    let (mut robot, handle) = started_robot(position_joint("left_knee", 1), SAFE_POSITION_IU);
    handle.set_fault_on_enable(1);

    let result = robot.joint("left_knee").unwrap().prepare_actuation();
    assert!(matches!(result, Err(HardwareError::DriveFault { .. })));
    assert_eq!(handle.status_word(1), 0x0008);
}

#[test]
fn actuate_rad_writes_the_target_register() {
    let (mut robot, handle) = started_robot(position_joint("left_knee", 1), SAFE_POSITION_IU);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    let current = test_encoder().iu_to_rad(SAFE_POSITION_IU);
    let target = current + 0.2;
    robot.joint("left_knee").unwrap().actuate_rad(target).unwrap();

    assert_eq!(handle.target_position(1), test_encoder().rad_to_iu(target));
}

#[test]
fn actuate_rad_rejects_an_oversized_step() {
    let (mut robot, _handle) = started_robot(position_joint("left_knee", 1), SAFE_POSITION_IU);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    let current = test_encoder().iu_to_rad(SAFE_POSITION_IU);
    let result = robot.joint("left_knee").unwrap().actuate_rad(current + 0.5);
    assert!(matches!(
        result,
        Err(HardwareError::TargetExceedsMaxStep { .. })
    ));
}

#[test]
fn actuate_rad_rejects_a_target_beyond_the_soft_limit() {
    // Current position close to the upper soft limit, so a small step can
    // land outside it without tripping the step-size check
    let near_upper_soft = 59_000;
    let (mut robot, _handle) = started_robot(position_joint("left_knee", 1), near_upper_soft);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    let target = test_encoder().iu_to_rad(59_900);
    let result = robot.joint("left_knee").unwrap().actuate_rad(target);
    assert!(matches!(
        result,
        Err(HardwareError::InvalidActuatePosition { .. })
    ));
}

#[test]
fn actuate_rad_requires_position_mode() {
    let (mut robot, _handle) = started_robot(torque_joint("left_knee", 1), SAFE_POSITION_IU);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    let result = robot.joint("left_knee").unwrap().actuate_rad(0.1);
    assert!(matches!(
        result,
        Err(HardwareError::InvalidActuationMode { .. })
    ));
}

#[test]
fn torque_mode_holds_zero_torque_and_bounds_targets() {
    let (mut robot, handle) = started_robot(torque_joint("left_knee", 1), SAFE_POSITION_IU);
    robot.joint("left_knee").unwrap().prepare_actuation().unwrap();

    // The enable sequence commanded zero torque
    assert_eq!(handle.target_torque(1), 0);

    robot.joint("left_knee").unwrap().actuate_torque(500).unwrap();
    assert_eq!(handle.target_torque(1), 500);

    let result = robot.joint("left_knee").unwrap().actuate_torque(23_500);
    assert!(matches!(
        result,
        Err(HardwareError::TargetTorqueExceedsMax { .. })
    ));
    // The rejected command never reached the device
    assert_eq!(handle.target_torque(1), 500);
}
