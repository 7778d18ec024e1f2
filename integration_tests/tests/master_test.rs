use integration_tests::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn startup_reaches_operational_and_cycles() {
    init_logging();
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);

    robot.start_communication(false).unwrap();
    assert!(robot.is_operational());
    assert_eq!(handle.al_state(1), AlState::Operational);

    // The cyclic thread is exchanging frames
    robot.wait_for_update();
    robot.wait_for_update();

    robot.stop_communication();
    assert!(!robot.is_operational());
    assert!(handle.is_closed());
    assert_eq!(handle.al_state(1), AlState::Init);

    // stop is idempotent
    robot.stop_communication();
}

#[test]
fn startup_fails_without_a_socket() {
    let link = SimLink::new(1);
    link.handle().set_fail_open();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);

    let result = robot.start_communication(false);
    assert!(matches!(result, Err(HardwareError::Link { .. })));
    assert!(!robot.is_operational());
}

#[test]
fn startup_fails_when_slaves_are_missing() {
    let link = SimLink::new(2);
    let handle = link.handle();
    handle.set_discovered(1);
    let mut robot = sim_robot(
        vec![position_joint("left_knee", 1), position_joint("right_knee", 2)],
        link,
        2,
    );

    let result = robot.start_communication(false);
    assert!(matches!(
        result,
        Err(HardwareError::NotAllSlavesFound {
            expected: 2,
            found: 1
        })
    ));
    // The link is closed again; this is a wiring error, not retried
    assert!(handle.is_closed());
    assert!(!robot.is_operational());
}

#[test]
fn startup_fails_when_operational_is_never_reached() {
    let link = SimLink::new(1);
    let handle = link.handle();
    handle.prevent_operational();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);

    let result = robot.start_communication(false);
    assert!(matches!(
        result,
        Err(HardwareError::FailedToReachOperational)
    ));
    assert!(!robot.is_operational());
}

#[test]
fn negotiated_layout_reaches_the_slave() {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();

    // The slave decoded the mapping the master negotiated: widest objects
    // first, so the 32-bit actual position precedes the 16-bit status word
    assert_eq!(handle.input_offset_of(1, 0x6064), Some(0));
    assert!(handle.input_offset_of(1, 0x6041).is_some());
    assert!(handle.input_offset_of(1, 0x2055).is_some());

    // Startup settings were written: mode of operation is position (8)
    assert_eq!(handle.object(1, 0x6060, 0), Some(vec![8]));
}

#[test]
fn short_working_counter_does_not_stop_the_loop() {
    let link = SimLink::new(1);
    let handle = link.handle();
    let mut robot = sim_robot(vec![position_joint("left_knee", 1)], link, 1);
    robot.start_communication(false).unwrap();

    // Degraded link quality: the loop warns but keeps running
    handle.set_short_wkc(true);
    robot.wait_for_update();
    robot.wait_for_update();
    assert!(robot.is_operational());

    handle.set_short_wkc(false);
    robot.wait_for_update();
    assert!(robot.is_operational());
}
