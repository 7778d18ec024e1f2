//! Setup-file verification flow of the Ingenia family

use integration_tests::prelude::*;
use integration_tests::utils::{incremental_encoder, test_encoder};
use exolink_hardware::{Ingenia, Joint};

/// Start address 0x1000 followed by three data words; checksum 0x0001 +
/// 0x0002 + 0x0003 = 6
const SETUP_FILE: &str = "1000\n0001\n0002\n0003\n\n";

fn ingenia_joint(slave: u16) -> Joint {
    let controller = Ingenia::with_setup_file(
        SlaveIndex::new(slave).unwrap(),
        test_encoder(),
        incremental_encoder(),
        ActuationMode::Position,
        SETUP_FILE.to_string(),
    );
    Joint::with_devices("left_hip", 1, true, Some(Box::new(controller)), None)
}

#[test]
fn matching_checksum_starts_without_a_restart() {
    let link = SimLink::new(1);
    let handle = link.handle();
    // The drive already carries the setup: its checksum matches the file
    handle.set_object(1, 0x206A, 0, 6u16.to_le_bytes().to_vec());

    let mut robot = sim_robot(vec![ingenia_joint(1)], link, 1);
    robot.start_communication(false).unwrap();
    assert!(robot.is_operational());
}

#[test]
fn mismatched_checksum_downloads_and_requires_a_restart() {
    let link = SimLink::new(1);
    let handle = link.handle();
    // Drive checksum reads as zero: the setup differs from the file

    let mut robot = sim_robot(vec![ingenia_joint(1)], link, 1);
    let result = robot.start_communication(false);
    assert!(matches!(result, Err(HardwareError::RestartRequired)));
    assert!(!robot.is_operational());

    // The download went through: the drive now checksums to the file value
    assert_eq!(handle.object(1, 0x206A, 0), Some(6u16.to_le_bytes().to_vec()));

    // After the "power cycle", the same robot starts cleanly
    robot.start_communication(false).unwrap();
    assert!(robot.is_operational());
}
