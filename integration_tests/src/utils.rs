#![allow(dead_code)]
use exolink_common::{ActuationMode, SlaveIndex};
use exolink_hardware::{Encoder, EthercatMaster, IMotionCube, Joint, Robot};

use crate::sim_link::SimLink;

/// The absolute encoder geometry used across the integration tests:
/// 17 bits, hard limits 2000..60000 IU, zero at 4000 IU, 0.03 rad margin
pub fn test_encoder() -> Encoder {
    Encoder::new(17, 2000, 60_000, 4000, 0.03).unwrap()
}

pub fn incremental_encoder() -> Encoder {
    Encoder::incremental(12).unwrap()
}

/// A position-mode joint on the given slave, allowed to actuate
pub fn position_joint(name: &str, slave: u16) -> Joint {
    let controller = IMotionCube::new(
        SlaveIndex::new(slave).unwrap(),
        test_encoder(),
        incremental_encoder(),
        ActuationMode::Position,
    );
    Joint::with_devices(name, 1, true, Some(Box::new(controller)), None)
}

/// A torque-mode joint on the given slave, allowed to actuate
pub fn torque_joint(name: &str, slave: u16) -> Joint {
    let controller = IMotionCube::new(
        SlaveIndex::new(slave).unwrap(),
        test_encoder(),
        incremental_encoder(),
        ActuationMode::Torque,
    );
    Joint::with_devices(name, 1, true, Some(Box::new(controller)), None)
}

/// A robot over a simulated link with a 4 ms cycle
pub fn sim_robot(joints: Vec<Joint>, link: SimLink, expected_slaves: usize) -> Robot<SimLink> {
    let master = EthercatMaster::new(link, "sim0", expected_slaves, 4);
    Robot::new(joints, master)
}
