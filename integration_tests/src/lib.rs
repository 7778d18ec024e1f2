pub mod sim_link;
pub mod utils;

pub mod prelude {
    pub use super::sim_link::{SimHandle, SimLink};
    pub use super::utils::{position_joint, sim_robot, test_encoder, torque_joint};
    pub use exolink_common::{ActuationMode, AlState, DriveState, SlaveIndex};
    pub use exolink_hardware::{HardwareError, Joint, Robot};
}
