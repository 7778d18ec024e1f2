//! The robot: the single entry point external callers use

use log::{info, warn};

use exolink_common::traits::EthercatLink;

use crate::error::{HardwareError, Result};
use crate::joint::Joint;
use crate::master::{CycleSignal, EthercatMaster};

use std::sync::Arc;
use std::time::Duration;

/// A fixed collection of joints plus the EtherCAT master
///
/// The joint collection is fixed after construction; joints are addressed
/// by name or index. All communication lifecycle control goes through
/// [`Robot::start_communication`] and [`Robot::stop_communication`].
pub struct Robot<L: EthercatLink> {
    joints: Vec<Joint>,
    master: EthercatMaster<L>,
}

impl<L: EthercatLink> Robot<L> {
    /// Create a robot from its joints and master
    pub fn new(joints: Vec<Joint>, master: EthercatMaster<L>) -> Self {
        Self { joints, master }
    }

    /// Bring up the fieldbus and initialize every joint
    ///
    /// With `reset_controllers`, all motor controllers are reset over the
    /// mailbox once communication is up, clearing any latched drive state
    /// from a previous run. Fails with [`HardwareError::RestartRequired`]
    /// when a controller's setup was re-downloaded; the caller must power
    /// cycle the drives and start again.
    pub fn start_communication(&mut self, reset_controllers: bool) -> Result<()> {
        if self.master.is_operational() {
            warn!("Trying to start EtherCAT while it is already active");
            return Ok(());
        }

        let restart_required = self.master.start(&mut self.joints)?;
        if restart_required {
            self.master.stop();
            return Err(HardwareError::RestartRequired);
        }

        if reset_controllers {
            info!("Resetting all motor controllers");
            self.reset_motor_controllers()?;
        }
        Ok(())
    }

    /// Stop the cyclic exchange and close the link; idempotent
    pub fn stop_communication(&mut self) {
        self.master.stop();
    }

    /// Whether the cyclic exchange is running
    pub fn is_operational(&self) -> bool {
        self.master.is_operational()
    }

    /// Block until the next cyclic frame exchange completes
    pub fn wait_for_update(&self) {
        self.master.cycle_signal().wait_for_cycle();
    }

    /// The cycle-boundary signal, for callers that want to hold their own
    /// handle
    pub fn cycle_signal(&self) -> Arc<CycleSignal> {
        self.master.cycle_signal()
    }

    /// The configured cycle period
    pub fn cycle_time(&self) -> Duration {
        self.master.cycle_time()
    }

    /// Reset every motor controller over the mailbox
    pub fn reset_motor_controllers(&mut self) -> Result<()> {
        let master = &self.master;
        let joints = &mut self.joints;
        master.with_sdo(|sdo| {
            for joint in joints.iter_mut() {
                if joint.has_motor_controller() {
                    joint.reset_motor_controller(sdo)?;
                }
            }
            Ok(())
        })
    }

    /// Check that no two sub-devices share a slave index
    pub fn has_valid_slaves(&self) -> bool {
        let mut indices: Vec<u16> = self
            .joints
            .iter()
            .flat_map(|j| {
                j.motor_controller_slave_index()
                    .into_iter()
                    .chain(j.temperature_ges_slave_index())
            })
            .map(|s| s.raw())
            .collect();
        indices.sort_unstable();
        let len = indices.len();
        indices.dedup();
        indices.len() == len
    }

    /// Look up a joint by name
    pub fn joint(&mut self, name: &str) -> Option<&mut Joint> {
        self.joints.iter_mut().find(|j| j.name() == name)
    }

    /// Look up a joint by position in the collection
    pub fn joint_at(&mut self, index: usize) -> Option<&mut Joint> {
        self.joints.get_mut(index)
    }

    /// Number of joints
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Iterate over the joints
    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter()
    }

    /// Iterate mutably over the joints
    pub fn joints_mut(&mut self) -> impl Iterator<Item = &mut Joint> {
        self.joints.iter_mut()
    }
}

impl<L: EthercatLink> Drop for Robot<L> {
    fn drop(&mut self) {
        self.stop_communication();
    }
}
