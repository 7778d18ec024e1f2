//! Temperature sensing slave attached to a joint

use std::sync::Arc;

use exolink_common::traits::PdoIo;
use exolink_common::SlaveIndex;

/// A general EtherCAT slave (GES) publishing one joint temperature
///
/// The sensor publishes a little-endian f32 at a fixed byte offset in its
/// input image; it needs no mailbox configuration of its own.
pub struct TemperatureGes {
    slave: SlaveIndex,
    byte_offset: usize,
    pdo: Option<Arc<dyn PdoIo>>,
}

impl TemperatureGes {
    /// Create a sensor reading at `byte_offset` in the slave's input image
    pub fn new(slave: SlaveIndex, byte_offset: usize) -> Self {
        Self {
            slave,
            byte_offset,
            pdo: None,
        }
    }

    /// Bind the process image; called during joint initialization
    pub(crate) fn initialize(&mut self, pdo: Arc<dyn PdoIo>) {
        self.pdo = Some(pdo);
    }

    /// The latest temperature reading in degrees Celsius
    pub fn temperature(&self) -> f32 {
        match &self.pdo {
            Some(pdo) => pdo.read_f32(self.slave, self.byte_offset),
            None => 0.0,
        }
    }

    /// The fieldbus index of the sensor
    pub fn slave_index(&self) -> SlaveIndex {
        self.slave
    }
}
