//! Logical register names and their dictionary descriptors

/// A logical register on a motor controller, independent of its physical
/// byte layout in the cyclic frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ObjectName {
    StatusWord,
    ActualPosition,
    ActualVelocity,
    ActualTorque,
    MotionErrorRegister,
    DetailedErrorRegister,
    SecondDetailedErrorRegister,
    DcLinkVoltage,
    DriveTemperature,
    MotorPosition,
    MotorVelocity,
    MotorVoltage,
    CurrentLimit,
    ControlWord,
    TargetPosition,
    TargetTorque,
    QuickStopDeceleration,
    QuickStopOption,
}

/// The (dictionary address, bit width) pair describing where an
/// [`ObjectName`] lives on the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// CoE dictionary address
    pub address: u16,
    /// Width of the object in bits (8, 16 or 32)
    pub bits: u8,
}

impl ObjectDescriptor {
    /// Create a descriptor
    pub const fn new(address: u16, bits: u8) -> Self {
        Self { address, bits }
    }

    /// The combined u32 written into a PDO mapping entry: address in the
    /// upper half, bit width in the lower byte
    pub fn combined(&self) -> u32 {
        ((self.address as u32) << 16) | (self.bits as u32)
    }
}

/// The static object table of one controller family
///
/// Process-wide constant data; each motor-controller variant carries its
/// own table so the families can differ without conditional logic in
/// shared code.
pub type ObjectDictionary = &'static [(ObjectName, ObjectDescriptor)];

/// Look up the descriptor for an object in a family dictionary
pub fn find_descriptor(dictionary: ObjectDictionary, name: ObjectName) -> Option<ObjectDescriptor> {
    dictionary
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
}

/// The direction of a process-data mapping on one slave
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataDirection {
    /// Master in, slave out: device telemetry read every cycle
    Miso,
    /// Master out, slave in: commands written every cycle
    Mosi,
}

impl DataDirection {
    /// Base address of the first PDO assign register for this direction
    pub fn base_register(&self) -> u16 {
        match self {
            DataDirection::Miso => 0x1A00,
            DataDirection::Mosi => 0x1600,
        }
    }

    /// Address of the sync manager owning this direction's registers
    pub fn sync_manager(&self) -> u16 {
        match self {
            DataDirection::Miso => 0x1C13,
            DataDirection::Mosi => 0x1C12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_mapping_value() {
        let desc = ObjectDescriptor::new(0x6041, 16);
        assert_eq!(desc.combined(), 0x6041_0010);
        let desc = ObjectDescriptor::new(0x6064, 32);
        assert_eq!(desc.combined(), 0x6064_0020);
    }

    #[test]
    fn dictionary_lookup() {
        static DICT: &[(ObjectName, ObjectDescriptor)] = &[
            (ObjectName::StatusWord, ObjectDescriptor::new(0x6041, 16)),
            (
                ObjectName::ActualPosition,
                ObjectDescriptor::new(0x6064, 32),
            ),
        ];
        assert_eq!(
            find_descriptor(DICT, ObjectName::StatusWord),
            Some(ObjectDescriptor::new(0x6041, 16))
        );
        assert_eq!(find_descriptor(DICT, ObjectName::ControlWord), None);
    }
}
