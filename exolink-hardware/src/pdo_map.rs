//! Dynamic PDO mapping negotiation
//!
//! Before the fieldbus goes operational, each motor controller chooses the
//! logical objects it wants exchanged in the cyclic frame. The mapper packs
//! those objects into the slave's fixed-capacity assign registers, writes
//! the resulting layout over the mailbox, and returns the byte offset every
//! object ends up at. Those offsets are then consumed on every cyclic
//! iteration; mapping is never re-negotiated at runtime.

use std::collections::HashMap;

use log::warn;
use snafu::Snafu;

use exolink_common::objects::{find_descriptor, ObjectDictionary};
use exolink_common::traits::{SdoError, SdoIo};
use exolink_common::{DataDirection, ObjectDescriptor, ObjectName, SlaveIndex};

/// Number of assign registers available per direction on the drives
const DEFAULT_REGISTER_COUNT: u16 = 4;
/// Capacity of one assign register in bits
const DEFAULT_BITS_PER_REGISTER: u16 = 64;

/// Error returned by PDO mapping operations
#[derive(Debug, Snafu)]
pub enum PdoMappingError {
    /// Adding an object would exceed the total register capacity
    ///
    /// A configuration error: the object set must be reduced, the mapper
    /// never silently truncates it.
    #[snafu(display(
        "Too many objects in PDO map (total bits {total_bits}, only {capacity} allowed); {name:?} could not be added"
    ))]
    RegisterOverflow {
        /// Bits the working set would occupy with the new object
        total_bits: u16,
        /// Total capacity of the register family
        capacity: u16,
        /// The object that did not fit
        name: ObjectName,
    },
    /// A mailbox write failed during negotiation
    #[snafu(display("PDO negotiation write to slave {slave} failed"))]
    NegotiationFailed {
        /// Slave being configured
        slave: SlaveIndex,
        /// The underlying mailbox failure
        source: SdoError,
    },
}

/// A working set of objects to map in one direction on one slave
pub struct PdoMap {
    dictionary: ObjectDictionary,
    objects: Vec<(ObjectName, ObjectDescriptor)>,
    register_count: u16,
    bits_per_register: u16,
}

impl PdoMap {
    /// Create an empty map using the drive family's register geometry
    pub fn new(dictionary: ObjectDictionary) -> Self {
        Self::with_geometry(dictionary, DEFAULT_REGISTER_COUNT, DEFAULT_BITS_PER_REGISTER)
    }

    /// Create an empty map with an explicit register geometry
    pub fn with_geometry(
        dictionary: ObjectDictionary,
        register_count: u16,
        bits_per_register: u16,
    ) -> Self {
        Self {
            dictionary,
            objects: Vec::new(),
            register_count,
            bits_per_register,
        }
    }

    /// Register a logical object for mapping
    ///
    /// Objects unknown to this controller family and duplicates are logged
    /// and ignored. Exceeding the total register capacity is a fatal
    /// configuration error.
    pub fn add_object(&mut self, name: ObjectName) -> Result<(), PdoMappingError> {
        let Some(descriptor) = find_descriptor(self.dictionary, name) else {
            warn!("{name:?} does not exist in this controller family, not added to PDO map");
            return Ok(());
        };

        if self.objects.iter().any(|(n, _)| *n == name) {
            warn!("{name:?} is already added to the PDO map");
            return Ok(());
        }

        let total_bits: u16 = self
            .objects
            .iter()
            .map(|(_, d)| d.bits as u16)
            .sum::<u16>()
            + descriptor.bits as u16;
        let capacity = self.register_count * self.bits_per_register;
        if total_bits > capacity {
            return RegisterOverflowSnafu {
                total_bits,
                capacity,
                name,
            }
            .fail();
        }

        self.objects.push((name, descriptor));
        Ok(())
    }

    /// Negotiate the mapping with the slave and return the byte offset of
    /// every registered object in the cyclic frame
    ///
    /// Pre-operational only; register and sync-manager writes are illegal
    /// once the fieldbus is operational.
    pub fn map(
        &self,
        sdo: &mut dyn SdoIo,
        slave: SlaveIndex,
        direction: DataDirection,
    ) -> Result<HashMap<ObjectName, usize>, PdoMappingError> {
        self.configure(sdo, slave, direction.base_register(), direction.sync_manager())
            .map_err(|source| PdoMappingError::NegotiationFailed { slave, source })
    }

    fn configure(
        &self,
        sdo: &mut dyn SdoIo,
        slave: SlaveIndex,
        base_register: u16,
        sync_manager: u16,
    ) -> Result<HashMap<ObjectName, usize>, SdoError> {
        let mut byte_offsets = HashMap::new();

        // Deactivate the sync manager while its registers are rewritten
        sdo.write_u8(slave, sync_manager, 0, 0)?;

        if self.objects.is_empty() {
            return Ok(byte_offsets);
        }

        let bytes_per_register = (self.bits_per_register / 8) as usize;
        let mut register = base_register;
        let mut registers_done: u16 = 0;
        let mut entry: u8 = 1;
        let mut size_left = self.bits_per_register as i32;

        sdo.write_u8(slave, register, 0, 0)?;
        for (name, descriptor) in self.sorted_objects() {
            if size_left < descriptor.bits as i32 {
                // Register is full: write its entry count and assign it to
                // the sync manager, then open the next one
                sdo.write_u8(slave, register, 0, entry - 1)?;
                sdo.write_u16(slave, sync_manager, (registers_done + 1) as u8, register)?;

                register += 1;
                registers_done += 1;
                size_left = self.bits_per_register as i32;
                entry = 1;
                sdo.write_u8(slave, register, 0, 0)?;
            }

            let used_bits = self.bits_per_register as i32 - size_left;
            let offset = registers_done as usize * bytes_per_register + used_bits as usize / 8;
            byte_offsets.insert(name, offset);

            sdo.write_u32(slave, register, entry, descriptor.combined())?;
            size_left -= descriptor.bits as i32;
            entry += 1;
        }

        // Finalize the last register
        sdo.write_u8(slave, register, 0, entry - 1)?;
        sdo.write_u16(slave, sync_manager, (registers_done + 1) as u8, register)?;

        // Clear unused registers so no residual object references linger
        for unused in (register + 1)..(base_register + self.register_count) {
            sdo.write_u8(slave, unused, 0, 0)?;
        }

        // Re-enable the sync manager with the final register count
        sdo.write_u8(slave, sync_manager, 0, (registers_done + 1) as u8)?;

        Ok(byte_offsets)
    }

    /// Objects ordered for packing: descending bit width to minimize
    /// padding, insertion order within equal widths
    fn sorted_objects(&self) -> Vec<(ObjectName, ObjectDescriptor)> {
        let mut sorted = self.objects.clone();
        sorted.sort_by(|(_, a), (_, b)| b.bits.cmp(&a.bits));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_DICTIONARY: &[(ObjectName, ObjectDescriptor)] = &[
        (ObjectName::StatusWord, ObjectDescriptor::new(0x6041, 16)),
        (
            ObjectName::ActualPosition,
            ObjectDescriptor::new(0x6064, 32),
        ),
        (ObjectName::ActualTorque, ObjectDescriptor::new(0x6077, 16)),
        (
            ObjectName::DcLinkVoltage,
            ObjectDescriptor::new(0x2055, 16),
        ),
    ];

    /// An SdoIo that records every download
    #[derive(Default)]
    struct RecordingSdo {
        writes: Vec<(u16, u8, Vec<u8>)>,
    }

    impl SdoIo for RecordingSdo {
        fn download(
            &mut self,
            _slave: SlaveIndex,
            index: u16,
            sub: u8,
            data: &[u8],
        ) -> Result<(), SdoError> {
            self.writes.push((index, sub, data.to_vec()));
            Ok(())
        }

        fn upload(
            &mut self,
            _slave: SlaveIndex,
            _index: u16,
            _sub: u8,
        ) -> Result<Vec<u8>, SdoError> {
            Ok(Vec::new())
        }
    }

    fn slave() -> SlaveIndex {
        SlaveIndex::new(1).unwrap()
    }

    #[test]
    fn wider_objects_packed_first() {
        let mut map = PdoMap::with_geometry(TEST_DICTIONARY, 4, 32);
        map.add_object(ObjectName::StatusWord).unwrap();
        map.add_object(ObjectName::ActualPosition).unwrap();

        let mut sdo = RecordingSdo::default();
        let offsets = map.map(&mut sdo, slave(), DataDirection::Miso).unwrap();

        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[&ObjectName::ActualPosition], 0);
        assert_eq!(offsets[&ObjectName::StatusWord], 4);
    }

    #[test]
    fn duplicate_objects_collapse_to_one_entry() {
        let mut map = PdoMap::new(TEST_DICTIONARY);
        map.add_object(ObjectName::ActualPosition).unwrap();
        map.add_object(ObjectName::StatusWord).unwrap();
        map.add_object(ObjectName::StatusWord).unwrap();

        let mut sdo = RecordingSdo::default();
        let offsets = map.map(&mut sdo, slave(), DataDirection::Miso).unwrap();
        assert_eq!(offsets.len(), 2);
    }

    #[test]
    fn unknown_object_is_ignored() {
        let mut map = PdoMap::new(TEST_DICTIONARY);
        map.add_object(ObjectName::ControlWord).unwrap();

        let mut sdo = RecordingSdo::default();
        let offsets = map.map(&mut sdo, slave(), DataDirection::Miso).unwrap();
        assert!(offsets.is_empty());
    }

    #[test]
    fn overflow_rejected_at_the_point_of_overflow() {
        // Room for exactly two 16-bit objects
        let mut map = PdoMap::with_geometry(TEST_DICTIONARY, 1, 32);
        map.add_object(ObjectName::StatusWord).unwrap();
        map.add_object(ObjectName::ActualTorque).unwrap();
        let result = map.add_object(ObjectName::DcLinkVoltage);
        assert!(matches!(
            result,
            Err(PdoMappingError::RegisterOverflow { total_bits: 48, .. })
        ));
    }

    #[test]
    fn offsets_never_overlap() {
        let mut map = PdoMap::new(TEST_DICTIONARY);
        for name in [
            ObjectName::StatusWord,
            ObjectName::ActualPosition,
            ObjectName::ActualTorque,
            ObjectName::DcLinkVoltage,
        ] {
            map.add_object(name).unwrap();
        }

        let mut sdo = RecordingSdo::default();
        let offsets = map.map(&mut sdo, slave(), DataDirection::Miso).unwrap();
        // 32-bit object first, then the three 16-bit ones
        assert_eq!(offsets[&ObjectName::ActualPosition], 0);
        let mut rest: Vec<usize> = [
            ObjectName::StatusWord,
            ObjectName::ActualTorque,
            ObjectName::DcLinkVoltage,
        ]
        .iter()
        .map(|n| offsets[n])
        .collect();
        rest.sort();
        assert_eq!(rest, vec![4, 6, 8]);
    }

    #[test]
    fn empty_map_disables_sync_manager() {
        let map = PdoMap::new(TEST_DICTIONARY);
        let mut sdo = RecordingSdo::default();
        let offsets = map.map(&mut sdo, slave(), DataDirection::Mosi).unwrap();
        assert!(offsets.is_empty());
        // The only write is the sync manager deactivation
        assert_eq!(sdo.writes, vec![(0x1C12, 0, vec![0])]);
    }

    #[test]
    fn negotiation_writes_mapping_entries() {
        let mut map = PdoMap::with_geometry(TEST_DICTIONARY, 4, 32);
        map.add_object(ObjectName::StatusWord).unwrap();
        map.add_object(ObjectName::ActualPosition).unwrap();

        let mut sdo = RecordingSdo::default();
        map.map(&mut sdo, slave(), DataDirection::Miso).unwrap();

        // ActualPosition fills the first register, StatusWord opens the second
        assert!(sdo
            .writes
            .contains(&(0x1A00, 1, 0x6064_0020u32.to_le_bytes().to_vec())));
        assert!(sdo
            .writes
            .contains(&(0x1A01, 1, 0x6041_0010u32.to_le_bytes().to_vec())));
        // Both registers are assigned to the sync manager, which is enabled
        // last with the final register count
        assert!(sdo.writes.contains(&(0x1C13, 1, 0x1A00u16.to_le_bytes().to_vec())));
        assert!(sdo.writes.contains(&(0x1C13, 2, 0x1A01u16.to_le_bytes().to_vec())));
        assert_eq!(sdo.writes.last().unwrap(), &(0x1C13, 0, vec![2]));
        // Unused registers are explicitly cleared
        assert!(sdo.writes.contains(&(0x1A02, 0, vec![0])));
        assert!(sdo.writes.contains(&(0x1A03, 0, vec![0])));
    }
}
