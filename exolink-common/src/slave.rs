//! Types for addressing slaves on the fieldbus

/// A newtype on u16 identifying one device on the fieldbus
///
/// Index 0 addresses the master (or, in broadcast operations, all slaves),
/// so a real slave always has an index of 1 or greater. Assigned once at
/// construction and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlaveIndex(u16);

impl SlaveIndex {
    /// Try to create a new SlaveIndex
    ///
    /// Fails if the value is 0, which is reserved for the master.
    pub const fn new(value: u16) -> Result<Self, InvalidSlaveIndexError> {
        if value >= 1 {
            Ok(SlaveIndex(value))
        } else {
            Err(InvalidSlaveIndexError)
        }
    }

    /// Get the raw index as a u16
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for SlaveIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SlaveIndex> for u16 {
    fn from(value: SlaveIndex) -> Self {
        value.raw()
    }
}

/// Error for converting a u16 to a [`SlaveIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSlaveIndexError;

impl core::fmt::Display for InvalidSlaveIndexError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Slave index 0 is reserved for the master")
    }
}
impl core::error::Error for InvalidSlaveIndexError {}

impl TryFrom<u16> for SlaveIndex {
    type Error = InvalidSlaveIndexError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(SlaveIndex::new(0).is_err());
        assert_eq!(SlaveIndex::new(1).unwrap().raw(), 1);
        assert_eq!(SlaveIndex::new(17).unwrap().raw(), 17);
    }
}
