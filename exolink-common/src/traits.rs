//! Common traits
//!
//! These traits form the seam between the hardware logic and the physical
//! EtherCAT link: the master engine, motor controllers and encoders are
//! written against them, and a backend (or a simulated link in tests)
//! provides the implementations.

use core::time::Duration;

use paste::paste;
use snafu::Snafu;

use crate::al_state::AlState;
use crate::slave::SlaveIndex;

/// Error returned by SDO mailbox transfers
#[derive(Clone, Copy, Debug, PartialEq, Snafu)]
pub enum SdoError {
    /// The slave did not answer the mailbox request in time
    #[snafu(display("No mailbox response from slave {slave} for 0x{index:04X}sub{sub}"))]
    NoResponse {
        /// Slave the request was addressed to
        slave: SlaveIndex,
        /// Dictionary index of the request
        index: u16,
        /// Sub index of the request
        sub: u8,
    },
    /// The slave aborted the transfer
    #[snafu(display("Slave {slave} aborted 0x{index:04X}sub{sub}: code 0x{code:08X}"))]
    Abort {
        /// Slave which aborted
        slave: SlaveIndex,
        /// Dictionary index of the aborted access
        index: u16,
        /// Sub index of the aborted access
        sub: u8,
        /// Raw abort code reported by the slave
        code: u32,
    },
    /// An upload returned a payload of a different size than the requested type
    #[snafu(display("Expected {expected} byte response, got {actual}"))]
    UnexpectedSize {
        /// Size implied by the requested type
        expected: usize,
        /// Size actually received
        actual: usize,
    },
}

/// Convenience macro generating the typed read/write methods of [`SdoIo`]
/// from the raw byte transfers
macro_rules! sdo_access_methods {
    ($type: ty) => {
        paste! {
            #[doc = concat!("Write a ", stringify!($type), " value to a dictionary object on the slave")]
            fn [<write_ $type>](
                &mut self,
                slave: SlaveIndex,
                index: u16,
                sub: u8,
                value: $type,
            ) -> Result<(), SdoError> {
                self.download(slave, index, sub, &value.to_le_bytes())
            }

            #[doc = concat!("Read a ", stringify!($type), " value from a dictionary object on the slave")]
            fn [<read_ $type>](
                &mut self,
                slave: SlaveIndex,
                index: u16,
                sub: u8,
            ) -> Result<$type, SdoError> {
                let data = self.upload(slave, index, sub)?;
                let data: [u8; core::mem::size_of::<$type>()] =
                    data.as_slice().try_into().map_err(|_| SdoError::UnexpectedSize {
                        expected: core::mem::size_of::<$type>(),
                        actual: data.len(),
                    })?;
                Ok($type::from_le_bytes(data))
            }
        }
    };
}

/// Acyclic mailbox access to the dictionary of one slave
///
/// Used only while the fieldbus is pre-operational (PDO negotiation, startup
/// settings) and during fault recovery; never on the cyclic path. All values
/// are little-endian on the wire, addressed as (index, sub-index, width)
/// triples.
pub trait SdoIo {
    /// Write raw bytes to a dictionary object on the slave
    fn download(
        &mut self,
        slave: SlaveIndex,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), SdoError>;

    /// Read raw bytes from a dictionary object on the slave
    fn upload(&mut self, slave: SlaveIndex, index: u16, sub: u8) -> Result<Vec<u8>, SdoError>;

    sdo_access_methods!(u8);
    sdo_access_methods!(u16);
    sdo_access_methods!(u32);
    sdo_access_methods!(i8);
    sdo_access_methods!(i16);
    sdo_access_methods!(i32);
}

/// Cyclic process-image access for the hardware layer
///
/// Reads access a slave's input (MISO) image, writes access its output
/// (MOSI) image. Offsets are the byte offsets negotiated by the PDO mapper
/// at initialization; implementations are shared with the cyclic thread and
/// must synchronize internally, which is why handles are cheap clones of a
/// shared image (and why reads take `&self`).
pub trait PdoIo: Send + Sync {
    /// Copy bytes out of the slave's input image
    fn read_input(&self, slave: SlaveIndex, offset: usize, buf: &mut [u8]);

    /// Copy bytes into the slave's output image
    fn write_output(&self, slave: SlaveIndex, offset: usize, data: &[u8]);

    /// Read a little-endian u16 from the input image
    fn read_u16(&self, slave: SlaveIndex, offset: usize) -> u16 {
        let mut buf = [0u8; 2];
        self.read_input(slave, offset, &mut buf);
        u16::from_le_bytes(buf)
    }

    /// Read a little-endian i16 from the input image
    fn read_i16(&self, slave: SlaveIndex, offset: usize) -> i16 {
        let mut buf = [0u8; 2];
        self.read_input(slave, offset, &mut buf);
        i16::from_le_bytes(buf)
    }

    /// Read a little-endian u32 from the input image
    fn read_u32(&self, slave: SlaveIndex, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.read_input(slave, offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Read a little-endian i32 from the input image
    fn read_i32(&self, slave: SlaveIndex, offset: usize) -> i32 {
        let mut buf = [0u8; 4];
        self.read_input(slave, offset, &mut buf);
        i32::from_le_bytes(buf)
    }

    /// Read a little-endian f32 from the input image
    fn read_f32(&self, slave: SlaveIndex, offset: usize) -> f32 {
        let mut buf = [0u8; 4];
        self.read_input(slave, offset, &mut buf);
        f32::from_le_bytes(buf)
    }

    /// Write a little-endian u16 to the output image
    fn write_u16(&self, slave: SlaveIndex, offset: usize, value: u16) {
        self.write_output(slave, offset, &value.to_le_bytes());
    }

    /// Write a little-endian i16 to the output image
    fn write_i16(&self, slave: SlaveIndex, offset: usize, value: i16) {
        self.write_output(slave, offset, &value.to_le_bytes());
    }

    /// Write a little-endian i32 to the output image
    fn write_i32(&self, slave: SlaveIndex, offset: usize, value: i32) {
        self.write_output(slave, offset, &value.to_le_bytes());
    }
}

/// Error returned by [`EthercatLink`] operations
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum LinkError {
    /// The raw socket could not be bound to the interface
    #[snafu(display("No socket connection on {ifname}. Confirm the right interface is selected"))]
    NoSocket {
        /// Interface name the bind was attempted on
        ifname: String,
    },
    /// Auto-discovery found no slaves at all
    #[snafu(display("No slaves found. Check that the first slave is connected properly"))]
    NoSlavesFound,
    /// The process-data image could not be built
    #[snafu(display("Failed to build the process-data image: {message}"))]
    ImageConfig {
        /// Backend description of the failure
        message: String,
    },
}

/// The physical EtherCAT link owned by the master
///
/// One implementation drives a real NIC; the simulated link used in tests
/// implements the same trait. The link owns the slave table and the raw
/// process image; the hardware layer reaches the image through the
/// [`PdoIo`] handle the link hands out.
pub trait EthercatLink: Send + 'static {
    /// The process-image handle type handed to joints and controllers
    type Pdo: PdoIo + Clone + 'static;
    /// The mailbox access type
    type Sdo: SdoIo + Send;

    /// Bind the raw link to a network interface
    fn open(&mut self, ifname: &str) -> Result<(), LinkError>;

    /// Auto-discover slaves and return how many were found
    fn config_init(&mut self) -> Result<usize, LinkError>;

    /// Build the cyclic frame layout from the slaves' (now fixed) PDO
    /// mappings and return the image size in bytes
    fn config_map(&mut self) -> Result<usize, LinkError>;

    /// Configure distributed clocks
    fn config_dc(&mut self);

    /// Request an application-layer state, slave 0 addressing all slaves
    fn request_state(&mut self, slave: u16, state: AlState);

    /// Wait up to `timeout` for a slave to reach a state, returning the
    /// state it actually ended up in
    fn wait_for_state(&mut self, slave: u16, state: AlState, timeout: Duration) -> AlState;

    /// Read the current state of a slave without waiting
    fn read_state(&mut self, slave: u16) -> AlState;

    /// The AL status code last reported by a slave, for diagnostics
    fn al_status_code(&mut self, slave: u16) -> u16;

    /// Number of slaves discovered by [`EthercatLink::config_init`]
    fn slave_count(&self) -> usize;

    /// Queue one process-data frame for transmission
    fn send_process_data(&mut self);

    /// Receive the returning process-data frame, with a bounded wait, and
    /// return the frame's working counter
    fn receive_process_data(&mut self, timeout: Duration) -> u16;

    /// The working counter expected when every slave processed the frame
    fn expected_wkc(&self) -> u16;

    /// Get a cloneable handle on the process image
    fn pdo_io(&self) -> Self::Pdo;

    /// Get the mailbox accessor
    fn sdo_io(&mut self) -> &mut Self::Sdo;

    /// Close the raw link
    fn close(&mut self);
}
