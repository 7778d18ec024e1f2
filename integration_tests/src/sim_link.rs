//! A simulated EtherCAT link with CiA-402 drive slaves
//!
//! The simulation is deliberately protocol-faithful where the hardware
//! layer depends on it: drives decode the PDO mapping written to their
//! assign registers, so the layout the master negotiates is the layout the
//! simulated cyclic images actually use, and the drive state machine
//! responds to control words the way a real drive answers with its status
//! word.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use exolink_common::traits::{EthercatLink, LinkError, PdoIo, SdoError, SdoIo};
use exolink_common::{AlState, SlaveIndex};

const IMAGE_SIZE: usize = 64;

#[derive(Clone, Copy)]
struct MappedObject {
    address: u16,
    offset: usize,
    bits: u8,
}

/// One simulated slave: a dictionary, cyclic images, and a drive state
struct SimDrive {
    objects: HashMap<(u16, u8), Vec<u8>>,
    inputs: [u8; IMAGE_SIZE],
    outputs: [u8; IMAGE_SIZE],
    input_layout: Vec<MappedObject>,
    output_layout: Vec<MappedObject>,
    status_word: u16,
    position_iu: i32,
    fault_on_enable: bool,
    al_status_code: u16,
    download_sum: u16,
}

impl SimDrive {
    fn new() -> Self {
        Self {
            objects: HashMap::new(),
            inputs: [0; IMAGE_SIZE],
            outputs: [0; IMAGE_SIZE],
            input_layout: Vec::new(),
            output_layout: Vec::new(),
            status_word: 0x0040, // Switch On Disabled after power up
            position_iu: 0,
            fault_on_enable: false,
            al_status_code: 0,
            download_sum: 0,
        }
    }

    fn object_u8(&self, index: u16, sub: u8) -> u8 {
        self.objects
            .get(&(index, sub))
            .and_then(|data| data.first().copied())
            .unwrap_or(0)
    }

    fn object_u16(&self, index: u16, sub: u8) -> u16 {
        self.objects
            .get(&(index, sub))
            .and_then(|data| data.get(0..2))
            .map(|data| u16::from_le_bytes(data.try_into().unwrap()))
            .unwrap_or(0)
    }

    fn object_u32(&self, index: u16, sub: u8) -> u32 {
        self.objects
            .get(&(index, sub))
            .and_then(|data| data.get(0..4))
            .map(|data| u32::from_le_bytes(data.try_into().unwrap()))
            .unwrap_or(0)
    }

    /// Decode the PDO layout from the sync manager and assign registers,
    /// exactly as they were written during negotiation
    fn compute_layout(&self, sync_manager: u16) -> Vec<MappedObject> {
        let mut layout = Vec::new();
        let mut offset = 0;
        let register_count = self.object_u8(sync_manager, 0);
        for slot in 1..=register_count {
            let register = self.object_u16(sync_manager, slot);
            if register == 0 {
                continue;
            }
            let entries = self.object_u8(register, 0);
            for entry in 1..=entries {
                let combined = self.object_u32(register, entry);
                let address = (combined >> 16) as u16;
                let bits = (combined & 0xFF) as u8;
                layout.push(MappedObject {
                    address,
                    offset,
                    bits,
                });
                offset += bits as usize / 8;
            }
        }
        layout
    }

    fn configure_images(&mut self) {
        self.input_layout = self.compute_layout(0x1C13);
        self.output_layout = self.compute_layout(0x1C12);
        self.refresh_inputs();
    }

    /// React to the latest output image: decode the control word, run the
    /// drive state machine, and publish fresh inputs
    fn process(&mut self) {
        let Some(control) = self
            .output_layout
            .iter()
            .find(|m| m.address == 0x6040)
            .copied()
        else {
            return;
        };
        let control_word = u16::from_le_bytes(
            self.outputs[control.offset..control.offset + 2]
                .try_into()
                .unwrap(),
        );

        self.status_word = if control_word & 0x80 != 0 {
            0x0040
        } else {
            match control_word {
                0x00 => 0x0040,
                0x06 => 0x0021,
                0x07 => 0x0023,
                0x0F => {
                    if self.fault_on_enable {
                        0x0008
                    } else {
                        0x0027
                    }
                }
                _ => self.status_word,
            }
        };

        self.refresh_inputs();
    }

    fn refresh_inputs(&mut self) {
        for mapped in self.input_layout.clone() {
            let value: u32 = match mapped.address {
                0x6041 => self.status_word as u32,
                0x6064 | 0x2088 => self.position_iu as u32,
                0x2055 => 620,  // plausible DC-link reading
                0x6077 => 100,  // constant torque reading
                _ => 0,
            };
            let bytes = value.to_le_bytes();
            let len = mapped.bits as usize / 8;
            self.inputs[mapped.offset..mapped.offset + len].copy_from_slice(&bytes[..len]);
        }
    }
}

struct SimState {
    drives: Vec<SimDrive>,
    al_states: Vec<AlState>,
    opened: bool,
    closed: bool,
    fail_open: bool,
    discovered_override: Option<usize>,
    reach_operational: bool,
    short_wkc: bool,
}

impl SimState {
    fn drive(&mut self, slave: SlaveIndex) -> &mut SimDrive {
        &mut self.drives[slave.raw() as usize - 1]
    }
}

/// The simulated link. Hand it to an [`exolink_hardware::EthercatMaster`];
/// keep a [`SimHandle`] to observe and steer the simulation from the test.
pub struct SimLink {
    state: Arc<Mutex<SimState>>,
    sdo: SimSdo,
}

impl SimLink {
    pub fn new(num_slaves: usize) -> Self {
        let state = Arc::new(Mutex::new(SimState {
            drives: (0..num_slaves).map(|_| SimDrive::new()).collect(),
            al_states: vec![AlState::Init; num_slaves],
            opened: false,
            closed: false,
            fail_open: false,
            discovered_override: None,
            reach_operational: true,
            short_wkc: false,
        }));
        let sdo = SimSdo {
            state: state.clone(),
        };
        Self { state, sdo }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }
}

impl EthercatLink for SimLink {
    type Pdo = SimPdo;
    type Sdo = SimSdo;

    fn open(&mut self, ifname: &str) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(LinkError::NoSocket {
                ifname: ifname.to_string(),
            });
        }
        state.opened = true;
        state.closed = false;
        Ok(())
    }

    fn config_init(&mut self) -> Result<usize, LinkError> {
        let mut state = self.state.lock().unwrap();
        let found = state.discovered_override.unwrap_or(state.drives.len());
        if found == 0 {
            return Err(LinkError::NoSlavesFound);
        }
        // Discovery leaves all slaves pre-operational
        for al_state in state.al_states.iter_mut() {
            *al_state = AlState::PreOperational;
        }
        Ok(found)
    }

    fn config_map(&mut self) -> Result<usize, LinkError> {
        let mut state = self.state.lock().unwrap();
        for drive in state.drives.iter_mut() {
            drive.configure_images();
        }
        // Mapping done; slaves move to safe-operational by themselves
        for al_state in state.al_states.iter_mut() {
            *al_state = AlState::SafeOperational;
        }
        Ok(state.drives.len() * 2 * IMAGE_SIZE)
    }

    fn config_dc(&mut self) {}

    fn request_state(&mut self, slave: u16, requested: AlState) {
        let mut state = self.state.lock().unwrap();
        if requested == AlState::Operational && !state.reach_operational {
            for drive in state.drives.iter_mut() {
                drive.al_status_code = 0x0024; // invalid input mapping
            }
            return;
        }
        if slave == 0 {
            for al_state in state.al_states.iter_mut() {
                *al_state = requested;
            }
        } else {
            state.al_states[slave as usize - 1] = requested;
        }
    }

    fn wait_for_state(&mut self, slave: u16, _requested: AlState, _timeout: Duration) -> AlState {
        let state = self.state.lock().unwrap();
        if slave == 0 {
            let first = state.al_states[0];
            if state.al_states.iter().all(|s| *s == first) {
                first
            } else {
                AlState::None
            }
        } else {
            state.al_states[slave as usize - 1]
        }
    }

    fn read_state(&mut self, slave: u16) -> AlState {
        self.state.lock().unwrap().al_states[slave as usize - 1]
    }

    fn al_status_code(&mut self, slave: u16) -> u16 {
        self.state.lock().unwrap().drives[slave as usize - 1].al_status_code
    }

    fn slave_count(&self) -> usize {
        self.state.lock().unwrap().drives.len()
    }

    fn send_process_data(&mut self) {}

    fn receive_process_data(&mut self, _timeout: Duration) -> u16 {
        let mut state = self.state.lock().unwrap();
        for drive in state.drives.iter_mut() {
            drive.process();
        }
        let expected = 3 * state.drives.len() as u16;
        if state.short_wkc {
            expected.saturating_sub(1)
        } else {
            expected
        }
    }

    fn expected_wkc(&self) -> u16 {
        3 * self.state.lock().unwrap().drives.len() as u16
    }

    fn pdo_io(&self) -> SimPdo {
        SimPdo {
            state: self.state.clone(),
        }
    }

    fn sdo_io(&mut self) -> &mut SimSdo {
        &mut self.sdo
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.opened = false;
        state.closed = true;
    }
}

/// Mailbox access to the simulated dictionaries
pub struct SimSdo {
    state: Arc<Mutex<SimState>>,
}

impl SdoIo for SimSdo {
    fn download(
        &mut self,
        slave: SlaveIndex,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), SdoError> {
        let mut state = self.state.lock().unwrap();
        let drive = state.drive(slave);
        match index {
            // Setup write configuration: reset the running checksum
            0x2064 => drive.download_sum = 0,
            // Setup data word pair: accumulate the checksum the way the
            // drive does, and expose it on the checksum result object
            0x2065 => {
                let mut padded = [0u8; 4];
                padded[..data.len().min(4)].copy_from_slice(&data[..data.len().min(4)]);
                let value = u32::from_le_bytes(padded);
                drive.download_sum = drive
                    .download_sum
                    .wrapping_add((value & 0xFFFF) as u16)
                    .wrapping_add((value >> 16) as u16);
                let sum = drive.download_sum;
                drive.objects.insert((0x206A, 0), sum.to_le_bytes().to_vec());
            }
            _ => {}
        }
        drive.objects.insert((index, sub), data.to_vec());
        Ok(())
    }

    fn upload(&mut self, slave: SlaveIndex, index: u16, sub: u8) -> Result<Vec<u8>, SdoError> {
        let mut state = self.state.lock().unwrap();
        let drive = state.drive(slave);
        // The hardware layer only uploads 16-bit objects
        Ok(drive
            .objects
            .get(&(index, sub))
            .cloned()
            .unwrap_or_else(|| vec![0; 2]))
    }
}

/// A cloneable handle on the simulated process images
#[derive(Clone)]
pub struct SimPdo {
    state: Arc<Mutex<SimState>>,
}

impl PdoIo for SimPdo {
    fn read_input(&self, slave: SlaveIndex, offset: usize, buf: &mut [u8]) {
        let mut state = self.state.lock().unwrap();
        let drive = state.drive(slave);
        buf.copy_from_slice(&drive.inputs[offset..offset + buf.len()]);
    }

    fn write_output(&self, slave: SlaveIndex, offset: usize, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let drive = state.drive(slave);
        drive.outputs[offset..offset + data.len()].copy_from_slice(data);
        drive.process();
    }
}

/// Test-side handle for observing and steering the simulation
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn with_drive<R>(&self, slave: u16, f: impl FnOnce(&mut SimDrive) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state.drives[slave as usize - 1])
    }

    /// Set the absolute encoder position a drive reports
    pub fn set_position_iu(&self, slave: u16, position_iu: i32) {
        self.with_drive(slave, |drive| {
            drive.position_iu = position_iu;
            drive.refresh_inputs();
        });
    }

    /// Make a drive fall into Fault when operation is enabled
    pub fn set_fault_on_enable(&self, slave: u16) {
        self.with_drive(slave, |drive| drive.fault_on_enable = true);
    }

    /// Pre-load a dictionary object, e.g. the setup checksum result
    pub fn set_object(&self, slave: u16, index: u16, sub: u8, data: Vec<u8>) {
        self.with_drive(slave, |drive| {
            drive.objects.insert((index, sub), data);
        });
    }

    /// The value last downloaded to a dictionary object
    pub fn object(&self, slave: u16, index: u16, sub: u8) -> Option<Vec<u8>> {
        self.with_drive(slave, |drive| drive.objects.get(&(index, sub)).cloned())
    }

    /// Write raw bytes into a slave's input image (for sensor slaves that
    /// publish without a negotiated mapping)
    pub fn set_input_f32(&self, slave: u16, offset: usize, value: f32) {
        self.with_drive(slave, |drive| {
            drive.inputs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        });
    }

    /// The current status word of a drive
    pub fn status_word(&self, slave: u16) -> u16 {
        self.with_drive(slave, |drive| drive.status_word)
    }

    /// The target position last written to a drive's output image
    pub fn target_position(&self, slave: u16) -> i32 {
        self.with_drive(slave, |drive| {
            let mapped = drive
                .output_layout
                .iter()
                .find(|m| m.address == 0x607A)
                .copied()
                .expect("target position is not mapped");
            i32::from_le_bytes(
                drive.outputs[mapped.offset..mapped.offset + 4]
                    .try_into()
                    .unwrap(),
            )
        })
    }

    /// The target torque last written to a drive's output image
    pub fn target_torque(&self, slave: u16) -> i16 {
        self.with_drive(slave, |drive| {
            let mapped = drive
                .output_layout
                .iter()
                .find(|m| m.address == 0x6071)
                .copied()
                .expect("target torque is not mapped");
            i16::from_le_bytes(
                drive.outputs[mapped.offset..mapped.offset + 2]
                    .try_into()
                    .unwrap(),
            )
        })
    }

    /// Whether a MISO object address was mapped, and at which byte offset
    pub fn input_offset_of(&self, slave: u16, address: u16) -> Option<usize> {
        self.with_drive(slave, |drive| {
            drive
                .input_layout
                .iter()
                .find(|m| m.address == address)
                .map(|m| m.offset)
        })
    }

    /// Make `open` fail, as if the interface does not exist
    pub fn set_fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    /// Override the number of slaves discovery reports
    pub fn set_discovered(&self, count: usize) {
        self.state.lock().unwrap().discovered_override = Some(count);
    }

    /// Keep slaves from ever reaching Operational
    pub fn prevent_operational(&self) {
        self.state.lock().unwrap().reach_operational = false;
    }

    /// Report a working counter one short of the expected value
    pub fn set_short_wkc(&self, short: bool) {
        self.state.lock().unwrap().short_wkc = short;
    }

    /// The application-layer state of a slave
    pub fn al_state(&self, slave: u16) -> AlState {
        self.state.lock().unwrap().al_states[slave as usize - 1]
    }

    /// Whether the link has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
