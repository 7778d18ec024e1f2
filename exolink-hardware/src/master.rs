//! The EtherCAT master cyclic-communication engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use exolink_common::traits::{EthercatLink, PdoIo};
use exolink_common::AlState;

use crate::error::{FailedToReachOperationalSnafu, NotAllSlavesFoundSnafu, Result};
use crate::joint::Joint;

/// Bound on the send/receive/state-check iterations while waiting for all
/// slaves to reach Operational
const OPERATIONAL_RETRIES: u32 = 40;

/// Timeout of the bounded receive call in the cyclic loop
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(2);

/// Timeout for broadcast state checks during startup
const STATE_CHECK_TIMEOUT: Duration = Duration::from_millis(8000);

/// Length of the overrun accounting window
const OVERRUN_WINDOW: Duration = Duration::from_secs(10);

/// Overrun percentage above which the window report escalates to a warning
const OVERRUN_WARN_THRESHOLD: f32 = 5.0;

/// The cycle-boundary signal external callers wait on
///
/// The cyclic thread bumps the counter after every completed frame
/// exchange; [`CycleSignal::wait_for_cycle`] blocks until that happens, so
/// callers run in lock-step with the fieldbus instead of relying on call
/// timing.
#[derive(Default)]
pub struct CycleSignal {
    cycle: Mutex<u64>,
    condvar: Condvar,
}

impl CycleSignal {
    fn notify(&self) {
        let mut cycle = self.cycle.lock().unwrap();
        *cycle += 1;
        self.condvar.notify_all();
    }

    /// Block until the cyclic thread completes its next frame exchange
    pub fn wait_for_cycle(&self) {
        let cycle = self.cycle.lock().unwrap();
        let start = *cycle;
        let _guard = self
            .condvar
            .wait_while(cycle, |current| *current == start)
            .unwrap();
    }
}

/// Tallies cycle overruns across a fixed window
struct OverrunWindow {
    cycles_per_window: u32,
    total_cycles: u32,
    overruns: u32,
}

impl OverrunWindow {
    fn new(cycle_time: Duration) -> Self {
        let cycles_per_window =
            (OVERRUN_WINDOW.as_millis() / cycle_time.as_millis().max(1)).max(1) as u32;
        Self {
            cycles_per_window,
            total_cycles: 0,
            overruns: 0,
        }
    }

    /// Record one cycle; at the end of each window, return the overrun
    /// percentage and reset
    fn record(&mut self, overrun: bool) -> Option<f32> {
        self.total_cycles += 1;
        if overrun {
            self.overruns += 1;
        }
        if self.total_cycles >= self.cycles_per_window {
            let percentage = 100.0 * self.overruns as f32 / self.total_cycles as f32;
            self.total_cycles = 0;
            self.overruns = 0;
            Some(percentage)
        } else {
            None
        }
    }
}

/// The EtherCAT master: owns the physical link, brings all slaves to
/// Operational, and runs the fixed-period cyclic exchange
///
/// Initialization runs single-threaded before the fieldbus is operational;
/// the cyclic thread is started only once Operational is reached, so the
/// slave table is never written concurrently with cyclic reads.
pub struct EthercatMaster<L: EthercatLink> {
    link: Arc<Mutex<L>>,
    ifname: String,
    expected_slave_count: usize,
    cycle_time: Duration,
    is_operational: Arc<AtomicBool>,
    cycle_signal: Arc<CycleSignal>,
    cyclic_thread: Option<thread::JoinHandle<()>>,
}

impl<L: EthercatLink> EthercatMaster<L> {
    /// Create a master for the given link and configuration
    pub fn new(
        link: L,
        ifname: impl Into<String>,
        expected_slave_count: usize,
        cycle_time_ms: u8,
    ) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
            ifname: ifname.into(),
            expected_slave_count,
            cycle_time: Duration::from_millis(cycle_time_ms as u64),
            is_operational: Arc::new(AtomicBool::new(false)),
            cycle_signal: Arc::new(CycleSignal::default()),
            cyclic_thread: None,
        }
    }

    /// The configured cycle period
    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// Whether the cyclic exchange is currently running
    pub fn is_operational(&self) -> bool {
        self.is_operational.load(Ordering::SeqCst)
    }

    /// The cycle-boundary signal for external callers
    pub fn cycle_signal(&self) -> Arc<CycleSignal> {
        self.cycle_signal.clone()
    }

    /// A handle on the cyclic process image
    pub fn pdo_io(&self) -> Arc<dyn PdoIo> {
        Arc::new(self.link.lock().unwrap().pdo_io())
    }

    /// Run a closure with mailbox access, e.g. for controller resets
    pub fn with_sdo<R>(
        &self,
        f: impl FnOnce(&mut dyn exolink_common::traits::SdoIo) -> R,
    ) -> R {
        let mut link = self.link.lock().unwrap();
        f(link.sdo_io())
    }

    /// Bring the link up, initialize all joints, reach Operational, and
    /// start the cyclic thread
    ///
    /// Returns true when a joint's controller requires a restart before
    /// actuation. All failure paths are fatal: no partial-operation mode
    /// exists.
    pub fn start(&mut self, joints: &mut [Joint]) -> Result<bool> {
        info!("Trying to start EtherCAT");
        let mut link = self.link.lock().unwrap();

        link.open(&self.ifname)?;
        info!("Binding socket on {} succeeded", self.ifname);

        let found = link.config_init()?;
        info!("{found} slave(s) found and initialized");
        if found < self.expected_slave_count {
            link.close();
            return NotAllSlavesFoundSnafu {
                expected: self.expected_slave_count,
                found,
            }
            .fail();
        }

        // Mapping and startup settings are only legal in PreOperational
        link.request_state(0, AlState::PreOperational);
        link.wait_for_state(0, AlState::PreOperational, STATE_CHECK_TIMEOUT);

        let cycle_time_ms = self.cycle_time.as_millis() as u8;
        let pdo: Arc<dyn PdoIo> = Arc::new(link.pdo_io());
        let mut restart_required = false;
        for joint in joints.iter_mut() {
            restart_required |= joint.initialize(link.sdo_io(), &pdo, cycle_time_ms)?;
        }

        // The PDO maps are fixed now; build the frame layout from them
        let image_size = link.config_map()?;
        debug!("Process image is {image_size} bytes");
        link.config_dc();

        link.wait_for_state(0, AlState::SafeOperational, STATE_CHECK_TIMEOUT);

        info!("Request operational state for all slaves");
        link.request_state(0, AlState::Operational);
        // One valid frame exchange keeps the slave outputs happy while the
        // transition is in progress
        link.send_process_data();
        link.receive_process_data(RECEIVE_TIMEOUT);

        let mut reached = false;
        for _ in 0..OPERATIONAL_RETRIES {
            link.send_process_data();
            link.receive_process_data(RECEIVE_TIMEOUT);
            if link.wait_for_state(0, AlState::Operational, Duration::from_millis(50))
                == AlState::Operational
            {
                reached = true;
                break;
            }
        }

        if !reached {
            error!("Not all slaves reached operational state. Non-operational slave(s) listed below");
            for slave in 1..=link.slave_count() as u16 {
                let state = link.read_state(slave);
                if state != AlState::Operational {
                    error!(
                        "Slave {slave} state={state} status code=0x{:04X}",
                        link.al_status_code(slave)
                    );
                }
            }
            return FailedToReachOperationalSnafu.fail();
        }

        info!("Operational state reached for all slaves");
        let expected_wkc = link.expected_wkc();
        let slave_count = link.slave_count() as u16;
        drop(link);

        self.is_operational.store(true, Ordering::SeqCst);
        let link = self.link.clone();
        let is_operational = self.is_operational.clone();
        let cycle_signal = self.cycle_signal.clone();
        let cycle_time = self.cycle_time;
        self.cyclic_thread = Some(thread::spawn(move || {
            cyclic_loop(
                link,
                is_operational,
                cycle_signal,
                cycle_time,
                expected_wkc,
                slave_count,
            );
        }));

        Ok(restart_required)
    }

    /// Stop the cyclic exchange and close the link
    ///
    /// Idempotent: does nothing unless currently operational. Blocks until
    /// the cyclic thread has observed the stop flag and exited.
    pub fn stop(&mut self) {
        if !self.is_operational.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping EtherCAT");
        if let Some(handle) = self.cyclic_thread.take() {
            if handle.join().is_err() {
                error!("Cyclic thread panicked before join");
            }
        }
        let mut link = self.link.lock().unwrap();
        link.request_state(0, AlState::Init);
        link.close();
    }
}

impl<L: EthercatLink> Drop for EthercatMaster<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One fixed-period frame exchange per iteration until told to stop
///
/// Degraded-link evidence (short working counter, a slave dropping out of
/// Operational) is logged and the loop continues; it is not proof of
/// failure.
fn cyclic_loop<L: EthercatLink>(
    link: Arc<Mutex<L>>,
    is_operational: Arc<AtomicBool>,
    cycle_signal: Arc<CycleSignal>,
    cycle_time: Duration,
    expected_wkc: u16,
    slave_count: u16,
) {
    let mut window = OverrunWindow::new(cycle_time);

    while is_operational.load(Ordering::SeqCst) {
        let start = Instant::now();
        {
            let mut link = link.lock().unwrap();
            link.send_process_data();
            let wkc = link.receive_process_data(RECEIVE_TIMEOUT);
            if wkc < expected_wkc {
                // One or more slaves produced no fresh data this cycle
                warn!("Working counter {wkc} lower than expected {expected_wkc}");
            }
            monitor_slave_connection(&mut *link, slave_count);
        }
        cycle_signal.notify();

        let elapsed = start.elapsed();
        let overrun = elapsed > cycle_time;
        if !overrun {
            thread::sleep(cycle_time - elapsed);
        }

        if let Some(percentage) = window.record(overrun) {
            if percentage > OVERRUN_WARN_THRESHOLD {
                warn!(
                    "EtherCAT cycle time of {} ms was not achieved for {percentage:.1}% of cycles",
                    cycle_time.as_millis()
                );
            } else {
                debug!(
                    "EtherCAT cycle time of {} ms was not achieved for {percentage:.1}% of cycles",
                    cycle_time.as_millis()
                );
            }
        }
    }
}

fn monitor_slave_connection<L: EthercatLink>(link: &mut L, slave_count: u16) {
    for slave in 1..=slave_count {
        if link.wait_for_state(slave, AlState::Operational, RECEIVE_TIMEOUT) == AlState::None {
            warn!("EtherCAT train lost connection from slave {slave} onwards");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_reports_only_at_the_boundary() {
        let mut window = OverrunWindow::new(Duration::from_millis(1000));
        // 10 s window at 1000 ms cycles = 10 cycles
        for _ in 0..9 {
            assert_eq!(window.record(false), None);
        }
        assert_eq!(window.record(false), Some(0.0));
    }

    #[test]
    fn overrun_percentage_crosses_escalation_threshold() {
        let mut window = OverrunWindow::new(Duration::from_millis(100));
        // 100 cycles per window; 6 overruns = 6% > threshold
        let mut report = None;
        for n in 0..100 {
            report = window.record(n < 6);
        }
        let percentage = report.unwrap();
        assert!(percentage > OVERRUN_WARN_THRESHOLD);

        // 5 overruns = 5%, which does not escalate
        let mut report = None;
        for n in 0..100 {
            report = window.record(n < 5);
        }
        let percentage = report.unwrap();
        assert!(percentage <= OVERRUN_WARN_THRESHOLD);
    }

    #[test]
    fn window_resets_after_reporting() {
        let mut window = OverrunWindow::new(Duration::from_millis(1000));
        for _ in 0..10 {
            window.record(true);
        }
        for _ in 0..9 {
            assert_eq!(window.record(false), None);
        }
        assert_eq!(window.record(false), Some(0.0));
    }

    #[test]
    fn cycle_signal_wakes_waiters() {
        let signal = Arc::new(CycleSignal::default());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_for_cycle())
        };
        // Keep completing cycles until the waiter has woken up
        while !waiter.is_finished() {
            signal.notify();
            thread::sleep(Duration::from_millis(5));
        }
        waiter.join().unwrap();
    }
}
