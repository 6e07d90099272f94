//! Test fixtures: scripted doubles for the HID transport seam.
//!
//! `MockTransport` plays the enumeration/open side, `MockHandle` the open
//! device. Reads and writes are scripted per device through shared
//! [`MockDeviceState`]; tests keep the `Rc` and push outcomes while the
//! daemon owns the transport.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::device::PodRecord;
use crate::error::PodError;
use crate::protocol::{CMD_UPDATE, RESPONSE_LEN};
use crate::transport::{HidHandle, HidTransport, TransportFault};

/// Scripted outcome of one read on a [`MockHandle`].
#[derive(Debug, Clone)]
pub enum ReadScript {
    /// Deliver a full 8-byte frame.
    Frame([u8; RESPONSE_LEN]),
    /// Elapse the timeout with no data.
    Timeout,
    /// Deliver fewer bytes than a full frame.
    Short(Vec<u8>),
    /// Fail the read at the transport layer.
    Fail(String),
}

/// Scripted outcome of one write on a [`MockHandle`].
#[derive(Debug, Clone)]
pub enum WriteScript {
    /// Accept the whole frame (the default when the script is empty).
    Full,
    /// Accept only this many bytes.
    Short(usize),
    /// Fail the write at the transport layer.
    Fail(String),
}

/// Shared script and log state for one mock device.
#[derive(Default)]
pub struct MockDeviceState {
    /// Consumed front-to-back; an empty queue reads as a timeout.
    pub reads: VecDeque<ReadScript>,
    /// Consumed front-to-back; an empty queue accepts every write.
    pub writes: VecDeque<WriteScript>,
    /// Every frame the daemon wrote, in order.
    pub written: Vec<Vec<u8>>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub serial: Option<String>,
}

pub type SharedDevice = Rc<RefCell<MockDeviceState>>;

/// Handle half of the mock transport.
pub struct MockHandle {
    state: SharedDevice,
}

impl MockHandle {
    pub fn new(state: SharedDevice) -> Self {
        Self { state }
    }
}

impl HidHandle for MockHandle {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportFault> {
        let mut state = self.state.borrow_mut();
        state.written.push(data.to_vec());
        match state.writes.pop_front() {
            None | Some(WriteScript::Full) => Ok(data.len()),
            Some(WriteScript::Short(n)) => Ok(n),
            Some(WriteScript::Fail(msg)) => Err(TransportFault(msg)),
        }
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize, TransportFault> {
        match self.state.borrow_mut().reads.pop_front() {
            None | Some(ReadScript::Timeout) => Ok(0),
            Some(ReadScript::Frame(frame)) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            Some(ReadScript::Short(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(ReadScript::Fail(msg)) => Err(TransportFault(msg)),
        }
    }

    fn product_string(&self) -> Option<String> {
        self.state.borrow().product.clone()
    }

    fn manufacturer_string(&self) -> Option<String> {
        self.state.borrow().manufacturer.clone()
    }

    fn serial_number(&self) -> Option<String> {
        self.state.borrow().serial.clone()
    }
}

#[derive(Default)]
struct TransportState {
    candidates: Vec<String>,
    devices: HashMap<String, SharedDevice>,
    refuse: HashSet<String>,
    opens: Vec<String>,
}

/// Scripted transport with a fixed candidate list.
///
/// Cloning shares the underlying state, so a test can keep one clone while
/// the daemon owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enumerable, openable device and returns its script state.
    pub fn add_device(&self, path: &str) -> SharedDevice {
        let device: SharedDevice = Rc::new(RefCell::new(MockDeviceState::default()));
        let mut state = self.state.borrow_mut();
        state.candidates.push(path.to_string());
        state.devices.insert(path.to_string(), device.clone());
        device
    }

    /// Adds an enumerable candidate whose open always fails.
    pub fn refuse(&self, path: &str) {
        let mut state = self.state.borrow_mut();
        state.candidates.push(path.to_string());
        state.refuse.insert(path.to_string());
    }

    /// Every open attempted so far, in order.
    pub fn opens(&self) -> Vec<String> {
        self.state.borrow().opens.clone()
    }
}

impl HidTransport for MockTransport {
    fn enumerate(&mut self, _vendor_id: u16, _product_id: u16) -> Vec<String> {
        self.state.borrow().candidates.clone()
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn HidHandle>, PodError> {
        let mut state = self.state.borrow_mut();
        state.opens.push(path.to_string());
        if state.refuse.contains(path) {
            return Err(PodError::Open {
                path: path.to_string(),
                reason: "open refused".into(),
            });
        }
        match state.devices.get(path) {
            Some(device) => Ok(Box::new(MockHandle::new(device.clone()))),
            None => Err(PodError::Open {
                path: path.to_string(),
                reason: "no such device".into(),
            }),
        }
    }
}

/// A well-formed update report frame.
pub fn update_frame(ticks: i16, controls: u8) -> [u8; RESPONSE_LEN] {
    let t = ticks.to_le_bytes();
    [CMD_UPDATE, t[0], t[1], controls, 0, 0, 0, 0]
}

/// A standalone record over a fresh mock device, for unit tests that bypass
/// the scanner.
pub fn mock_record(path: &str) -> (PodRecord, SharedDevice) {
    let device: SharedDevice = Rc::new(RefCell::new(MockDeviceState::default()));
    let record = PodRecord::new(path.to_string(), Box::new(MockHandle::new(device.clone())));
    (record, device)
}
