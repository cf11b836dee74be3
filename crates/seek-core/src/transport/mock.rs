//! Mock USB transport for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::traits::{Direction, TransportError, UsbTransport};
use crate::protocol::constants::{
    GET_OPERATION_MODE, SEEK_S104SP_PRODUCT_ID, SEEK_VENDOR_ID, SET_OPERATION_MODE,
};

/// Failure the mock can inject in place of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Timeout,
    Stall,
    Short,
    Disconnected,
}

impl MockFault {
    fn into_error(self, expected: usize) -> TransportError {
        match self {
            MockFault::Timeout => TransportError::Timeout { timeout_ms: 500 },
            MockFault::Stall => TransportError::Stall,
            MockFault::Short => TransportError::ShortTransfer {
                expected,
                actual: 0,
            },
            MockFault::Disconnected => TransportError::Disconnected,
        }
    }
}

/// A control transfer seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub direction: Direction,
    pub request: u8,
    pub data: Vec<u8>,
}

/// Mock transport for unit testing the driver and session logic.
///
/// Control IN requests answer with a scripted response if one is set, echo the
/// last SET_OPERATION_MODE payload for GET_OPERATION_MODE, and otherwise
/// return zeroes of the requested length. Clones share all state, so a test
/// can keep a handle while a session owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Scripted control IN responses per request code.
    responses: Arc<Mutex<HashMap<u8, Vec<u8>>>>,
    /// Requests that fail when issued.
    faults: Arc<Mutex<HashMap<u8, MockFault>>>,
    /// Queued bulk reads.
    frames: Arc<Mutex<VecDeque<Result<Vec<u8>, MockFault>>>>,
    /// Captured control transfers.
    control_log: Arc<Mutex<Vec<ControlRecord>>>,
    /// Report `Disconnected` once the frame queue runs dry.
    disconnect_when_drained: Arc<Mutex<bool>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_ids(SEEK_VENDOR_ID, SEEK_S104SP_PRODUCT_ID)
    }

    pub fn with_ids(vid: u16, pid: u16) -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            frames: Arc::new(Mutex::new(VecDeque::new())),
            control_log: Arc::new(Mutex::new(Vec::new())),
            disconnect_when_drained: Arc::new(Mutex::new(false)),
            connected: Arc::new(Mutex::new(true)),
            vid,
            pid,
        }
    }

    /// Script the response returned for a control IN request.
    pub fn set_response(&self, request: u8, data: &[u8]) {
        self.responses
            .lock()
            .unwrap()
            .insert(request, data.to_vec());
    }

    /// Make every transfer with this request code fail.
    pub fn fail_request(&self, request: u8, fault: MockFault) {
        self.faults.lock().unwrap().insert(request, fault);
    }

    /// Queue a frame to be returned on the next bulk read.
    pub fn queue_frame(&self, frame: Vec<u8>) {
        self.frames.lock().unwrap().push_back(Ok(frame));
    }

    /// Queue a failed bulk read.
    pub fn queue_fault(&self, fault: MockFault) {
        self.frames.lock().unwrap().push_back(Err(fault));
    }

    pub fn disconnect_when_drained(&self) {
        *self.disconnect_when_drained.lock().unwrap() = true;
    }

    /// Get all captured control transfers.
    pub fn control_log(&self) -> Vec<ControlRecord> {
        self.control_log.lock().unwrap().clone()
    }

    /// Captured transfers with a given request code.
    pub fn requests(&self, request: u8) -> Vec<ControlRecord> {
        self.control_log()
            .into_iter()
            .filter(|r| r.request == request)
            .collect()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    fn check(&self, request: u8, expected: usize) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        if let Some(fault) = self.faults.lock().unwrap().get(&request) {
            return Err(fault.into_error(expected));
        }
        Ok(())
    }

    fn record(&self, direction: Direction, request: u8, data: &[u8]) {
        self.control_log.lock().unwrap().push(ControlRecord {
            direction,
            request,
            data: data.to_vec(),
        });
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn control_out(&self, request: u8, data: &[u8]) -> Result<usize, TransportError> {
        self.check(request, data.len())?;
        self.record(Direction::HostToDevice, request, data);
        Ok(data.len())
    }

    fn control_in(&self, request: u8, length: u16) -> Result<Vec<u8>, TransportError> {
        self.check(request, length as usize)?;
        let scripted = self.responses.lock().unwrap().get(&request).cloned();
        let response = match scripted {
            Some(data) => data,
            None if request == GET_OPERATION_MODE => self
                .requests(SET_OPERATION_MODE)
                .last()
                .map(|r| r.data.clone())
                .unwrap_or_else(|| vec![0; length as usize]),
            None => vec![0; length as usize],
        };
        self.record(Direction::DeviceToHost, request, &response);
        Ok(response)
    }

    fn bulk_read(&self, length: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        match self.frames.lock().unwrap().pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(fault)) => Err(fault.into_error(length)),
            None if *self.disconnect_when_drained.lock().unwrap() => {
                Err(TransportError::Disconnected)
            }
            None => Err(TransportError::Timeout { timeout_ms: 500 }),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
