//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for the vendor control requests and the
//! bulk frame reads the camera needs, allowing different implementations
//! (nusb, mock, etc.).

use std::fmt;

use thiserror::Error;
use tracing::trace;

use crate::protocol::constants::{
    REQUEST_TYPE_DEVICE_TO_HOST, REQUEST_TYPE_HOST_TO_DEVICE, request_name,
};

/// Direction of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

impl Direction {
    /// bmRequestType used on the wire.
    pub fn request_type(&self) -> u8 {
        match self {
            Direction::HostToDevice => REQUEST_TYPE_HOST_TO_DEVICE,
            Direction::DeviceToHost => REQUEST_TYPE_DEVICE_TO_HOST,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::HostToDevice => write!(f, "HOST->CAM"),
            Direction::DeviceToHost => write!(f, "CAM->HOST"),
        }
    }
}

/// Predicate a caller applies to the byte count of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any completed transfer is accepted.
    NonNegative,
    /// The transfer must move exactly the requested length.
    ExactLength,
}

impl Expect {
    pub fn check(&self, transferred: usize, requested: usize) -> bool {
        match self {
            Expect::NonNegative => true,
            Expect::ExactLength => transferred == requested,
        }
    }
}

/// A single vendor control request.
#[derive(Debug, Clone, Copy)]
pub enum ControlTransfer<'a> {
    Out { request: u8, data: &'a [u8] },
    In { request: u8, length: u16 },
}

impl ControlTransfer<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            ControlTransfer::Out { .. } => Direction::HostToDevice,
            ControlTransfer::In { .. } => Direction::DeviceToHost,
        }
    }

    pub fn request(&self) -> u8 {
        match self {
            ControlTransfer::Out { request, .. } | ControlTransfer::In { request, .. } => *request,
        }
    }

    pub fn length(&self) -> usize {
        match self {
            ControlTransfer::Out { data, .. } => data.len(),
            ControlTransfer::In { length, .. } => *length as usize,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Request 0x{request:02X} ({direction}) returned {code}")]
    Rejected {
        code: i64,
        request: u8,
        direction: Direction,
    },

    #[error("Endpoint stalled")]
    Stall,

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the device itself is gone. Everything else is a transient
    /// failure of one transfer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected
                | TransportError::DeviceNotFound { .. }
                | TransportError::OpenFailed(_)
                | TransportError::ClaimInterfaceFailed { .. }
        )
    }
}

/// Abstract USB transport interface.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait UsbTransport: Send + Sync {
    /// Vendor request, host to device. Returns the number of bytes sent.
    fn control_out(&self, request: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Vendor request, device to host.
    fn control_in(&self, request: u8, length: u16) -> Result<Vec<u8>, TransportError>;

    /// Read `length` bytes of frame data from the bulk IN endpoint.
    fn bulk_read(&self, length: usize) -> Result<Vec<u8>, TransportError>;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;

    /// Issue a control transfer and check its byte count against `expect`.
    /// No retry happens here: the caller decides what a failure means.
    fn control_transfer(
        &self,
        transfer: ControlTransfer<'_>,
        expect: Expect,
    ) -> Result<Vec<u8>, TransportError> {
        let (transferred, response) = match transfer {
            ControlTransfer::Out { request, data } => (self.control_out(request, data)?, Vec::new()),
            ControlTransfer::In { request, length } => {
                let response = self.control_in(request, length)?;
                (response.len(), response)
            }
        };

        if !expect.check(transferred, transfer.length()) {
            return Err(TransportError::Rejected {
                code: transferred as i64,
                request: transfer.request(),
                direction: transfer.direction(),
            });
        }

        trace!(
            request = request_name(transfer.request()),
            direction = %transfer.direction(),
            transferred,
            "Control transfer complete"
        );
        Ok(response)
    }
}

impl<T: UsbTransport + ?Sized> UsbTransport for std::sync::Arc<T> {
    fn control_out(&self, request: u8, data: &[u8]) -> Result<usize, TransportError> {
        (**self).control_out(request, data)
    }

    fn control_in(&self, request: u8, length: u16) -> Result<Vec<u8>, TransportError> {
        (**self).control_in(request, length)
    }

    fn bulk_read(&self, length: usize) -> Result<Vec<u8>, TransportError> {
        (**self).bulk_read(length)
    }

    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectations() {
        assert!(Expect::NonNegative.check(0, 12));
        assert!(Expect::ExactLength.check(12, 12));
        assert!(!Expect::ExactLength.check(4, 12));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(TransportError::Disconnected.is_fatal());
        assert!(!TransportError::Timeout { timeout_ms: 500 }.is_fatal());
        assert!(!TransportError::Stall.is_fatal());
        assert!(
            !TransportError::ShortTransfer {
                expected: 10,
                actual: 2
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_request_types() {
        assert_eq!(Direction::HostToDevice.request_type(), 0x41);
        assert_eq!(Direction::DeviceToHost.request_type(), 0xc1);
    }
}
