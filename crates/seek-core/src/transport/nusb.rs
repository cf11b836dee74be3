//! nusb-based USB transport implementation.

use std::io::{ErrorKind, Read};

use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Recipient, TransferError};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{FRAME_ENDPOINT, SEEK_VENDOR_ID, SUPPORTED_PIDS, TRANSFER_TIMEOUT};

/// nusb-based USB transport.
pub struct NusbTransport {
    interface: Interface,
    in_endpoint: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first attached Seek camera (tries all supported PIDs).
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if device_info.vendor_id() == SEEK_VENDOR_ID
                && SUPPORTED_PIDS.contains(&device_info.product_id())
            {
                return Self::open_device_info(device_info);
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: SEEK_VENDOR_ID,
            pid: 0,
        })
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info)
    }

    pub(crate) fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // Frame data arrives on the first bulk IN endpoint of interface 0.
        let mut in_endpoint = FRAME_ENDPOINT;
        'search: for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != 0 {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk
                            && ep.direction() == nusb::transfer::Direction::In
                        {
                            in_endpoint = ep.address();
                            break 'search;
                        }
                    }
                }
            }
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            interface,
            in_endpoint,
            vid,
            pid,
        })
    }
}

fn map_transfer_error(e: TransferError) -> TransportError {
    match e {
        TransferError::Disconnected => TransportError::Disconnected,
        TransferError::Stall => TransportError::Stall,
        TransferError::Cancelled => TransportError::Timeout {
            timeout_ms: TRANSFER_TIMEOUT.as_millis() as u64,
        },
        other => TransportError::TransferFailed(other.to_string()),
    }
}

fn map_io_error(e: std::io::Error, expected: usize) -> TransportError {
    if let Some(inner) = e.get_ref().and_then(|i| i.downcast_ref::<TransferError>()) {
        return map_transfer_error(inner.clone());
    }
    match e.kind() {
        ErrorKind::TimedOut => TransportError::Timeout {
            timeout_ms: TRANSFER_TIMEOUT.as_millis() as u64,
        },
        ErrorKind::UnexpectedEof => TransportError::ShortTransfer {
            expected,
            actual: 0,
        },
        ErrorKind::NotConnected | ErrorKind::BrokenPipe => TransportError::Disconnected,
        _ => TransportError::Io(e),
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(request = %format!("0x{:02X}", request), len = data.len()))]
    fn control_out(&self, request: u8, data: &[u8]) -> Result<usize, TransportError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Interface,
                    request,
                    value: 0,
                    index: 0,
                    data,
                },
                TRANSFER_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_error)?;

        debug!(bytes_written = data.len(), "Control OUT complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(request = %format!("0x{:02X}", request)))]
    fn control_in(&self, request: u8, length: u16) -> Result<Vec<u8>, TransportError> {
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Interface,
                    request,
                    value: 0,
                    index: 0,
                    length,
                },
                TRANSFER_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_error)?;

        debug!(bytes_read = data.len(), "Control IN complete");
        Ok(data)
    }

    #[instrument(skip(self))]
    fn bulk_read(&self, length: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::TransferFailed(e.to_string()))?;

        let mut reader = ep.reader(16384);
        reader.set_read_timeout(TRANSFER_TIMEOUT);

        let mut buf = vec![0u8; length];
        reader
            .read_exact(&mut buf)
            .map_err(|e| map_io_error(e, length))?;

        debug!(bytes_read = length, "Frame read complete");
        Ok(buf)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
