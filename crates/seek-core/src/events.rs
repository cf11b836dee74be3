//! Observer interface between the driver and its consumer.
//!
//! Callbacks run synchronously on the acquisition thread, so implementations
//! should hand frames off quickly.

use std::fmt;

use crate::pipeline::ProcessedFrame;
use crate::protocol::{CalibrationKind, SensorModel};
use crate::shutter::ShutterMode;
use crate::state::{DriverState, HandshakeReport};

/// Identity of a connected camera and the data read during its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: SensorModel,
    pub factory_settings: Vec<u8>,
    pub firmware_info: Vec<u8>,
    pub chip_id: Vec<u8>,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16, model: SensorModel) -> Self {
        Self {
            vendor_id,
            product_id,
            model,
            factory_settings: Vec::new(),
            firmware_info: Vec::new(),
            chip_id: Vec::new(),
        }
    }

    pub(crate) fn apply_report(&mut self, report: HandshakeReport) {
        self.factory_settings = report.factory_settings;
        self.firmware_info = report.firmware_info;
        self.chip_id = report.chip_id;
    }

    /// Chip id as an uppercase hex string.
    pub fn chip_id_hex(&self) -> String {
        self.chip_id.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Serial number of the camera, which is its chip id. `None` until the
    /// handshake has read it.
    pub fn serial_number(&self) -> Option<String> {
        (!self.chip_id.is_empty()).then(|| self.chip_id_hex())
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Seek {} ({:04X}:{:04X})",
            self.model, self.vendor_id, self.product_id
        )
    }
}

/// Diagnostic events emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    StateChanged { from: DriverState, to: DriverState },
    CalibrationRecorded { kind: CalibrationKind, frame_count: u16 },
    /// All four calibration kinds have been seen.
    CalibrationReady,
    /// The device restarted its calibration sequence.
    CalibrationRearmed { frame_count: u16 },
    /// A frame was dropped without reaching the observer.
    FrameDiscarded { reason: String },
    ShutterModeChanged { mode: ShutterMode },
    ShutterTriggered,
    /// A transfer failed and the loop carried on.
    TransientError { message: String },
}

impl fmt::Display for CameraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraEvent::StateChanged { from, to } => write!(f, "State {from} -> {to}"),
            CameraEvent::CalibrationRecorded { kind, frame_count } => {
                write!(f, "{kind} calibration recorded (frame {frame_count})")
            }
            CameraEvent::CalibrationReady => write!(f, "Calibration ready"),
            CameraEvent::CalibrationRearmed { frame_count } => {
                write!(f, "Calibration re-armed (frame {frame_count})")
            }
            CameraEvent::FrameDiscarded { reason } => write!(f, "Frame discarded: {reason}"),
            CameraEvent::ShutterModeChanged { mode } => write!(f, "Shutter mode {mode}"),
            CameraEvent::ShutterTriggered => write!(f, "Shutter triggered"),
            CameraEvent::TransientError { message } => write!(f, "Transient error: {message}"),
        }
    }
}

/// Observer trait for receiving camera callbacks.
///
/// Implement this trait in your UI layer to receive frames.
pub trait CameraObserver: Send + Sync {
    /// Handshake finished; frames will follow.
    fn on_connect(&self, device: &DeviceDescriptor);

    /// The device is gone or the handshake failed. Fires at most once per
    /// session and never after an explicit stop.
    fn on_disconnect(&self, device: &DeviceDescriptor);

    /// A processed image frame.
    fn on_frame(&self, device: &DeviceDescriptor, frame: &ProcessedFrame);

    /// Diagnostics. Ignored by default.
    fn on_event(&self, _event: &CameraEvent) {}
}

/// No-op observer that discards all callbacks.
pub struct NullObserver;

impl CameraObserver for NullObserver {
    fn on_connect(&self, _device: &DeviceDescriptor) {}
    fn on_disconnect(&self, _device: &DeviceDescriptor) {}
    fn on_frame(&self, _device: &DeviceDescriptor, _frame: &ProcessedFrame) {}
}

/// Observer that logs callbacks using tracing.
pub struct TracingObserver;

impl CameraObserver for TracingObserver {
    fn on_connect(&self, device: &DeviceDescriptor) {
        tracing::info!(
            device = %device,
            serial = device.serial_number().as_deref().unwrap_or("unknown"),
            "Camera connected"
        );
    }

    fn on_disconnect(&self, device: &DeviceDescriptor) {
        tracing::warn!(device = %device, "Camera disconnected");
    }

    fn on_frame(&self, _device: &DeviceDescriptor, frame: &ProcessedFrame) {
        tracing::trace!(
            sequence = frame.sequence,
            width = frame.width(),
            height = frame.height(),
            corrected = frame.corrected,
            exposure = %frame.exposure,
            "Frame"
        );
    }

    fn on_event(&self, event: &CameraEvent) {
        match event {
            CameraEvent::StateChanged { .. } | CameraEvent::CalibrationReady => {
                tracing::info!("{}", event)
            }
            CameraEvent::TransientError { .. } => tracing::warn!("{}", event),
            _ => tracing::debug!("{}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        let mut d = DeviceDescriptor::new(0x289d, 0x0010, SensorModel::S104SP);
        d.apply_report(HandshakeReport {
            chip_id: vec![0xAB, 0x01],
            ..Default::default()
        });
        assert_eq!(d.chip_id_hex(), "AB01");
        assert!(d.to_string().contains("289D:0010"));
    }

    #[test]
    fn test_serial_number_from_chip_id() {
        let mut d = DeviceDescriptor::new(0x289d, 0x0010, SensorModel::S104SP);
        assert_eq!(d.serial_number(), None);
        d.apply_report(HandshakeReport {
            chip_id: vec![0x00, 0x1F, 0xC4],
            ..Default::default()
        });
        assert_eq!(d.serial_number().as_deref(), Some("001FC4"));
    }
}
