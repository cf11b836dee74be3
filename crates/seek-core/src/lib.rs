//! Seek-Core: driver and frame pipeline for Seek Thermal USB cameras.
//!
//! This crate talks to Seek Thermal cameras (vendor `0x289d`) over USB,
//! classifies the frames they stream, accumulates calibration data, applies
//! radiometric correction and renders an RGB bitmap for each image frame.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Request codes, frame layout, sensor geometry
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **State**: Driver state machine and handshake
//! - **Calibration / Radiometry**: Calibration store and correction
//! - **Pipeline**: Scale, blur, sharpen, exposure, colormap, edges
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Acquisition thread and consumer controls
//! - **Discovery**: Polling scanner for attached cameras
//!
//! # Example
//!
//! ```no_run
//! use seek_core::{DeviceConfig, DeviceSession, NusbTransport};
//!
//! let transport = NusbTransport::open().expect("no camera");
//! let mut session = DeviceSession::new(transport, DeviceConfig::default())
//!     .expect("unsupported camera");
//! session.start().expect("handshake failed");
//! session.join();
//! ```

pub mod calibration;
pub mod config;
pub mod discovery;
pub mod events;
pub mod exposure;
pub mod pipeline;
pub mod protocol;
pub mod radiometry;
pub mod session;
pub mod shutter;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use calibration::{CalibrationPayload, CalibrationSet, CalibrationStore};
pub use config::{DeviceConfig, SharedConfig};
pub use discovery::DeviceDiscovery;
pub use events::{CameraEvent, CameraObserver, DeviceDescriptor, NullObserver, TracingObserver};
pub use exposure::{ExposureController, ExposureMode, ExposureRange};
pub use pipeline::{Colormap, ProcessedFrame};
pub use protocol::{CalibrationKind, FrameKind, RawFrame, SensorModel};
pub use radiometry::ThermalMatrix;
pub use session::{DeviceSession, SessionError};
pub use shutter::{ShutterController, ShutterMode};
pub use state::{DriverState, HandshakeError, HandshakeStep};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
