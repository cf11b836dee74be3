//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{ControlRecord, MockFault, MockTransport};
pub use nusb::NusbTransport;
pub use traits::{ControlTransfer, Direction, Expect, TransportError, UsbTransport};
