//! Protocol module - Seek USB protocol definitions.

pub mod constants;
pub mod frame;
pub mod sensor;

pub use constants::*;
pub use frame::{
    CalibrationKind, FrameError, FrameHeader, FrameKind, FrameSequencer, RawFrame, SequenceStep,
};
pub use sensor::{ImageRegion, SensorModel};
