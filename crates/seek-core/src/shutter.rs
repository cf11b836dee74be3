//! Shutter control.
//!
//! In `Auto` mode the camera closes its shutter on its own schedule and sends
//! a fresh FSC calibration frame each time. In `Manual` mode it only does so
//! when triggered.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::protocol::constants::{SHUTTER_AUTO, SHUTTER_CONTROL, SHUTTER_MANUAL, SHUTTER_TRIGGER};
use crate::transport::{ControlTransfer, Expect, TransportError, UsbTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShutterMode {
    #[default]
    Auto,
    Manual,
}

impl ShutterMode {
    pub fn toggled(self) -> Self {
        match self {
            ShutterMode::Auto => ShutterMode::Manual,
            ShutterMode::Manual => ShutterMode::Auto,
        }
    }

    /// SHUTTER_CONTROL payload selecting this mode.
    pub fn payload(self) -> &'static [u8] {
        match self {
            ShutterMode::Auto => &SHUTTER_AUTO,
            ShutterMode::Manual => &SHUTTER_MANUAL,
        }
    }
}

impl fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutterMode::Auto => write!(f, "Auto"),
            ShutterMode::Manual => write!(f, "Manual"),
        }
    }
}

/// Tracks the device's shutter mode and issues the commands that change it.
#[derive(Debug)]
pub struct ShutterController {
    mode: ShutterMode,
}

impl ShutterController {
    pub fn new(mode: ShutterMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ShutterMode {
        self.mode
    }

    /// Send the command for the opposite mode and switch to it. The mode is
    /// unchanged if the command fails.
    pub fn toggle<T: UsbTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<ShutterMode, TransportError> {
        let next = self.mode.toggled();
        send(transport, next.payload())?;
        info!(from = %self.mode, to = %next, "Shutter mode changed");
        self.mode = next;
        Ok(next)
    }

    /// Move to `mode`, sending a command only if it differs from the current one.
    pub fn set_mode<T: UsbTransport + ?Sized>(
        &mut self,
        transport: &T,
        mode: ShutterMode,
    ) -> Result<bool, TransportError> {
        if mode == self.mode {
            return Ok(false);
        }
        self.toggle(transport)?;
        Ok(true)
    }

    /// Fire one shutter cycle without changing the mode.
    pub fn trigger<T: UsbTransport + ?Sized>(&self, transport: &T) -> Result<(), TransportError> {
        send(transport, &SHUTTER_TRIGGER)?;
        info!(mode = %self.mode, "Shutter triggered");
        Ok(())
    }
}

fn send<T: UsbTransport + ?Sized>(transport: &T, payload: &[u8]) -> Result<(), TransportError> {
    transport.control_transfer(
        ControlTransfer::Out {
            request: SHUTTER_CONTROL,
            data: payload,
        },
        Expect::ExactLength,
    )?;
    Ok(())
}
