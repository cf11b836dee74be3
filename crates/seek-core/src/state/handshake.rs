//! Device initialization sequence.
//!
//! Six steps, each of which must succeed before the next one is issued:
//!
//! 1. SET_FACTORY_SETTINGS_FEATURES
//! 2. SET_FIRMWARE_INFO_FEATURES
//! 3. SET_IMAGE_PROCESSING_MODE
//! 4. GET_FACTORY_SETTINGS
//! 5. SET_OPERATION_MODE, then GET_OPERATION_MODE must echo it
//! 6. GET_FIRMWARE_INFO and READ_CHIP_ID

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::protocol::constants::*;
use crate::transport::{ControlTransfer, Expect, TransportError, UsbTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    FactorySettingsFeatures,
    FirmwareInfoFeatures,
    ImageProcessingMode,
    FactorySettings,
    OperationMode,
    FirmwareInfo,
}

impl HandshakeStep {
    /// 1-based position in the sequence.
    pub fn number(&self) -> u8 {
        match self {
            HandshakeStep::FactorySettingsFeatures => 1,
            HandshakeStep::FirmwareInfoFeatures => 2,
            HandshakeStep::ImageProcessingMode => 3,
            HandshakeStep::FactorySettings => 4,
            HandshakeStep::OperationMode => 5,
            HandshakeStep::FirmwareInfo => 6,
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::FactorySettingsFeatures => "set factory settings features",
            HandshakeStep::FirmwareInfoFeatures => "set firmware info features",
            HandshakeStep::ImageProcessingMode => "set image processing mode",
            HandshakeStep::FactorySettings => "get factory settings",
            HandshakeStep::OperationMode => "set operation mode",
            HandshakeStep::FirmwareInfo => "get firmware info",
        };
        write!(f, "{} ({})", self.number(), name)
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Handshake step {step} failed: {source}")]
    Transfer {
        step: HandshakeStep,
        #[source]
        source: TransportError,
    },

    #[error("Operation mode not applied: sent {sent:02X?}, device reports {reported:02X?}")]
    ModeMismatch { sent: Vec<u8>, reported: Vec<u8> },
}

impl HandshakeError {
    pub fn step(&self) -> HandshakeStep {
        match self {
            HandshakeError::Transfer { step, .. } => *step,
            HandshakeError::ModeMismatch { .. } => HandshakeStep::OperationMode,
        }
    }

    /// Whether the failure was the device going away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, HandshakeError::Transfer { source, .. } if source.is_fatal())
    }
}

/// Device data read during the handshake. Kept opaque: it is surfaced to
/// consumers, never interpreted by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeReport {
    pub factory_settings: Vec<u8>,
    pub firmware_info: Vec<u8>,
    pub chip_id: Vec<u8>,
}

fn out<T: UsbTransport + ?Sized>(
    transport: &T,
    step: HandshakeStep,
    request: u8,
    data: &[u8],
) -> Result<(), HandshakeError> {
    transport
        .control_transfer(ControlTransfer::Out { request, data }, Expect::ExactLength)
        .map_err(|source| HandshakeError::Transfer { step, source })?;
    Ok(())
}

fn get<T: UsbTransport + ?Sized>(
    transport: &T,
    step: HandshakeStep,
    request: u8,
    length: u16,
) -> Result<Vec<u8>, HandshakeError> {
    transport
        .control_transfer(ControlTransfer::In { request, length }, Expect::ExactLength)
        .map_err(|source| HandshakeError::Transfer { step, source })
}

/// Run the initialization sequence, stopping at the first failing step.
#[instrument(skip(transport), fields(pid = %format!("{:04X}", transport.product_id())))]
pub fn run_handshake<T: UsbTransport + ?Sized>(
    transport: &T,
) -> Result<HandshakeReport, HandshakeError> {
    use HandshakeStep::*;

    out(
        transport,
        FactorySettingsFeatures,
        SET_FACTORY_SETTINGS_FEATURES,
        &FACTORY_SETTINGS_FEATURES,
    )?;
    out(
        transport,
        FirmwareInfoFeatures,
        SET_FIRMWARE_INFO_FEATURES,
        &FIRMWARE_INFO_FEATURES,
    )?;
    out(
        transport,
        ImageProcessingMode,
        SET_IMAGE_PROCESSING_MODE,
        &IMAGE_PROCESSING_MODE_RAW,
    )?;

    let factory_settings = get(
        transport,
        FactorySettings,
        GET_FACTORY_SETTINGS,
        FACTORY_SETTINGS_LEN,
    )?;
    debug!(factory_settings = ?factory_settings, "Factory settings");

    out(transport, OperationMode, SET_OPERATION_MODE, &OPERATION_MODE_RUN)?;
    let reported = get(transport, OperationMode, GET_OPERATION_MODE, OPERATION_MODE_LEN)?;
    if reported != OPERATION_MODE_RUN {
        return Err(HandshakeError::ModeMismatch {
            sent: OPERATION_MODE_RUN.to_vec(),
            reported,
        });
    }

    let firmware_info = get(transport, FirmwareInfo, GET_FIRMWARE_INFO, FIRMWARE_INFO_LEN)?;
    let chip_id = get(transport, FirmwareInfo, READ_CHIP_ID, CHIP_ID_LEN)?;

    info!(
        firmware = %format!("{:02X?}", firmware_info),
        chip_id = %format!("{:02X?}", chip_id),
        "Handshake complete"
    );

    Ok(HandshakeReport {
        factory_settings,
        firmware_info,
        chip_id,
    })
}
