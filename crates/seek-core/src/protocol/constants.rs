//! Protocol constants for Seek Thermal USB cameras.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// Seek Thermal Vendor ID
pub const SEEK_VENDOR_ID: u16 = 0x289d;

/// Mosaic core / CompactPRO class Product ID
pub const SEEK_MOSAIC_PRODUCT_ID: u16 = 0x0011;

/// S104SP Product ID
pub const SEEK_S104SP_PRODUCT_ID: u16 = 0x0010;

/// All supported PIDs for device discovery
pub const SUPPORTED_PIDS: &[u16] = &[SEEK_MOSAIC_PRODUCT_ID, SEEK_S104SP_PRODUCT_ID];

// ============================================================================
// Transfer parameters
// ============================================================================

/// bmRequestType for vendor requests, host to device, interface recipient.
pub const REQUEST_TYPE_HOST_TO_DEVICE: u8 = 0x41;

/// bmRequestType for vendor requests, device to host, interface recipient.
pub const REQUEST_TYPE_DEVICE_TO_HOST: u8 = 0xc1;

/// Timeout applied to every control and bulk transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(500);

/// Bulk IN endpoint carrying frame data.
pub const FRAME_ENDPOINT: u8 = 0x81;

// ============================================================================
// Vendor request codes (bRequest)
// ============================================================================

pub const SET_FACTORY_SETTINGS_FEATURES: u8 = 0x56;
pub const SET_FIRMWARE_INFO_FEATURES: u8 = 0x55;
pub const SET_IMAGE_PROCESSING_MODE: u8 = 0x3e;
pub const START_GET_IMAGE_TRANSFER: u8 = 0x53;
pub const GET_FACTORY_SETTINGS: u8 = 0x58;
pub const SET_OPERATION_MODE: u8 = 0x3c;
pub const GET_OPERATION_MODE: u8 = 61;
pub const GET_FIRMWARE_INFO: u8 = 0x4e;
pub const SHUTTER_CONTROL: u8 = 0x37;
pub const READ_CHIP_ID: u8 = 0x36;

/// Human readable name of a request code, for logs and error reports.
pub fn request_name(request: u8) -> &'static str {
    match request {
        SET_FACTORY_SETTINGS_FEATURES => "SET_FACTORY_SETTINGS_FEATURES",
        SET_FIRMWARE_INFO_FEATURES => "SET_FIRMWARE_INFO_FEATURES",
        SET_IMAGE_PROCESSING_MODE => "SET_IMAGE_PROCESSING_MODE",
        START_GET_IMAGE_TRANSFER => "START_GET_IMAGE_TRANSFER",
        GET_FACTORY_SETTINGS => "GET_FACTORY_SETTINGS",
        SET_OPERATION_MODE => "SET_OPERATION_MODE",
        GET_OPERATION_MODE => "GET_OPERATION_MODE",
        GET_FIRMWARE_INFO => "GET_FIRMWARE_INFO",
        SHUTTER_CONTROL => "SHUTTER_CONTROL",
        READ_CHIP_ID => "READ_CHIP_ID",
        _ => "UNKNOWN",
    }
}

// ============================================================================
// Handshake payloads
// ============================================================================

/// Selects the factory settings block returned by GET_FACTORY_SETTINGS.
pub const FACTORY_SETTINGS_FEATURES: [u8; 6] = [0x06, 0x00, 0x08, 0x00, 0x00, 0x00];

/// Selects the firmware info block returned by GET_FIRMWARE_INFO.
pub const FIRMWARE_INFO_FEATURES: [u8; 2] = [0x17, 0x00];

/// Image processing mode: raw frames, no on-device processing.
pub const IMAGE_PROCESSING_MODE_RAW: [u8; 2] = [0x08, 0x00];

/// Operation mode: streaming.
pub const OPERATION_MODE_RUN: [u8; 2] = [0x01, 0x00];

pub const FACTORY_SETTINGS_LEN: u16 = 12;
pub const FIRMWARE_INFO_LEN: u16 = 4;
pub const CHIP_ID_LEN: u16 = 12;
pub const OPERATION_MODE_LEN: u16 = 2;

// ============================================================================
// Shutter payloads
// ============================================================================

pub const SHUTTER_AUTO: [u8; 2] = [0x01, 0x00];
pub const SHUTTER_MANUAL: [u8; 2] = [0x00, 0x00];
pub const SHUTTER_TRIGGER: [u8; 2] = [0x02, 0x00];

// ============================================================================
// Frame layout
// ============================================================================

/// Frame words are little-endian u16.
pub const FRAME_WORD_SIZE: usize = 2;

/// Word index of the rolling frame counter.
pub const FRAME_COUNT_INDEX: usize = 1;

/// Word index of the frame type tag.
pub const FRAME_TYPE_INDEX: usize = 2;

/// Minimum number of words needed to classify a frame.
pub const FRAME_HEADER_WORDS: usize = 3;

pub const S104SP_FRAME_WIDTH: usize = 208;
pub const S104SP_FRAME_HEIGHT: usize = 154;

pub const MOSAIC_FRAME_RAW_WIDTH: usize = 342;
pub const MOSAIC_FRAME_RAW_HEIGHT: usize = 260;
pub const MOSAIC_FRAME_WIDTH: usize = 320;
pub const MOSAIC_FRAME_HEIGHT: usize = 240;

// ============================================================================
// Frame type tags
// ============================================================================

pub const FRAME_TYPE_FSC_CALIBRATION: u16 = 1;
pub const FRAME_TYPE_IMAGE: u16 = 3;
pub const FRAME_TYPE_DP_CALIBRATION: u16 = 4;
pub const FRAME_TYPE_GRADIENT_CALIBRATION: u16 = 6;
pub const FRAME_TYPE_SHARPNESS_CALIBRATION: u16 = 20;
