//! Frame classification and sequence tracking.
//!
//! Every transfer is an array of little-endian u16 words. Word 1 holds the
//! rolling frame counter and word 2 the frame type tag.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::Array2;
use thiserror::Error;

use super::constants::*;
use super::sensor::{ImageRegion, SensorModel};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Calibration frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalibrationKind {
    /// Flat scene (shutter closed) reference.
    Fsc,
    /// Dead pixel map.
    DeadPixel,
    /// Spatial non-uniformity profile.
    Gradient,
    /// Data for the sharpen stage.
    Sharpness,
}

impl CalibrationKind {
    pub const ALL: [CalibrationKind; 4] = [
        CalibrationKind::Fsc,
        CalibrationKind::DeadPixel,
        CalibrationKind::Gradient,
        CalibrationKind::Sharpness,
    ];
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::Fsc => write!(f, "FSC"),
            CalibrationKind::DeadPixel => write!(f, "DeadPixel"),
            CalibrationKind::Gradient => write!(f, "Gradient"),
            CalibrationKind::Sharpness => write!(f, "Sharpness"),
        }
    }
}

/// What a frame carries, derived from its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Calibration(CalibrationKind),
    Image,
    Unknown(u16),
}

impl FrameKind {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            FRAME_TYPE_FSC_CALIBRATION => Self::Calibration(CalibrationKind::Fsc),
            FRAME_TYPE_IMAGE => Self::Image,
            FRAME_TYPE_DP_CALIBRATION => Self::Calibration(CalibrationKind::DeadPixel),
            FRAME_TYPE_GRADIENT_CALIBRATION => Self::Calibration(CalibrationKind::Gradient),
            FRAME_TYPE_SHARPNESS_CALIBRATION => Self::Calibration(CalibrationKind::Sharpness),
            other => Self::Unknown(other),
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            Self::Calibration(CalibrationKind::Fsc) => FRAME_TYPE_FSC_CALIBRATION,
            Self::Calibration(CalibrationKind::DeadPixel) => FRAME_TYPE_DP_CALIBRATION,
            Self::Calibration(CalibrationKind::Gradient) => FRAME_TYPE_GRADIENT_CALIBRATION,
            Self::Calibration(CalibrationKind::Sharpness) => FRAME_TYPE_SHARPNESS_CALIBRATION,
            Self::Image => FRAME_TYPE_IMAGE,
            Self::Unknown(tag) => *tag,
        }
    }
}

/// Fixed-offset header fields of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_count: u16,
    pub frame_type: u16,
}

impl FrameHeader {
    pub const SIZE: usize = FRAME_HEADER_WORDS * FRAME_WORD_SIZE;

    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::SIZE {
            return Err(FrameError::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let mut words = [0u16; FRAME_HEADER_WORDS];
        cursor.read_u16_into::<LittleEndian>(&mut words)?;
        let frame_count = words[FRAME_COUNT_INDEX];
        let frame_type = words[FRAME_TYPE_INDEX];
        Ok(Self {
            frame_count,
            frame_type,
        })
    }

    pub fn kind(&self) -> FrameKind {
        FrameKind::from_tag(self.frame_type)
    }
}

/// One decoded transfer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    header: FrameHeader,
    words: Vec<u16>,
    width: usize,
    height: usize,
}

impl RawFrame {
    /// Decode and classify a transfer for the given sensor. The length must
    /// match the sensor's frame size exactly.
    pub fn decode(data: &[u8], model: SensorModel) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(data)?;
        let expected = model.frame_bytes();
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        let mut words = vec![0u16; model.frame_words()];
        let mut cursor = Cursor::new(data);
        cursor.read_u16_into::<LittleEndian>(&mut words)?;

        let (width, height) = model.raw_dimensions();
        Ok(Self {
            header,
            words,
            width,
            height,
        })
    }

    pub fn header(&self) -> FrameHeader {
        self.header
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Copy the image region out as a (rows, cols) matrix.
    pub fn region(&self, roi: ImageRegion) -> Array2<u16> {
        Array2::from_shape_fn((roi.height, roi.width), |(row, col)| {
            self.words[(roi.y + row) * self.width + roi.x + col]
        })
    }
}

/// How a frame counter relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// First frame of the session.
    First,
    /// Counter moved forward.
    Advanced,
    /// Counter moved forward across the u16 boundary.
    Wrapped,
    /// Counter jumped backwards (or repeated): device reset or glitch.
    Backwards,
}

/// Largest forward distance across the u16 rollover still read as a wrap.
/// Any other decrease is a reset.
const WRAP_WINDOW: u16 = 1024;

/// Extends the device's u16 counter into a monotonic u64 sequence.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    last: Option<u16>,
    sequence: u64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next counter value, returning the extended sequence number.
    pub fn observe(&mut self, frame_count: u16) -> (u64, SequenceStep) {
        let step = match self.last {
            None => {
                self.sequence = frame_count as u64;
                SequenceStep::First
            }
            Some(last) => {
                let forward = frame_count.wrapping_sub(last);
                if frame_count > last {
                    self.sequence += forward as u64;
                    SequenceStep::Advanced
                } else if frame_count < last && forward <= WRAP_WINDOW {
                    self.sequence += forward as u64;
                    SequenceStep::Wrapped
                } else {
                    self.sequence += 1;
                    SequenceStep::Backwards
                }
            }
        };
        self.last = Some(frame_count);
        (self.sequence, step)
    }

    pub fn last_count(&self) -> Option<u16> {
        self.last
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a raw frame with the given header and a constant pixel value.
    pub(crate) fn frame_bytes(model: SensorModel, count: u16, tag: u16, fill: u16) -> Vec<u8> {
        let mut words = vec![fill; model.frame_words()];
        words[0] = 0;
        words[FRAME_COUNT_INDEX] = count;
        words[FRAME_TYPE_INDEX] = tag;
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_header_offsets() {
        let bytes = [0xAA, 0xBB, 0x34, 0x12, 0x03, 0x00];
        let header = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(header.frame_count, 0x1234);
        assert_eq!(header.frame_type, 3);
        assert_eq!(header.kind(), FrameKind::Image);
    }

    #[test]
    fn test_malformed_headers_do_not_panic() {
        for len in 0..FrameHeader::SIZE {
            let bytes = vec![0xFFu8; len];
            assert!(matches!(
                FrameHeader::parse(&bytes),
                Err(FrameError::Truncated { .. })
            ));
        }
        let short = frame_bytes(SensorModel::S104SP, 1, 3, 0);
        let err = RawFrame::decode(&short[..short.len() - 1], SensorModel::S104SP).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn test_frame_kind_tags() {
        assert_eq!(
            FrameKind::from_tag(1),
            FrameKind::Calibration(CalibrationKind::Fsc)
        );
        assert_eq!(
            FrameKind::from_tag(4),
            FrameKind::Calibration(CalibrationKind::DeadPixel)
        );
        assert_eq!(
            FrameKind::from_tag(6),
            FrameKind::Calibration(CalibrationKind::Gradient)
        );
        assert_eq!(
            FrameKind::from_tag(20),
            FrameKind::Calibration(CalibrationKind::Sharpness)
        );
        assert_eq!(FrameKind::from_tag(9), FrameKind::Unknown(9));
        for tag in [1u16, 3, 4, 6, 20, 77] {
            assert_eq!(FrameKind::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn test_decode_region() {
        let bytes = frame_bytes(SensorModel::S104SP, 7, 3, 500);
        let frame = RawFrame::decode(&bytes, SensorModel::S104SP).unwrap();
        assert_eq!(frame.header().frame_count, 7);
        let roi = SensorModel::S104SP.image_region();
        let pixels = frame.region(roi);
        assert_eq!(pixels.dim(), (roi.height, roi.width));
        assert!(pixels.iter().all(|&p| p == 500));
    }

    #[test]
    fn test_sequencer_wraparound_and_reset() {
        let mut seq = FrameSequencer::new();
        assert_eq!(seq.observe(0xFFFE), (0xFFFE, SequenceStep::First));
        assert_eq!(seq.observe(0xFFFF), (0xFFFF, SequenceStep::Advanced));
        assert_eq!(seq.observe(0x0001), (0x10001, SequenceStep::Wrapped));

        let (n, step) = seq.observe(0x0000);
        assert_eq!(step, SequenceStep::Backwards);
        assert_eq!(n, 0x10002);
        let (m, step) = seq.observe(0x0001);
        assert_eq!(step, SequenceStep::Advanced);
        assert!(m > n);
    }

    #[test]
    fn test_sequencer_large_drop_is_reset() {
        let mut seq = FrameSequencer::new();
        seq.observe(40000);
        assert_eq!(seq.observe(3), (40001, SequenceStep::Backwards));
        assert_eq!(seq.observe(10), (40008, SequenceStep::Advanced));

        // Just inside the window from the top of the counter.
        let mut seq = FrameSequencer::new();
        seq.observe(0xFC00);
        assert_eq!(seq.observe(0), (0x10000, SequenceStep::Wrapped));
    }
}
