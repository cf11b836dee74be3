//! Calibration frame accumulation.
//!
//! The store keeps the most recent payload of each calibration kind. Readers
//! take an `Arc` snapshot, so a correction in progress never sees a half
//! replaced set while the acquisition loop keeps recording.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::Array2;
use tracing::{debug, info};

use crate::protocol::CalibrationKind;

/// Image-region pixels of one calibration frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPayload {
    pub frame_count: u16,
    pub pixels: Array2<u16>,
}

/// Immutable set of calibration payloads keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct CalibrationSet {
    payloads: BTreeMap<CalibrationKind, Arc<CalibrationPayload>>,
}

impl CalibrationSet {
    pub fn get(&self, kind: CalibrationKind) -> Option<&CalibrationPayload> {
        self.payloads.get(&kind).map(|p| p.as_ref())
    }

    pub fn contains(&self, kind: CalibrationKind) -> bool {
        self.payloads.contains_key(&kind)
    }

    /// All four kinds have been recorded.
    pub fn is_complete(&self) -> bool {
        CalibrationKind::ALL.iter().all(|k| self.contains(*k))
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Owned accumulator for calibration frames.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    current: Arc<CalibrationSet>,
    ready: bool,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the payload for `kind`. Returns true when this call made the
    /// store ready.
    pub fn record(&mut self, kind: CalibrationKind, payload: CalibrationPayload) -> bool {
        debug!(kind = %kind, frame_count = payload.frame_count, "Recording calibration frame");

        // Copy-on-write: existing snapshots keep the previous set.
        let mut next = (*self.current).clone();
        next.payloads.insert(kind, Arc::new(payload));
        self.current = Arc::new(next);

        if !self.ready && self.current.is_complete() {
            self.ready = true;
            info!("Calibration complete");
            return true;
        }
        false
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Consistent view of the current calibration.
    pub fn snapshot(&self) -> Arc<CalibrationSet> {
        Arc::clone(&self.current)
    }

    /// Drop everything recorded so far. Used when the device restarts its
    /// calibration sequence.
    pub fn rearm(&mut self) {
        info!("Calibration re-armed");
        self.current = Arc::new(CalibrationSet::default());
        self.ready = false;
    }
}
