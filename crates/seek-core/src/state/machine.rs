//! Driver lifecycle state machine.

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Lifecycle of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    Uninitialized,
    /// Running the six-step initialization sequence.
    Handshaking,
    /// Handshake done, acquisition not yet started.
    Ready,
    /// Acquisition loop running.
    Streaming,
    /// Terminal. The device handle has been released.
    Disconnected,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Uninitialized => write!(f, "UNINITIALIZED"),
            DriverState::Handshaking => write!(f, "HANDSHAKING"),
            DriverState::Ready => write!(f, "READY"),
            DriverState::Streaming => write!(f, "STREAMING"),
            DriverState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

impl DriverState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: DriverState) -> bool {
        use DriverState::*;
        matches!(
            (*self, next),
            (Uninitialized, Handshaking)
                | (Uninitialized, Disconnected)
                | (Handshaking, Ready)
                | (Handshaking, Disconnected)
                | (Ready, Streaming)
                | (Ready, Disconnected)
                | (Streaming, Disconnected)
        )
    }

    /// Frames may be requested in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, DriverState::Ready | DriverState::Streaming)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DriverState,
    pub to: DriverState,
}

/// Shared, lock-guarded driver state. Cloning gives another handle to the
/// same state.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: Arc<Mutex<DriverState>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> DriverState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `next`, returning the previous state. Fails without changing
    /// anything if the transition is not allowed, which makes a second
    /// teardown to `Disconnected` a no-op for the caller.
    pub fn goto(&self, next: DriverState) -> Result<DriverState, InvalidTransition> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        tracing::info!(from = %from, to = %next, "State transition");
        *state = next;
        Ok(from)
    }
}
