//! Driver state machine and handshake.

pub mod handshake;
pub mod machine;

pub use handshake::{HandshakeError, HandshakeReport, HandshakeStep, run_handshake};
pub use machine::{DriverState, InvalidTransition, StateMachine};
