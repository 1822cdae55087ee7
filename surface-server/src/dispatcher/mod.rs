//! Command Dispatcher (spec §4.8): owns the four inbound TCP channels and
//! the inference-channel lifecycle state machine.

pub mod birdrisk;
pub mod controller;
pub mod inference;
pub mod pilot;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] crate::wire::Error),
    #[error(transparent)]
    Repository(#[from] crate::repository::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Inference-channel lifecycle (spec §4.8): only in `Operating` are
/// `object_detected` events acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceState {
    Disconnected,
    Connected,
    CalibratingA,
    CalibratingB,
    Operating,
}

/// Implicit per-command handling timeout (spec §5).
pub const COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
