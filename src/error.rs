//! Typed error taxonomy for the daemon.
//!
//! Every fallible boundary in this crate returns [`DaemonError`] rather than
//! a stringly-typed failure. `anyhow` is reserved for `main`'s top-level
//! startup sequence, where we only need to attach context and produce an
//! exit code; the transport, sensor, control, and IPC modules never use it
//! internally so match arms downstream stay exhaustive.

use std::fmt;

/// The closed set of ways this daemon can fail.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The EC did not clear/set the expected status flag within the bounded
    /// spin (100 one-millisecond polls).
    #[error("EC handshake timed out waiting for {flag} on register 0x{register:02x}")]
    EcTimeout { register: u8, flag: EcFlag },

    /// The bulk memory-image read returned fewer than 256 bytes, or failed
    /// outright.
    #[error("EC bulk image read returned {got} of {expected} expected bytes")]
    EcShortRead { expected: usize, got: usize },

    /// A value supplied by a config file, CLI flag, or IPC client fell
    /// outside its documented range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Raw I/O privilege acquisition failed.
    #[error("failed to acquire raw I/O privilege: {0}")]
    PrivilegeDenied(String),

    /// Another instance already holds the single-instance lock.
    #[error("another instance of ecfand is already running ({0})")]
    AlreadyRunning(String),

    /// The IPC transport itself failed (bind, accept, or a malformed frame).
    #[error("IPC error: {0}")]
    IpcError(String),

    /// An invariant that must be impossible by construction was violated.
    /// Seeing this means the daemon aborts with a diagnostic rather than
    /// limping on with a corrupted controller state.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Which EC status-port flag a handshake step was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcFlag {
    /// Bit 1, input-buffer-full. Expected to read 0 before we send a byte.
    InputBufferFull,
    /// Bit 0, output-buffer-full. Expected to read 1 before we read a byte.
    OutputBufferFull,
}

impl fmt::Display for EcFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcFlag::InputBufferFull => write!(f, "IBF=0"),
            EcFlag::OutputBufferFull => write!(f, "OBF=1"),
        }
    }
}

impl DaemonError {
    /// A short, stable key used to rate-limit repeated log lines for the
    /// same underlying cause (see [`crate::logging::RateLimiter`]).
    pub fn rate_limit_key(&self) -> String {
        match self {
            DaemonError::EcTimeout { register, .. } => format!("ec_timeout:{register:02x}"),
            DaemonError::EcShortRead { .. } => "ec_short_read".to_string(),
            DaemonError::InvalidArgument(_) => "invalid_argument".to_string(),
            DaemonError::PrivilegeDenied(_) => "privilege_denied".to_string(),
            DaemonError::AlreadyRunning(_) => "already_running".to_string(),
            DaemonError::IpcError(_) => "ipc_error".to_string(),
            DaemonError::Internal(_) => "internal".to_string(),
        }
    }
}
