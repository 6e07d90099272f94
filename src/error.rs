//! Failure taxonomy for the pod daemon.
//!
//! Device I/O failures ([`IoFailure`]) are fatal to the individual device but
//! never to the daemon: they mark the record for removal and the poll loop
//! carries on. Only transport initialization and the open of an explicitly
//! configured device path are process-fatal.

use thiserror::Error;

/// Classified failure of a single device I/O exchange.
///
/// Every variant transitions the device to pending removal; none is retried
/// within the same tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoFailure {
    /// The command frame was not fully transmitted.
    #[error("hid write failed: {0}")]
    WriteFailed(String),

    /// The bounded-timeout read elapsed with no data.
    #[error("hid read timeout")]
    ReadTimeout,

    /// The read produced data of the wrong length.
    #[error("short hid read: got {got} expected {expected}")]
    ShortRead { got: usize, expected: usize },

    /// The transport reported a read error.
    #[error("hid read failed: {0}")]
    TransportError(String),
}

/// Error raised by a user handler.
///
/// The dispatcher logs these with the handler identity and device path; they
/// never propagate into the poll loop.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}

/// Top-level error type for daemon operations.
#[derive(Debug, Error)]
pub enum PodError {
    /// The HID transport subsystem could not be initialized.
    #[error("failed to initialize hid transport: {0}")]
    TransportInit(String),

    /// A device could not be opened. Fatal for an explicitly configured
    /// startup path; scan candidates are logged and skipped instead.
    #[error("failed to open device {path}: {reason}")]
    Open { path: String, reason: String },

    /// A record with this path is already tracked. The scanner's
    /// contains-check makes this unreachable in normal operation.
    #[error("device already tracked: {0}")]
    DuplicatePath(String),

    /// No record with this path is tracked.
    #[error("device not tracked: {0}")]
    NotFound(String),

    /// More payload bytes than a command frame can carry.
    #[error("command payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// The record is pending removal and refuses new commands.
    #[error("device {0} is pending removal")]
    Detached(String),

    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// A device I/O exchange failed.
    #[error(transparent)]
    Io(#[from] IoFailure),
}
