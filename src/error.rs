//! Error taxonomy for the tracker core.
//! Command rejections are returned synchronously; session failures are carried
//! inside the connection phase and surfaced through state snapshots.

use serde::Serialize;
use thiserror::Error;

/// Synchronous rejection of a command. Prior state is left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No Bluetooth adapter exists on this machine.
    #[error("no Bluetooth adapter found")]
    AdapterUnavailable,
    /// An adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterDisabled,
    /// Location services are off; discovery requires them on some platforms.
    #[error("location services are disabled")]
    PreconditionUnmet,
    /// The caller has not obtained the required Bluetooth permissions.
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,
    /// The requested peripheral is not in the discovered set.
    #[error("device not found with ID: {0}")]
    UnknownPeripheral(String),
}

/// Terminal failure of a connection attempt, carried in
/// [`ConnectionPhase::Error`](crate::core::bluetooth::ConnectionPhase::Error).
///
/// These are never thrown across the async boundary; the session parks in the
/// error phase until the caller issues a new connect.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionErrorKind {
    #[error("failed to connect to device")]
    ConnectFailed,
    #[error("tracker service not found on device")]
    ServiceNotFound,
    #[error("track characteristic not found in service")]
    CharacteristicNotFound,
    #[error("failed to enable notifications")]
    NotificationArmFailed,
    #[error("connection to device was lost")]
    LinkLost,
}

/// Failure to decode a single notification frame.
///
/// Decode errors are local to one frame: they are counted and logged, and the
/// stream continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload was not valid UTF-8.
    #[error("notification payload is not valid UTF-8")]
    Encoding,
    /// The payload text did not carry two parseable coordinate fields.
    #[error("malformed coordinate frame: {0}")]
    Malformed(String),
}
