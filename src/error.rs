//! The error taxonomy described in spec §7.
//!
//! [`Error::TryAgain`] is the one internal-only kind: the exchange engine
//! uses it to signal "restart the request loop" after absorbing a
//! redirect or reverting a stale connection, and it must never escape
//! [`crate::transport::exchange`] to a caller.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A malformed URL, an out-of-range numeric flag, or an unknown CLI flag.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Specifically a malformed mount URL (spec §6 exit code `2`, distinct
    /// from a bad flag/value's exit code `4`).
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The origin responded `404`.
    #[error("not found")]
    NotFound,

    /// A non-read-only open, or a CA file that could not be read.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Connect/DNS/TLS failure, malformed header, unexpected status,
    /// truncated body after retries, cache I/O failure, or a digest
    /// mismatch that persisted across the single allowed retry.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal signal: restart the exchange loop. Never returned to a caller.
    #[error("internal: retry requested")]
    TryAgain,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::PermissionDenied => Error::Permission(err.to_string()),
            _ => Error::Io(err.to_string()),
        }
    }
}

impl Error {
    /// The exit code `spec.md` §6 assigns to a failure of this kind when it
    /// surfaces from the CLI's startup path (`0` is reserved for success
    /// and is never produced here).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => 4,
            Error::InvalidUrl(_) => 2,
            Error::NotFound => 3,
            Error::Permission(_) => 5,
            Error::Io(_) => 3,
            Error::TryAgain => {
                unreachable!("Error::TryAgain must be handled inside the exchange engine")
            }
        }
    }
}
