//! Utilities dealing with error handling in this crate.

use derive_more::From;
use failure::Fail;

/// Closed taxonomy of failures a backend operation can report.
///
/// Every public operation in this crate returns `Result<T>`; `Ok` stands in
/// for the `SUCCESS` status of the source protocol documentation, the
/// variants below cover the remaining terminal states.
#[derive(Debug, Fail, From)]
pub enum Error {
    /// The backend does not implement the requested operation.
    #[fail(display = "Operation not supported by this backend")]
    Unsupported,
    /// The device handle was not produced by the backend that was called.
    #[fail(display = "Device handle does not match the called backend")]
    TypeMismatch,
    /// Generic invalid-argument or invariant violation.
    #[fail(display = "Invalid argument or invariant violation - {}", _0)]
    Invalid(String),
    /// Allocation or buffer-capacity failure.
    #[fail(display = "Memory allocation or buffer-capacity failure")]
    Memory,
    /// Transport-level failure: peer closed, short write, OS error.
    #[fail(display = "IO Error - {}", _0)]
    Io(#[cause] std::io::Error),
    /// Expected response did not arrive within the configured window.
    #[fail(display = "Timed out waiting for a response")]
    Timeout,
    /// Bytes were received but did not match the framing, checksum or
    /// sentinel the backend expected.
    #[fail(display = "Protocol error - {}", _0)]
    Protocol(String),
    /// The cancellation flag was observed during a long-running operation.
    #[fail(display = "Operation cancelled")]
    Cancelled,
}

impl Error {
    /// True if this is one of the two kinds the retry loops in
    /// [`crate::transport`] are allowed to swallow and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Protocol(_))
    }
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
