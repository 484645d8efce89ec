use std::fmt::{self, Display};

/// Result type used across the Xacto crates.
pub type CResult<T> = std::result::Result<T, Error>;

/// Errors surfaced by the protocol and session layers.
///
/// Transaction aborts are deliberately not represented here: store and
/// transaction operations report their outcome as a [`Status`], so that a
/// session can short-circuit cleanly instead of unwinding. Fatal misuse of
/// the transaction manager (aborting a committed transaction, committing
/// twice) panics with a diagnostic rather than returning a value.
///
/// [`Status`]: crate::transaction::Status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A socket read or write failed, including EOF in the middle of a
    /// packet and a connection shut down by the server.
    Io(String),

    /// A packet that cannot be decoded: unknown type or status code, or an
    /// oversized payload length.
    InvalidData(String),

    /// An unexpected internal condition.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "io error: {}", msg),
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
