//! Error classification shared by the fetch, storage and sync layers.

use std::fmt;

/// What went wrong, independent of which layer noticed.
///
/// `InvalidCredential` and `NotFound` are passed through untouched so the
/// embedding application can react (for example by forcing a new login).
/// `Storage` means the local store can no longer be trusted; whether that
/// ends the process is the application's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure, timeout, rate limiting or an unexpected HTTP status
    Network,
    /// The remote rejected the API key
    InvalidCredential,
    /// The remote reports the account or resource missing
    NotFound,
    /// Malformed payload from the remote
    Decode,
    /// Schema, connection or transaction failure in the local store
    Storage,
    /// The caller cancelled the update before its merge began
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Decode => "decode",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
