// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by rabuf operations.
//!
//! Two families of failures exist and are deliberately kept apart:
//!
//! - **Recoverable errors** (`Error`): bad read parameters, raw-read hook
//!   failures, reads refused during shutdown. The caller may retry.
//! - **Protocol violations** (double notify, double wait, unbalanced close):
//!   programmer misuse, not runtime faults. These panic with a
//!   `"protocol violation: ..."` message instead of returning `Err`.

/// Errors returned by rabuf operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid read parameters (zero-length request, out-of-range position
    /// on a non-circular source).
    Config(String),
    /// Raw-read hook failure. Code and message are propagated verbatim from
    /// the data source.
    Io {
        /// Source-specific error code (OS errno where available).
        code: i32,
        /// Human-readable failure description.
        message: String,
    },
    /// I/O error from a concrete source's open/close/size path.
    IoError(std::io::Error),
    /// The buffer is being destroyed; no new reads are accepted and queued
    /// reads are abandoned.
    ShuttingDown,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io { code, message } => write!(f, "I/O error {}: {}", code, message),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ShuttingDown => write!(f, "buffer is shutting down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

/// Result type for rabuf operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_config() {
        let err = Error::Config("zero-length read".into());
        assert_eq!(err.to_string(), "configuration error: zero-length read");
    }

    #[test]
    fn test_display_io_carries_code_and_message() {
        let err = Error::Io {
            code: 5,
            message: "device timeout".into(),
        };
        assert_eq!(err.to_string(), "I/O error 5: device timeout");
    }

    #[test]
    fn test_io_error_source_chain() {
        use std::error::Error as _;
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::IoError(inner);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_std_io_error() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = inner.into();
        assert!(matches!(err, Error::IoError(_)));
    }
}
