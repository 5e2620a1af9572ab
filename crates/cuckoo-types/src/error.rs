//! The process-wide error taxonomy.
//!
//! These are kinds, not rich error types: they travel on the wire as `i32`
//! and are stored per item in batch responses, so they have to stay flat.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use thiserror::Error;

/// Error kinds shared by the metadata and data planes.
///
/// `Success` and `FileExists` are success-like for some operations (mkdir on
/// an existing directory still returns a usable response body); everything
/// else is a failure. The numeric values are wire-stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Error, FromPrimitive, ToPrimitive,
)]
#[repr(i32)]
pub enum ErrorCode {
    #[default]
    #[error("success")]
    Success = 0,
    #[error("file exists")]
    FileExists = 1,
    #[error("not found")]
    NotFound = 2,
    #[error("permission denied")]
    PermissionDenied = 3,
    /// Internal invariant violation, SQL failure, or decode failure.
    #[error("program error")]
    ProgramError = 4,
    /// Disk or peer I/O failure.
    #[error("io error")]
    IoError = 5,
    #[error("log initialization failed")]
    InitLogFailed = 6,
    #[error("timed out")]
    Timeout = 7,
}

impl ErrorCode {
    /// True for `Success` and the success-like `FileExists`.
    pub fn is_ok_like(self) -> bool {
        matches!(self, ErrorCode::Success | ErrorCode::FileExists)
    }

    pub fn from_wire(raw: i32) -> ErrorCode {
        ErrorCode::from_i32(raw).unwrap_or(ErrorCode::ProgramError)
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

impl From<std::io::Error> for ErrorCode {
    fn from(err: std::io::Error) -> ErrorCode {
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            std::io::ErrorKind::TimedOut => ErrorCode::Timeout,
            _ => ErrorCode::IoError,
        }
    }
}

#[cfg(test)]
mod test {
    use super::ErrorCode;

    #[test]
    fn wire_round_trip() {
        for code in [
            ErrorCode::Success,
            ErrorCode::FileExists,
            ErrorCode::NotFound,
            ErrorCode::PermissionDenied,
            ErrorCode::ProgramError,
            ErrorCode::IoError,
            ErrorCode::InitLogFailed,
            ErrorCode::Timeout,
        ] {
            assert_eq!(ErrorCode::from_wire(code.to_wire()), code);
        }
        assert_eq!(ErrorCode::from_wire(9999), ErrorCode::ProgramError);
    }

    #[test]
    fn io_error_mapping() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(ErrorCode::from(err), ErrorCode::NotFound);
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert_eq!(ErrorCode::from(err), ErrorCode::IoError);
    }
}
