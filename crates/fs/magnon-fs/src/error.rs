//! Volume error type.

use core::fmt;

use magnon_driver_api::block::IoError;

/// Errors surfaced by volume operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The underlying device read or write failed.
    Io(IoError),
    /// Message payload length out of range.
    InvalidSize,
    /// An argument was rejected before reaching the media (bad geometry,
    /// undersized buffer, erase/update id out of range).
    InvalidArgument,
    /// The requested message id has not been written.
    NotFound,
    /// The device is exhausted and rotation is disabled.
    DeviceFull,
    /// The boot sector magic does not match and no format was requested.
    NotFormatted,
    /// The volume mutex could not be acquired within the bounded wait.
    Busy,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "device I/O failed: {err}"),
            Self::InvalidSize => f.write_str("message size out of range"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NotFound => f.write_str("message not found"),
            Self::DeviceFull => f.write_str("device full"),
            Self::NotFormatted => f.write_str("device not formatted"),
            Self::Busy => f.write_str("volume busy"),
        }
    }
}

impl From<IoError> for FsError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
