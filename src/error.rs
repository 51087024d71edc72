//! Error types for the meshcore-link library.

use thiserror::Error;

/// The main error type for meshcore-link operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error (serial or TCP stream).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bluetooth Low Energy error.
    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No device answered at the requested address.
    #[error("no device found: {target}")]
    NoDevice { target: String },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The transport went away while work was outstanding.
    #[error("device disconnected")]
    Disconnected,

    /// Frame encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A well-framed payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The device answered with something other than what was asked for.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The device rejected the command with an error code.
    #[error("device error: {0}")]
    Device(FirmwareErrorCode),

    /// The device rejected the command without an error code (firmware < 1.4).
    #[error("command rejected by device")]
    Rejected,

    /// A request is already waiting for its response.
    #[error("another request is already in flight")]
    Busy,

    /// Command timed out waiting for response.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid coordinates.
    #[error("invalid coordinates: {reason}")]
    InvalidCoordinates { reason: String },
}

impl Error {
    pub(crate) fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub(crate) fn unexpected(what: &str) -> Self {
        Self::Protocol {
            message: format!("unexpected response to {what}"),
        }
    }

    /// Returns true for errors that end the session rather than a single command.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Serial(_)
            | Self::Io(_)
            | Self::NoDevice { .. }
            | Self::NotConnected
            | Self::Disconnected => true,
            #[cfg(feature = "ble")]
            Self::Ble(_) => true,
            _ => false,
        }
    }
}

/// Frame-specific errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame payload exceeds what the u16 length prefix can carry.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Payload decoding errors. These fail a single decode, never the link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload shorter than the fixed layout requires.
    #[error("{what} too short: need {expected} bytes, got {actual}")]
    TooShort {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A field holds a value outside its legal range.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    /// A text field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

/// Error codes carried by the device's error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareErrorCode {
    /// Command not supported.
    UnsupportedCommand,
    /// Contact or item not found.
    NotFound,
    /// Contact table is full.
    TableFull,
    /// Device is in the wrong state for this command.
    BadState,
    /// Flash storage error.
    FileIo,
    /// Illegal argument.
    IllegalArg,
    /// Code this client does not know.
    Unknown(u8),
}

impl FirmwareErrorCode {
    /// Parses an error code byte.
    #[must_use]
    pub const fn from_byte(code: u8) -> Self {
        match code {
            1 => Self::UnsupportedCommand,
            2 => Self::NotFound,
            3 => Self::TableFull,
            4 => Self::BadState,
            5 => Self::FileIo,
            6 => Self::IllegalArg,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw code byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::UnsupportedCommand => 1,
            Self::NotFound => 2,
            Self::TableFull => 3,
            Self::BadState => 4,
            Self::FileIo => 5,
            Self::IllegalArg => 6,
            Self::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for FirmwareErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedCommand => write!(f, "unsupported command"),
            Self::NotFound => write!(f, "not found"),
            Self::TableFull => write!(f, "table full"),
            Self::BadState => write!(f, "bad state"),
            Self::FileIo => write!(f, "file I/O error"),
            Self::IllegalArg => write!(f, "illegal argument"),
            Self::Unknown(code) => write!(f, "unknown error (0x{code:02x})"),
        }
    }
}

/// Result type alias for meshcore-link operations.
pub type Result<T> = std::result::Result<T, Error>;
