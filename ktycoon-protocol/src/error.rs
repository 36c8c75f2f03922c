//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while framing or parsing a response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected opcode: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedMagic { expected: u8, actual: u8 },

    #[error("connection closed by peer with {needed} bytes still expected")]
    ConnectionClosed { needed: usize },

    #[error("field too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown replication operation: {0:#04x}")]
    UnknownOperation(u8),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the stable error code for this failure.
    ///
    /// A lost or timed-out peer is a network condition; everything else means
    /// the peer sent something this client cannot parse.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::ConnectionClosed { .. } | ProtocolError::Io(_) => ErrorCode::Network,
            _ => ErrorCode::Internal,
        }
    }
}

/// Outcome codes recorded after every operation.
///
/// The numeric values are part of the public contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    Unimplemented = 1,
    Invalid = 2,
    Logic = 3,
    Internal = 4,
    Network = 5,
    NotFound = 6,
    Miscellaneous = 255,
}

impl ErrorCode {
    /// A missing record is not a failure.
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Success | ErrorCode::NotFound)
    }

    /// Short upper-case name of the code.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::Invalid => "INVALID",
            ErrorCode::Logic => "LOGIC",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Network => "NETWORK",
            ErrorCode::NotFound => "NOTFOUND",
            ErrorCode::Miscellaneous => "EMISC",
        }
    }

    /// Human-readable description of the code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation Successful",
            ErrorCode::Unimplemented => "Unimplemented Operation",
            ErrorCode::Invalid => "Invalid Operation",
            ErrorCode::Logic => "Logic Error",
            ErrorCode::Internal => "Internal Error",
            ErrorCode::Network => "Network Error",
            ErrorCode::NotFound => "Record Not Found",
            ErrorCode::Miscellaneous => "Miscellaneous Error",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unimplemented),
            2 => Ok(ErrorCode::Invalid),
            3 => Ok(ErrorCode::Logic),
            4 => Ok(ErrorCode::Internal),
            5 => Ok(ErrorCode::Network),
            6 => Ok(ErrorCode::NotFound),
            255 => Ok(ErrorCode::Miscellaneous),
            _ => Err(ProtocolError::Malformed(format!(
                "unknown error code: {}",
                value
            ))),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
