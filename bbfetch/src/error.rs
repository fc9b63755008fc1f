//! Error types for bbfetch.

use std::io;
use thiserror::Error;

use crate::protocol::msp::MspFrame;

/// Result type for bbfetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bbfetch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial link failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// MSP framing or decoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O error (file operations on the mounted volume or output directory).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not available on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A wait exceeded its configured deadline.
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Failures of the physical serial connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Every open attempt failed.
    #[error("Failed to connect to {port} after {attempts} attempts")]
    ConnectFailed {
        /// Port name/path.
        port: String,
        /// Number of attempts made.
        attempts: usize,
    },

    /// The connection was used without being opened.
    #[error("Port {0} is not open")]
    NotOpen(String),

    /// I/O error on the serial line.
    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Failures of the MSP codec and command decoders.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Request does not fit a v1 frame: code 255 is the v2 escape and the
    /// length field is one byte.
    #[error("Request too large for an MSP v1 frame: code {code}, {len} payload bytes")]
    PayloadTooLarge {
        /// Requested command code.
        code: u8,
        /// Payload length.
        len: usize,
    },

    /// The frame did not start with `$M`.
    #[error("Invalid preamble {0:02X?}")]
    InvalidPreamble([u8; 3]),

    /// Checksum byte disagrees with the frame contents.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over length, code and payload.
        expected: u8,
        /// Checksum byte received on the wire.
        actual: u8,
    },

    /// Fewer bytes arrived than the frame requires before the read timeout.
    #[error("Timed out waiting for response frame")]
    Timeout,

    /// The frame was well formed but its payload could not be decoded.
    #[error("Malformed {command} response: {reason}")]
    MalformedResponse {
        /// Name of the command that was sent.
        command: &'static str,
        /// Why decoding failed.
        reason: String,
        /// The frame as received.
        frame: MspFrame,
    },

    /// The decoder produced a reply of a different kind than requested.
    #[error("Unexpected reply to {command}")]
    UnexpectedResponse {
        /// Name of the command that was sent.
        command: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0x0a,
            actual: 0x0b,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0x0a, got 0x0b"
        );
    }

    #[test]
    fn test_connect_failed_display() {
        let err: Error = TransportError::ConnectFailed {
            port: "/dev/ttyACM0".into(),
            attempts: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Failed to connect to /dev/ttyACM0 after 3 attempts"
        );
    }
}
