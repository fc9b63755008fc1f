//! MSP v1 frame codec.
//!
//! Every request and response on the wire uses the same frame shape:
//!
//! ```text
//! +----------+--------+------+---------------+----------+
//! | Preamble | Length | Code |    Payload    | Checksum |
//! +----------+--------+------+---------------+----------+
//! | 3 bytes  | 1 byte | 1    | Length bytes  | 1 byte   |
//! +----------+--------+------+---------------+----------+
//! | "$M<"    |  len   | cmd  |    data       | XOR      |
//! +----------+--------+------+---------------+----------+
//! ```
//!
//! The checksum is the XOR of the length byte, the code byte and every
//! payload byte. The third preamble byte is the direction: `<` for requests,
//! `>` for replies and `!` for replies reporting an error.

use {
    crate::error::{ProtocolError, Result, TransportError},
    log::trace,
    std::io::{self, Read},
};

/// First two preamble bytes shared by every frame.
pub const PREAMBLE_PREFIX: [u8; 2] = *b"$M";

/// Direction byte of a request (host to board).
pub const DIRECTION_REQUEST: u8 = b'<';

/// Direction byte of a reply (board to host).
pub const DIRECTION_REPLY: u8 = b'>';

/// Direction byte of a reply reporting an unsupported or failed command.
pub const DIRECTION_ERROR: u8 = b'!';

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Frame overhead: preamble(3) + length(1) + code(1) + checksum(1).
pub const FRAME_OVERHEAD: usize = 6;

/// XOR-fold of the length byte, code byte and payload.
pub fn checksum(length: u8, code: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(length ^ code, |acc, b| acc ^ b)
}

/// A single MSP v1 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspFrame {
    direction: u8,
    code: u8,
    payload: Vec<u8>,
    checksum: u8,
}

impl MspFrame {
    /// Direction byte (third preamble byte).
    pub fn direction(&self) -> u8 {
        self.direction
    }

    /// Full three-byte preamble.
    pub fn preamble(&self) -> [u8; 3] {
        [PREAMBLE_PREFIX[0], PREAMBLE_PREFIX[1], self.direction]
    }

    /// Command code.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Payload length as carried in the length byte.
    #[allow(clippy::cast_possible_truncation)] // Bounded by MAX_PAYLOAD_LEN on construction
    pub fn length(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum byte.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Whether the board flagged this reply as an error.
    pub fn is_error(&self) -> bool {
        self.direction == DIRECTION_ERROR
    }

    /// Serialize the frame to its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&self.preamble());
        buf.push(self.length());
        buf.push(self.code);
        buf.extend_from_slice(&self.payload);
        buf.push(self.checksum);
        buf
    }
}

/// Build a request frame for `code` carrying `payload`.
pub fn encode_request(code: u8, payload: &[u8]) -> std::result::Result<MspFrame, ProtocolError> {
    let too_large = || ProtocolError::PayloadTooLarge {
        code,
        len: payload.len(),
    };
    if code == u8::MAX {
        return Err(too_large());
    }
    let length = u8::try_from(payload.len()).map_err(|_| too_large())?;

    Ok(MspFrame {
        direction: DIRECTION_REQUEST,
        code,
        payload: payload.to_vec(),
        checksum: checksum(length, code, payload),
    })
}

/// Read one frame from `reader`, field by field.
///
/// Each read may block for up to the port timeout. A short read yields
/// [`ProtocolError::Timeout`]; a checksum disagreement yields
/// [`ProtocolError::ChecksumMismatch`].
pub fn decode_response<R: Read + ?Sized>(reader: &mut R) -> Result<MspFrame> {
    let mut preamble = [0u8; 3];
    read_field(reader, &mut preamble)?;
    if preamble[..2] != PREAMBLE_PREFIX {
        return Err(ProtocolError::InvalidPreamble(preamble).into());
    }

    let mut header = [0u8; 2];
    read_field(reader, &mut header)?;
    let [length, code] = header;

    let mut payload = vec![0u8; usize::from(length)];
    read_field(reader, &mut payload)?;

    let mut trailer = [0u8; 1];
    read_field(reader, &mut trailer)?;
    let actual = trailer[0];

    let expected = checksum(length, code, &payload);
    if expected != actual {
        trace!("Checksum mismatch on frame code {code}: {payload:02X?}");
        return Err(ProtocolError::ChecksumMismatch { expected, actual }.into());
    }

    trace!(
        "Received frame {}{} code {code}, {length} bytes",
        char::from(preamble[2]),
        if preamble[2] == DIRECTION_ERROR { " (error)" } else { "" }
    );

    Ok(MspFrame {
        direction: preamble[2],
        code,
        payload,
        checksum: actual,
    })
}

fn read_field<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof | io::ErrorKind::WouldBlock
        ) =>
        {
            Err(ProtocolError::Timeout.into())
        },
        Err(e) => Err(TransportError::Io(e).into()),
    }
}
