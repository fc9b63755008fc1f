//! Typed MSP commands and their response payloads.
//!
//! Commands are pure values: they know their code, how to build their
//! request payload and how to decode a reply payload. Sending them is the
//! job of [`crate::connection::Connection`].

use {
    crate::{
        error::ProtocolError,
        protocol::msp::{self, MspFrame},
    },
    byteorder::{LittleEndian, ReadBytesExt},
    std::{fmt, io::Cursor},
};

/// Default little-endian width of a multi-byte request parameter.
pub const DEFAULT_VALUE_WIDTH: usize = 2;

/// Reboot mode selecting USB mass-storage on Betaflight-family firmware.
pub const REBOOT_MODE_MSC: u8 = 2;

/// MSP command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    /// MSP_API_VERSION (1).
    ApiVersion = 1,
    /// MSP_FC_VARIANT (2).
    FcVariant = 2,
    /// MSP_SET_REBOOT (68).
    SetReboot = 68,
    /// MSP_DATAFLASH_SUMMARY (70).
    DataflashSummary = 70,
    /// MSP_DATAFLASH_ERASE (72).
    DataflashErase = 72,
}

/// A logical request parameter before byte expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// A value that always occupies exactly one byte.
    Byte(u8),
    /// A multi-byte value, expanded to the request's value width.
    Value(u32),
}

/// Expand logical parameters into request payload bytes.
///
/// `Param::Value` is written little-endian using `width` bytes; higher bytes
/// beyond `width` are dropped.
pub fn expand_params(params: &[Param], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len() * width);
    for param in params {
        match *param {
            Param::Byte(b) => out.push(b),
            Param::Value(v) => {
                let bytes = u64::from(v).to_le_bytes();
                out.extend((0..width).map(|i| bytes.get(i).copied().unwrap_or(0)));
            },
        }
    }
    out
}

/// The closed set of commands this tool speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Query protocol and API version.
    ApiVersion,
    /// Query the four-letter firmware identifier (e.g. `BTFL`).
    FcVariant,
    /// Reboot the board into USB mass-storage mode.
    RebootToMassStorage,
    /// Query onboard flash state and usage.
    DataflashSummary,
    /// Start erasing the onboard flash.
    DataflashErase,
}

impl Command {
    /// Wire code of this command.
    pub fn code(self) -> CommandCode {
        match self {
            Self::ApiVersion => CommandCode::ApiVersion,
            Self::FcVariant => CommandCode::FcVariant,
            Self::RebootToMassStorage => CommandCode::SetReboot,
            Self::DataflashSummary => CommandCode::DataflashSummary,
            Self::DataflashErase => CommandCode::DataflashErase,
        }
    }

    /// Human-readable command name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::ApiVersion => "MSP_API_VERSION",
            Self::FcVariant => "MSP_FC_VARIANT",
            Self::RebootToMassStorage => "MSP_SET_REBOOT",
            Self::DataflashSummary => "MSP_DATAFLASH_SUMMARY",
            Self::DataflashErase => "MSP_DATAFLASH_ERASE",
        }
    }

    /// Whether the caller needs the decoded reply.
    ///
    /// Fire-and-forget commands may still be acknowledged by the board, but a
    /// missing or broken acknowledgement is not an error.
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            Self::ApiVersion | Self::FcVariant | Self::DataflashSummary
        )
    }

    /// Logical request parameters.
    pub fn params(self) -> Vec<Param> {
        match self {
            Self::RebootToMassStorage => vec![Param::Byte(REBOOT_MODE_MSC)],
            Self::ApiVersion | Self::FcVariant | Self::DataflashSummary | Self::DataflashErase => {
                Vec::new()
            },
        }
    }

    /// Request payload bytes.
    pub fn request_payload(self) -> Vec<u8> {
        expand_params(&self.params(), DEFAULT_VALUE_WIDTH)
    }

    /// Build the request frame.
    pub fn encode(self) -> Result<MspFrame, ProtocolError> {
        msp::encode_request(self.code() as u8, &self.request_payload())
    }

    /// Decode a reply payload into a typed response.
    ///
    /// Returns `Ok(None)` for commands that carry no reply data.
    pub fn decode(self, payload: &[u8]) -> Result<Option<Response>, DecodeError> {
        let response = match self {
            Self::ApiVersion => Response::ApiVersion(ApiVersion::decode(payload)?),
            Self::FcVariant => Response::FcVariant(FcVariant::decode(payload)?),
            Self::DataflashSummary => {
                Response::DataflashSummary(DataflashSummary::decode(payload)?)
            },
            Self::RebootToMassStorage | Self::DataflashErase => return Ok(None),
        };
        Ok(Some(response))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a reply payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload shorter than the fixed layout.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum layout size.
        expected: usize,
        /// Received size.
        actual: usize,
    },
    /// Identifier bytes are not printable ASCII.
    #[error("identifier is not ASCII: {0:02X?}")]
    NotAscii(Vec<u8>),
}

fn require_len(payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Decoded reply of a command that expects one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Response {
    /// Reply to [`Command::ApiVersion`].
    ApiVersion(ApiVersion),
    /// Reply to [`Command::FcVariant`].
    FcVariant(FcVariant),
    /// Reply to [`Command::DataflashSummary`].
    DataflashSummary(DataflashSummary),
}

/// MSP_API_VERSION reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ApiVersion {
    /// MSP protocol version.
    pub protocol_version: u8,
    /// API version as `"major.minor"`.
    pub api_version: String,
}

impl ApiVersion {
    const LEN: usize = 3;

    /// Decode from a reply payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        require_len(payload, Self::LEN)?;
        Ok(Self {
            protocol_version: payload[0],
            api_version: format!("{}.{}", payload[1], payload[2]),
        })
    }
}

/// MSP_FC_VARIANT reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FcVariant {
    /// Four-letter firmware identifier.
    pub variant: String,
}

impl FcVariant {
    const LEN: usize = 4;

    /// Decode from a reply payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        require_len(payload, Self::LEN)?;
        let raw = &payload[..Self::LEN];
        if !raw.is_ascii() {
            return Err(DecodeError::NotAscii(raw.to_vec()));
        }
        Ok(Self {
            variant: raw.iter().copied().map(char::from).collect(),
        })
    }
}

/// MSP_DATAFLASH_SUMMARY reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataflashSummary {
    /// Flash is idle (not mid-erase).
    pub ready: bool,
    /// Board has dataflash at all.
    pub supported: bool,
    /// Number of flash sectors.
    pub sectors: u32,
    /// Total flash size in bytes.
    pub total_size: u32,
    /// Bytes used by logs.
    pub used_size: u32,
}

impl DataflashSummary {
    const LEN: usize = 13;

    /// Decode from a reply payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        require_len(payload, Self::LEN)?;
        let mut cursor = Cursor::new(payload);
        let too_short = |_| DecodeError::TooShort {
            expected: Self::LEN,
            actual: payload.len(),
        };
        let flags = cursor.read_u8().map_err(too_short)?;
        let sectors = cursor.read_u32::<LittleEndian>().map_err(too_short)?;
        let total_size = cursor.read_u32::<LittleEndian>().map_err(too_short)?;
        let used_size = cursor.read_u32::<LittleEndian>().map_err(too_short)?;

        Ok(Self {
            ready: flags & 1 != 0,
            supported: flags & 2 != 0,
            sectors,
            total_size,
            used_size,
        })
    }

    /// Used space as an integer percentage of total.
    #[allow(clippy::cast_possible_truncation)] // Clamped to 100
    pub fn usage_percent(&self) -> u8 {
        if self.total_size == 0 {
            return 0;
        }
        let percent = u64::from(self.used_size) * 100 / u64::from(self.total_size);
        percent.min(100) as u8
    }
}
