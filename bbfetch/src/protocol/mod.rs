//! MSP protocol implementation.

pub mod command;
pub mod msp;

// Re-export common types
pub use command::{
    ApiVersion, Command, CommandCode, DataflashSummary, DecodeError, FcVariant, Param, Response,
};
pub use msp::{MspFrame, checksum, decode_response, encode_request};
