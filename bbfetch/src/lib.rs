//! # bbfetch
//!
//! A library for fetching blackbox flight logs from flight controllers.
//!
//! This crate talks to a flight controller over its USB serial port using
//! MSP v1 framing, reboots it into USB mass-storage mode, copies the blackbox
//! logs off the exposed volume and erases the onboard flash once the board is
//! back on the serial bus. It provides:
//!
//! - MSP v1 frame encoding/decoding with XOR checksum validation
//! - A typed catalog of the MSP commands involved
//! - A serial connection with bounded open retries and per-direction locks
//! - Device and mounted-volume discovery behind a platform trait
//! - A cancellable workflow that reports progress to an observer
//!
//! ## Supported Platforms
//!
//! - **Linux**: serial ports via `serialport`, volumes via
//!   `/dev/disk/by-label` and `/proc/self/mounts`
//! - **macOS**: serial ports via `serialport`, volumes under `/Volumes`
//! - **Windows**: serial ports via `serialport`, volume labels of the drive
//!   letters via `GetVolumeInformationW`
//! - **Other**: serial ports only; volume discovery reports
//!   [`Error::Unsupported`]
//!
//! ## Features
//!
//! - `native` (default): Native serial port and volume support
//! - `serde`: Serialization support for decoded data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bbfetch::{Board, CancelToken, Inventory, NativeOpener, NativePlatform};
//!
//! fn main() -> bbfetch::Result<()> {
//!     let inventory = Inventory::new(Arc::new(NativePlatform), Arc::new(NativeOpener));
//!
//!     if let Ok(Some(device)) = inventory.find_protocol_device(&CancelToken::new()) {
//!         let conn = inventory.connection_for(&device);
//!         let summary = conn.scoped(|conn| Board::new(conn).dataflash_summary())?;
//!         println!("{}", bbfetch::describe_usage(&summary));
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod board;
pub mod cancel;
pub mod connection;
pub mod device;
pub mod error;
pub mod port;
pub mod protocol;
pub mod workflow;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    device::NativePlatform,
    port::{NativeOpener, NativePort},
};
pub use {
    board::{Board, BoardInfo, describe_usage},
    cancel::{CancelToken, Cancelled},
    connection::Connection,
    device::{
        Classification, DeviceDescriptor, DeviceKind, Inventory, InventoryConfig, Platform,
        Volume,
    },
    error::{Error, ProtocolError, Result, TransportError},
    port::{Port, PortOpener, SerialConfig},
    protocol::{
        ApiVersion, Command, CommandCode, DataflashSummary, FcVariant, MspFrame, Response,
    },
    workflow::{
        ChannelObserver, Event, Observer, Outcome, OutputDir, Workflow, WorkflowConfig,
        WorkflowHandle, WorkflowState,
    },
};
