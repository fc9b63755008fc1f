//! Typed board operations over an open [`Connection`].

use {
    crate::{
        connection::Connection,
        error::{ProtocolError, Result},
        protocol::command::{ApiVersion, Command, DataflashSummary, FcVariant, Response},
    },
    log::info,
    std::fmt,
};

/// Identification reported by a flight controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardInfo {
    /// Firmware identifier, e.g. `BTFL`.
    pub variant: String,
    /// MSP protocol version.
    pub protocol_version: u8,
    /// API version as `"major.minor"`.
    pub api_version: String,
}

impl fmt::Display for BoardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (MSP protocol {}, API {})",
            self.variant, self.protocol_version, self.api_version
        )
    }
}

/// One-line usage description, e.g. `Blackbox used: 1024/2048 (50%)`.
pub fn describe_usage(summary: &DataflashSummary) -> String {
    format!(
        "Blackbox used: {}/{} ({}%)",
        summary.used_size,
        summary.total_size,
        summary.usage_percent()
    )
}

/// Flight controller reachable through an open connection.
pub struct Board<'a> {
    conn: &'a Connection,
}

impl<'a> Board<'a> {
    /// Wrap an open connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn request(&self, command: Command) -> Result<Response> {
        self.conn
            .send_command(command)?
            .ok_or_else(|| unexpected(command))
    }

    /// Query the API version.
    pub fn api_version(&self) -> Result<ApiVersion> {
        match self.request(Command::ApiVersion)? {
            Response::ApiVersion(v) => Ok(v),
            _ => Err(unexpected(Command::ApiVersion)),
        }
    }

    /// Query the firmware variant.
    pub fn fc_variant(&self) -> Result<FcVariant> {
        match self.request(Command::FcVariant)? {
            Response::FcVariant(v) => Ok(v),
            _ => Err(unexpected(Command::FcVariant)),
        }
    }

    /// Query the onboard flash state.
    pub fn dataflash_summary(&self) -> Result<DataflashSummary> {
        match self.request(Command::DataflashSummary)? {
            Response::DataflashSummary(s) => Ok(s),
            _ => Err(unexpected(Command::DataflashSummary)),
        }
    }

    /// Query variant and API version together.
    pub fn info(&self) -> Result<BoardInfo> {
        let variant = self.fc_variant()?;
        let version = self.api_version()?;
        Ok(BoardInfo {
            variant: variant.variant,
            protocol_version: version.protocol_version,
            api_version: version.api_version,
        })
    }

    /// Reboot into USB mass-storage mode. The board drops off the serial bus.
    pub fn reboot_to_mass_storage(&self) -> Result<()> {
        info!("Rebooting {} into mass-storage mode", self.conn.name());
        self.conn.send_command(Command::RebootToMassStorage)?;
        Ok(())
    }

    /// Start erasing the onboard flash. Poll [`Self::dataflash_summary`] for completion.
    pub fn erase_dataflash(&self) -> Result<()> {
        info!("Erasing dataflash on {}", self.conn.name());
        self.conn.send_command(Command::DataflashErase)?;
        Ok(())
    }
}

fn unexpected(command: Command) -> crate::Error {
    ProtocolError::UnexpectedResponse {
        command: command.name(),
    }
    .into()
}
