//! Board information command implementation.

use {
    crate::{Cli, CliError, cancel_token, config::Config},
    anyhow::{Context, Result},
    bbfetch::{
        Board, BoardInfo, DataflashSummary, DeviceDescriptor, Inventory, NativeOpener,
        NativePlatform, describe_usage,
    },
    console::style,
    std::sync::Arc,
};

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, port: Option<&str>, json: bool) -> Result<()> {
    let inventory = Inventory::new(Arc::new(NativePlatform), Arc::new(NativeOpener))
        .with_config(config.inventory_config());

    let device = match port {
        Some(name) => DeviceDescriptor::new(name),
        None => inventory
            .find_protocol_device(&cancel_token())
            .map_err(|_| CliError::Cancelled("Interrupted".to_string()))?
            .ok_or_else(|| {
                CliError::Usage(
                    "No MSP device found; connect the board or pass --port".to_string(),
                )
            })?,
    };

    let conn = inventory.connection_for(&device);
    let (info, summary) = conn
        .scoped(|conn| {
            let board = Board::new(conn);
            Ok::<_, bbfetch::Error>((board.info()?, board.dataflash_summary()?))
        })
        .with_context(|| format!("Failed to query board on {}", device.name))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&device.name, &info, &summary))?
        );
        return Ok(());
    }

    if !cli.quiet {
        eprintln!("{}", style("Flight Controller").bold().underlined());
    }
    eprintln!("  {:<10} {}", "Port:", style(&device.name).cyan());
    eprintln!("  {:<10} {}", "Firmware:", style(&info.variant).green());
    eprintln!(
        "  {:<10} {} (MSP protocol {})",
        "API:", info.api_version, info.protocol_version
    );
    if summary.supported {
        eprintln!("  {:<10} {}", "Flash:", describe_usage(&summary));
        if !summary.ready {
            eprintln!("  {}", style("Flash is busy (erase in progress)").yellow());
        }
    } else {
        eprintln!("  {:<10} {}", "Flash:", style("not supported").dim());
    }

    Ok(())
}

fn info_json(port: &str, info: &BoardInfo, summary: &DataflashSummary) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": {
            "port": port,
            "variant": info.variant,
            "protocol_version": info.protocol_version,
            "api_version": info.api_version,
            "dataflash": {
                "ready": summary.ready,
                "supported": summary.supported,
                "sectors": summary.sectors,
                "total_size": summary.total_size,
                "used_size": summary.used_size,
                "usage_percent": summary.usage_percent(),
            },
        }
    })
}
