//! Port and log volume listing.

use {
    crate::{CliError, cancel_token, config::Config},
    anyhow::{Context, Result},
    bbfetch::{
        Classification, DeviceDescriptor, Error, Inventory, NativeOpener, NativePlatform, Volume,
        device::format_port_list,
    },
    console::style,
    log::debug,
    std::sync::Arc,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool, probe: bool) -> Result<()> {
    let inventory = Inventory::new(Arc::new(NativePlatform), Arc::new(NativeOpener))
        .with_config(config.inventory_config());

    let mut devices = inventory
        .list_candidate_devices()
        .context("Failed to enumerate serial ports")?;
    if probe {
        devices = inventory
            .classify_devices(devices, &cancel_token())
            .map_err(|_| CliError::Cancelled("Interrupted".to_string()))?;
    }
    let volumes = match inventory.list_mounted_log_volumes() {
        Ok(volumes) => volumes,
        Err(Error::Unsupported(reason)) => {
            debug!("Volume listing unavailable: {reason}");
            Vec::new()
        },
        Err(e) => return Err(e).context("Failed to enumerate mounted volumes"),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&devices, &volumes))?
        );
        return Ok(());
    }

    eprintln!("{}", style("Serial Ports").bold().underlined());
    if devices.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for (device, line) in devices.iter().zip(format_port_list(&devices)) {
            let marker = if device.kind.is_known() {
                style("•").green()
            } else {
                style("•").dim()
            };
            let msp = match device.classification {
                Classification::Capable => format!(" {}", style("(MSP)").green().bold()),
                Classification::NotCapable => format!(" {}", style("(no MSP)").dim()),
                Classification::Unknown => String::new(),
            };
            eprintln!("  {marker} {line}{msp}");
        }
    }

    if !volumes.is_empty() {
        eprintln!("\n{}", style("Blackbox Drives").bold().underlined());
        for volume in &volumes {
            eprintln!(
                "  {} {} at {}",
                style("•").green(),
                style(&volume.label).cyan(),
                style(volume.root.display()).yellow()
            );
        }
    }

    Ok(())
}

fn ports_json(devices: &[DeviceDescriptor], volumes: &[Volume]) -> serde_json::Value {
    let ports: Vec<serde_json::Value> = devices
        .iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "device": d.kind.name(),
                "known": d.kind.is_known(),
                "vid": d.vid,
                "pid": d.pid,
                "manufacturer": d.manufacturer,
                "product": d.product,
                "msp": d.classification,
            })
        })
        .collect();

    serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
            "volumes": volumes,
        }
    })
}
