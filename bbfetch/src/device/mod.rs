//! Device inventory: serial candidates, mounted log volumes and log files.
//!
//! Enumeration itself is delegated to a [`Platform`]. The inventory adds the
//! policy on top: which serial devices speak MSP, which volumes carry logs and
//! which files on them are logs.

#[cfg(feature = "native")]
pub mod native;

use {
    crate::{
        board::Board,
        cancel::{CancelToken, Cancelled},
        connection::{Connection, OPEN_ATTEMPTS, OPEN_RETRY_DELAY},
        error::Result,
        port::{PortOpener, SerialConfig},
    },
    log::{Level, debug, info, trace, warn},
    std::{
        fs,
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

#[cfg(feature = "native")]
pub use native::NativePlatform;

/// Volume label the flight controller exposes in mass-storage mode.
pub const DEFAULT_VOLUME_LABEL: &str = "Betaflight Onboard Flash";

/// Extension of blackbox log files.
pub const DEFAULT_LOG_EXTENSION: &str = "bbl";

/// Result of probing a serial device for MSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Classification {
    /// Not probed during this discovery pass.
    #[default]
    Unknown,
    /// Answered an MSP request.
    Capable,
    /// Did not answer.
    NotCapable,
}

/// USB device kinds commonly found on flight controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// STM32 native USB virtual COM port.
    Stm32Vcp,
    /// Artery AT32 native USB virtual COM port.
    At32Vcp,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any PID.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x0483, &[0x5740], DeviceKind::Stm32Vcp),
    (0x2E3C, &[], DeviceKind::At32Vcp),
    (0x10C4, &[0xEA60, 0xEA70], DeviceKind::Cp210x),
    (0x1A86, &[0x7523, 0x5523, 0x55D4], DeviceKind::Ch340),
    (0x0403, &[0x6001, 0x6010, 0x6014, 0x6015], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stm32Vcp => "STM32 VCP",
            Self::At32Vcp => "AT32 VCP",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A serial device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceDescriptor {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// MSP capability, valid for one discovery pass.
    pub classification: Classification,
    /// Classified USB device kind.
    pub kind: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

impl DeviceDescriptor {
    /// Descriptor for a port without USB metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classification: Classification::Unknown,
            kind: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Attach USB identifiers and classify the device kind.
    #[must_use]
    pub fn with_usb(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self.kind = DeviceKind::from_vid_pid(vid, pid);
        self
    }
}

/// A mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Volume {
    /// Volume label.
    pub label: String,
    /// Mount point.
    pub root: PathBuf,
}

/// Platform enumeration capability.
///
/// One implementation per target is selected at start-up and injected into
/// the [`Inventory`].
pub trait Platform: Send + Sync {
    /// List serial devices, in the platform's order.
    fn list_serial_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// List mounted volumes.
    fn list_volumes(&self) -> Result<Vec<Volume>>;
}

/// Inventory policy.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Volume labels that identify the flight controller's flash.
    pub volume_labels: Vec<String>,
    /// Log file extension, without the dot. Matched case-insensitively.
    pub log_extension: String,
    /// Serial read/write timeout for connections handed out.
    pub serial_timeout: Duration,
    /// Open attempts per connection.
    pub open_attempts: usize,
    /// Pause between open attempts.
    pub open_retry_delay: Duration,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            volume_labels: vec![DEFAULT_VOLUME_LABEL.to_string()],
            log_extension: DEFAULT_LOG_EXTENSION.to_string(),
            serial_timeout: Duration::from_secs(1),
            open_attempts: OPEN_ATTEMPTS,
            open_retry_delay: OPEN_RETRY_DELAY,
        }
    }
}

/// Device inventory over an injected platform and port opener.
#[derive(Clone)]
pub struct Inventory {
    platform: Arc<dyn Platform>,
    opener: Arc<dyn PortOpener>,
    config: InventoryConfig,
}

impl Inventory {
    /// Create an inventory.
    pub fn new(platform: Arc<dyn Platform>, opener: Arc<dyn PortOpener>) -> Self {
        Self {
            platform,
            opener,
            config: InventoryConfig::default(),
        }
    }

    /// Replace the inventory policy.
    #[must_use]
    pub fn with_config(mut self, config: InventoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Current policy.
    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// A closed connection to `device` with the configured link parameters.
    pub fn connection_for(&self, device: &DeviceDescriptor) -> Connection {
        let config = SerialConfig::msp(&device.name).with_timeout(self.config.serial_timeout);
        Connection::new(config, Arc::clone(&self.opener))
            .with_retry(self.config.open_attempts, self.config.open_retry_delay)
    }

    /// Serial devices reported by the platform. Empty is valid.
    pub fn list_candidate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.platform.list_serial_devices()
    }

    /// Whether `device` answers an MSP `FcVariant` request.
    ///
    /// Every failure means "not this device" and is only logged.
    pub fn probe(&self, device: &DeviceDescriptor) -> bool {
        self.probe_until(device, &CancelToken::new())
    }

    fn probe_until(&self, device: &DeviceDescriptor, cancel: &CancelToken) -> bool {
        // Busy or foreign ports fail to open all the time while polling
        let conn = self
            .connection_for(device)
            .with_cancel(cancel.clone())
            .with_open_failure_level(Level::Debug);
        match conn.scoped(|c| Board::new(c).fc_variant()) {
            Ok(variant) => {
                debug!(
                    "Successfully connected to MSP device {}: {}",
                    device.name, variant.variant
                );
                true
            },
            Err(e) => {
                debug!("Considering {} not an MSP device: {e}", device.name);
                false
            },
        }
    }

    /// First device, in listing order, that answers MSP.
    ///
    /// A platform listing failure is logged and treated as no devices.
    /// `cancel` is checked before every probe.
    pub fn find_protocol_device(
        &self,
        cancel: &CancelToken,
    ) -> std::result::Result<Option<DeviceDescriptor>, Cancelled> {
        let devices = match self.list_candidate_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate serial devices: {e}");
                return Ok(None);
            },
        };

        if devices.is_empty() {
            return Ok(None);
        }
        trace!(
            "Available devices: {:?}",
            devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>()
        );

        for mut device in devices {
            self.classify(&mut device, cancel)?;
            if device.classification == Classification::Capable {
                info!("Found MSP device {}", device.name);
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    /// Probe every device in `devices` and record the result as its
    /// [`Classification`]. `cancel` is checked before every probe.
    pub fn classify_devices(
        &self,
        mut devices: Vec<DeviceDescriptor>,
        cancel: &CancelToken,
    ) -> std::result::Result<Vec<DeviceDescriptor>, Cancelled> {
        for device in &mut devices {
            self.classify(device, cancel)?;
        }
        Ok(devices)
    }

    fn classify(
        &self,
        device: &mut DeviceDescriptor,
        cancel: &CancelToken,
    ) -> std::result::Result<(), Cancelled> {
        cancel.check()?;
        debug!("Trying {}", device.name);
        device.classification = if self.probe_until(device, cancel) {
            Classification::Capable
        } else {
            Classification::NotCapable
        };
        Ok(())
    }

    /// Mounted volumes whose label is on the allow-list.
    pub fn list_mounted_log_volumes(&self) -> Result<Vec<Volume>> {
        let volumes = self.platform.list_volumes()?;
        Ok(volumes
            .into_iter()
            .filter(|v| self.config.volume_labels.iter().any(|l| *l == v.label))
            .collect())
    }

    /// Log files directly under every matching volume, sorted by path.
    pub fn find_log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for volume in self.list_mounted_log_volumes()? {
            trace!("Scanning {} at {}", volume.label, volume.root.display());
            files.extend(list_files_with_extension(&volume.root, &self.config.log_extension)?);
        }
        files.sort();
        Ok(files)
    }
}

/// Regular files directly in `dir` whose extension equals `extension`,
/// ignoring ASCII case.
pub fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Format devices for display.
pub fn format_port_list(devices: &[DeviceDescriptor]) -> Vec<String> {
    devices
        .iter()
        .map(|device| {
            let kind_info = if device.kind.is_known() {
                format!(" [{}]", device.kind.name())
            } else if let (Some(vid), Some(pid)) = (device.vid, device.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = device
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{kind_info}{product_info}", device.name)
        })
        .collect()
}
