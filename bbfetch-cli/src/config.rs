//! Configuration file support for bbfetch.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BBFETCH_*)
//! 3. Local config file (./bbfetch.toml)
//! 4. Global config file (~/.config/bbfetch/config.toml)

use {
    bbfetch::{InventoryConfig, WorkflowConfig},
    directories::ProjectDirs,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "bbfetch.toml";

/// Where fetched logs go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory.
    pub directory: Option<PathBuf>,
}

/// How the flash volume and its logs are recognized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Additional volume labels accepted as the flight controller's flash.
    #[serde(default)]
    pub volume_labels: Vec<String>,
    /// Log file extension, without the dot.
    pub extension: Option<String>,
}

/// Serial link settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Read/write timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Open attempts per connection.
    pub open_attempts: Option<usize>,
}

/// Poll intervals and delays, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Device discovery interval.
    pub device_poll_ms: Option<u64>,
    /// Volume scan interval.
    pub mount_poll_ms: Option<u64>,
    /// Erase-ready query interval.
    pub erase_poll_ms: Option<u64>,
    /// Pause after rebooting into mass-storage mode.
    pub reboot_settle_ms: Option<u64>,
    /// Give up waiting for the device or volume after this many seconds.
    pub wait_timeout_secs: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output configuration.
    #[serde(default)]
    pub output: OutputConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Serial configuration.
    #[serde(default)]
    pub serial: SerialConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bbfetch").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.output.directory.is_some() {
            self.output.directory = other.output.directory;
        }

        for label in other.storage.volume_labels {
            if !self.storage.volume_labels.contains(&label) {
                self.storage.volume_labels.push(label);
            }
        }
        if other.storage.extension.is_some() {
            self.storage.extension = other.storage.extension;
        }

        if other.serial.timeout_ms.is_some() {
            self.serial.timeout_ms = other.serial.timeout_ms;
        }
        if other.serial.open_attempts.is_some() {
            self.serial.open_attempts = other.serial.open_attempts;
        }

        let timing = other.timing;
        if timing.device_poll_ms.is_some() {
            self.timing.device_poll_ms = timing.device_poll_ms;
        }
        if timing.mount_poll_ms.is_some() {
            self.timing.mount_poll_ms = timing.mount_poll_ms;
        }
        if timing.erase_poll_ms.is_some() {
            self.timing.erase_poll_ms = timing.erase_poll_ms;
        }
        if timing.reboot_settle_ms.is_some() {
            self.timing.reboot_settle_ms = timing.reboot_settle_ms;
        }
        if timing.wait_timeout_secs.is_some() {
            self.timing.wait_timeout_secs = timing.wait_timeout_secs;
        }
    }

    /// Inventory policy with file settings applied over the defaults.
    ///
    /// Extra volume labels are accepted in addition to the default one.
    pub fn inventory_config(&self) -> InventoryConfig {
        let mut inventory = InventoryConfig::default();
        for label in &self.storage.volume_labels {
            if !inventory.volume_labels.contains(label) {
                inventory.volume_labels.push(label.clone());
            }
        }
        if let Some(ref ext) = self.storage.extension {
            inventory.log_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(ms) = self.serial.timeout_ms {
            inventory.serial_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.serial.open_attempts {
            inventory.open_attempts = attempts.max(1);
        }
        inventory
    }

    /// Workflow timings with file settings applied over the defaults.
    pub fn workflow_config(&self) -> WorkflowConfig {
        let mut workflow = WorkflowConfig::default();
        let timing = &self.timing;
        if let Some(ms) = timing.device_poll_ms {
            workflow.device_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.mount_poll_ms {
            workflow.mount_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.erase_poll_ms {
            workflow.erase_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.reboot_settle_ms {
            workflow.reboot_settle = Duration::from_millis(ms);
        }
        if let Some(secs) = timing.wait_timeout_secs {
            workflow.wait_timeout = Some(Duration::from_secs(secs));
        }
        workflow
    }
}
