//! Native platform enumeration using the `serialport` crate and the OS
//! mount tables.

use {
    crate::{
        device::{DeviceDescriptor, Platform, Volume},
        error::{Result, TransportError},
    },
    log::trace,
};

#[cfg(any(target_os = "linux", target_os = "macos"))]
use std::{fs, path::Path};
#[cfg(any(target_os = "linux", windows, test))]
use std::path::PathBuf;

#[cfg(target_os = "linux")]
const BY_LABEL_DIR: &str = "/dev/disk/by-label";
#[cfg(target_os = "linux")]
const MOUNTS_FILE: &str = "/proc/self/mounts";
#[cfg(target_os = "macos")]
const VOLUMES_DIR: &str = "/Volumes";
/// Longest volume label plus its terminator, per `GetVolumeInformationW`.
#[cfg(windows)]
const MAX_LABEL_LEN: usize = 261;

/// Platform enumeration for the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl Platform for NativePlatform {
    fn list_serial_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = serialport::available_ports().map_err(TransportError::Serial)?;

        Ok(ports
            .into_iter()
            .map(|info| {
                let mut device = DeviceDescriptor::new(info.port_name);
                if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                    device = device.with_usb(usb.vid, usb.pid);
                    device.manufacturer = usb.manufacturer;
                    device.product = usb.product;
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        device.name, usb.vid, usb.pid, device.kind
                    );
                }
                device
            })
            .collect())
    }

    #[cfg(target_os = "linux")]
    fn list_volumes(&self) -> Result<Vec<Volume>> {
        let by_label = Path::new(BY_LABEL_DIR);
        if !by_label.is_dir() {
            return Ok(Vec::new());
        }

        let mounts = parse_mounts(&fs::read_to_string(MOUNTS_FILE)?);
        let mut volumes = Vec::new();

        for entry in fs::read_dir(by_label)? {
            let entry = entry?;
            let label = unescape_udev_label(&entry.file_name().to_string_lossy());
            // Entries are symlinks to the block device
            let Ok(device) = fs::canonicalize(entry.path()) else {
                continue;
            };

            for (source, mount_point) in &mounts {
                let same_device = fs::canonicalize(source).is_ok_and(|s| s == device);
                if same_device {
                    trace!("Volume {label} mounted at {}", mount_point.display());
                    volumes.push(Volume {
                        label: label.clone(),
                        root: mount_point.clone(),
                    });
                }
            }
        }
        Ok(volumes)
    }

    #[cfg(target_os = "macos")]
    fn list_volumes(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        for entry in fs::read_dir(Path::new(VOLUMES_DIR))? {
            let entry = entry?;
            if entry.path().is_dir() {
                volumes.push(Volume {
                    label: entry.file_name().to_string_lossy().into_owned(),
                    root: entry.path(),
                });
            }
        }
        Ok(volumes)
    }

    #[cfg(windows)]
    #[allow(unsafe_code)]
    fn list_volumes(&self) -> Result<Vec<Volume>> {
        use {std::os::windows::ffi::OsStrExt, windows_sys::Win32::Storage::FileSystem};

        let mut volumes = Vec::new();
        for letter in b'A'..=b'Z' {
            let root = PathBuf::from(format!("{}:\\", char::from(letter)));
            // Skip unassigned letters before asking for a label
            if !root.exists() {
                continue;
            }
            let wide_root: Vec<u16> = root.as_os_str().encode_wide().chain([0]).collect();
            let mut label = [0u16; MAX_LABEL_LEN];
            // SAFETY: `wide_root` is NUL-terminated, `label` is writable for
            // the length passed and the remaining out-pointers are optional.
            let found = unsafe {
                FileSystem::GetVolumeInformationW(
                    wide_root.as_ptr(),
                    label.as_mut_ptr(),
                    MAX_LABEL_LEN as u32,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    0,
                )
            };
            if found == 0 {
                trace!("No volume information for {}", root.display());
                continue;
            }
            let label = label_from_wide(&label);
            trace!("Volume {label} at {}", root.display());
            volumes.push(Volume { label, root });
        }
        Ok(volumes)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    fn list_volumes(&self) -> Result<Vec<Volume>> {
        Err(crate::error::Error::Unsupported(
            "Volume enumeration is not available on this platform".to_string(),
        ))
    }
}

/// Label text from a NUL-terminated UTF-16 buffer.
#[cfg(any(windows, test))]
fn label_from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Decode `\xHH` escapes used by udev in `/dev/disk/by-label` names.
#[cfg(any(target_os = "linux", test))]
fn unescape_udev_label(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(byte) = name
                .get(i + 2..i + 4)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode the `\NNN` octal escapes of `/proc/self/mounts` fields.
#[cfg(any(target_os = "linux", test))]
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(byte) = field
                .get(i + 1..i + 4)
                .and_then(|oct| u8::from_str_radix(oct, 8).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `(source, mount point)` pairs from a mount table.
#[cfg(any(target_os = "linux", test))]
fn parse_mounts(table: &str) -> Vec<(String, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some((
                unescape_mount_field(source),
                PathBuf::from(unescape_mount_field(target)),
            ))
        })
        .collect()
}
