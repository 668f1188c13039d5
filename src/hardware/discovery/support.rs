//! Device Support Check
//!
//! Probes whether a disk can be driven through the SCSI generic interface
//! and whether it speaks ATA, which decides the spin-down command used by
//! the idle manager. An unsupported device is a normal answer, not an error.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

const SG_GET_VERSION_NUM: u32 = 0x2282;
const MIN_SG_VERSION: libc::c_int = 30000;

pub const MSG_EMPTY_PATH: &str = "device path cannot be empty";
pub const MSG_NO_SG: &str = "device does not support SG interface";

nix::ioctl_read_bad!(sg_get_version_num, SG_GET_VERSION_NUM, libc::c_int);

// =============================================================================
// Result Types
// =============================================================================

/// Spin-down command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpinDownCommand {
    Ata,
    Scsi,
}

impl std::fmt::Display for SpinDownCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpinDownCommand::Ata => write!(f, "ata"),
            SpinDownCommand::Scsi => write!(f, "scsi"),
        }
    }
}

/// Answer to "can this device be spun down"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSupport {
    pub supported: bool,
    pub supports_sg: bool,
    pub supports_ata: bool,
    pub recommended_command: Option<SpinDownCommand>,
    pub error_message: Option<String>,
    pub device_path: String,
}

impl DeviceSupport {
    fn unsupported(device_path: String, message: impl Into<String>) -> Self {
        Self {
            supported: false,
            supports_sg: false,
            supports_ata: false,
            recommended_command: None,
            error_message: Some(message.into()),
            device_path,
        }
    }
}

// =============================================================================
// Checker
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeviceSupportChecker {
    dev_root: PathBuf,
    sysfs_path: PathBuf,
}

impl Default for DeviceSupportChecker {
    fn default() -> Self {
        Self::new("/dev", "/sys")
    }
}

impl DeviceSupportChecker {
    pub fn new(dev_root: impl Into<PathBuf>, sysfs_path: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            sysfs_path: sysfs_path.into(),
        }
    }

    pub fn check_device_support(&self, name: &str) -> DeviceSupport {
        let name = name.trim().trim_start_matches("/dev/");
        if name.is_empty() {
            return DeviceSupport::unsupported(String::new(), MSG_EMPTY_PATH);
        }

        let device_path = self.dev_root.join(name);
        let display_path = device_path.to_string_lossy().into_owned();

        let file = match File::open(&device_path) {
            Ok(file) => file,
            Err(e) => {
                return DeviceSupport::unsupported(display_path, format!("cannot open device: {}", e))
            }
        };

        let mut version: libc::c_int = 0;
        // SAFETY: the fd is open for the duration of the call and `version`
        // is a valid c_int the kernel writes into.
        let probe = unsafe { sg_get_version_num(file.as_raw_fd(), &mut version) };
        match probe {
            Ok(_) if version >= MIN_SG_VERSION => {}
            Ok(_) => {
                debug!("{} reports SG version {}", display_path, version);
                return DeviceSupport::unsupported(display_path, MSG_NO_SG);
            }
            Err(errno) => {
                debug!("SG probe on {} failed: {}", display_path, errno);
                return DeviceSupport::unsupported(display_path, MSG_NO_SG);
            }
        }

        let supports_ata = self.detect_ata(name);
        DeviceSupport {
            supported: true,
            supports_sg: true,
            supports_ata,
            recommended_command: Some(if supports_ata {
                SpinDownCommand::Ata
            } else {
                SpinDownCommand::Scsi
            }),
            error_message: None,
            device_path: display_path,
        }
    }

    /// ATA disks report `ATA` as their SCSI vendor
    pub fn detect_ata(&self, name: &str) -> bool {
        let disk = parent_disk(name);
        let vendor_path = self
            .sysfs_path
            .join("block")
            .join(&disk)
            .join("device/vendor");

        fs::read_to_string(vendor_path)
            .map(|vendor| vendor.trim().eq_ignore_ascii_case("ATA"))
            .unwrap_or(false)
    }
}

/// `sda1` -> `sda`, `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` -> `mmcblk0`
fn parent_disk(name: &str) -> String {
    let stripped = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.len() == name.len() {
        return name.to_string();
    }
    match stripped.strip_suffix('p') {
        Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => base.to_string(),
        _ if stripped.ends_with(|c: char| c.is_ascii_digit()) => name.to_string(),
        _ if name.starts_with("nvme") || name.starts_with("mmcblk") => name.to_string(),
        _ => stripped.to_string(),
    }
}
