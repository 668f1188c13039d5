//! Block Device Interpreter
//!
//! Runs `lsblk` in JSON mode and answers per-device questions (label,
//! partition label, mountpoint, filesystem) from its nested device tree.
//! Absent attributes come back as `"unknown"` rather than nulls.

use super::command::SystemCommandRunner;
use super::identity::StableIdResolver;
use crate::domain::ports::CommandRunner;
use crate::domain::{Disk, Partition};
use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::ErrorKind as IoErrorKind;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Constants
// =============================================================================

const LSBLK: &str = "lsblk";
const DESCRIBE_COLUMNS: &str = "name,label,partlabel,mountpoint,fstype";
const LIST_COLUMNS: &str = "name,label,partlabel,mountpoint,fstype,size,type,model,serial";

/// Placeholder for attributes the enumerator did not report
pub const UNKNOWN: &str = "unknown";

/// Device name prefixes never reported as disks
const SKIPPED_PREFIXES: [&str; 3] = ["loop", "ram", "zram"];

// =============================================================================
// Enumerator Output
// =============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    partlabel: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default, deserialize_with = "size_bytes")]
    size: Option<u64>,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

/// Older util-linux prints sizes as strings even with `-J`
fn size_bytes<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn or_unknown(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Device Description
// =============================================================================

/// What the enumerator knows about one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub label: String,
    pub partition_label: String,
    /// Empty when not mounted
    pub mountpoint: String,
    pub filesystem_type: String,
}

impl DeviceDescription {
    fn from_node(node: &LsblkNode) -> Self {
        Self {
            label: or_unknown(&node.label),
            partition_label: or_unknown(&node.partlabel),
            mountpoint: node.mountpoint.clone().unwrap_or_default(),
            filesystem_type: or_unknown(&node.fstype),
        }
    }

    /// Filesystem type, if the enumerator reported one
    pub fn known_filesystem(&self) -> Option<&str> {
        (self.filesystem_type != UNKNOWN).then_some(self.filesystem_type.as_str())
    }
}

// =============================================================================
// Interpreter
// =============================================================================

static SYSTEM: OnceCell<Arc<BlockDeviceInterpreter>> = OnceCell::new();

/// Answers device questions from `lsblk` output
pub struct BlockDeviceInterpreter {
    runner: Arc<dyn CommandRunner>,
    resolver: StableIdResolver,
}

impl BlockDeviceInterpreter {
    pub fn new(runner: Arc<dyn CommandRunner>, resolver: StableIdResolver) -> Self {
        Self { runner, resolver }
    }

    /// The process-wide interpreter for the real system, built on first use
    pub fn system() -> Arc<Self> {
        SYSTEM
            .get_or_init(|| {
                info!("Initializing block device interpreter");
                Arc::new(Self::new(
                    Arc::new(SystemCommandRunner::new()),
                    StableIdResolver::default_resolver(),
                ))
            })
            .clone()
    }

    pub fn resolver(&self) -> &StableIdResolver {
        &self.resolver
    }

    /// Describe one device by kernel name.
    ///
    /// Partitions of disks are searched before top-level disks.
    pub fn describe_device(&self, name: &str) -> Result<DeviceDescription> {
        let name = name.trim_start_matches("/dev/");
        self.verify_device(name)?;

        let output = self.enumerate(DESCRIBE_COLUMNS)?;

        let partition = output
            .blockdevices
            .iter()
            .flat_map(|disk| disk.children.iter())
            .find(|node| node.name == name);

        let node = partition
            .or_else(|| output.blockdevices.iter().find(|node| node.name == name))
            .ok_or_else(|| Error::DeviceNotFound {
                device: name.to_string(),
            })?;

        debug!("Described device {}: fstype={:?}", name, node.fstype);
        Ok(DeviceDescription::from_node(node))
    }

    /// Every disk with its partitions
    pub fn list_disks(&self) -> Result<Vec<Disk>> {
        let output = self.enumerate(LIST_COLUMNS)?;

        let disks: Vec<Disk> = output
            .blockdevices
            .iter()
            .filter(|node| should_include_device(&node.name))
            .map(|node| self.to_disk(node))
            .collect();

        debug!("Enumerated {} disks", disks.len());
        Ok(disks)
    }

    fn to_disk(&self, node: &LsblkNode) -> Disk {
        let partitions = node
            .children
            .iter()
            .filter(|child| child.node_type.as_deref().map_or(true, |t| t == "part"))
            .map(|child| {
                let description = DeviceDescription::from_node(child);
                Partition {
                    name: child.name.clone(),
                    disk: node.name.clone(),
                    device_path: self.device_path(&child.name),
                    stable_id: self.resolver.resolve(&child.name),
                    size_bytes: child.size.unwrap_or(0),
                    label: description.label,
                    partition_label: description.partition_label,
                    fs_type: description.filesystem_type,
                    mountpoint: description.mountpoint,
                }
            })
            .collect();

        Disk {
            name: node.name.clone(),
            device_path: self.device_path(&node.name),
            stable_id: self.resolver.resolve(&node.name),
            size_bytes: node.size.unwrap_or(0),
            model: trimmed(&node.model),
            serial: trimmed(&node.serial),
            partitions,
        }
    }

    fn device_path(&self, name: &str) -> String {
        self.resolver.device_node(name).to_string_lossy().into_owned()
    }

    fn verify_device(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::DeviceNotFound {
                device: String::new(),
            });
        }

        match File::open(self.resolver.device_node(name)) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(Error::DeviceNotFound {
                device: name.to_string(),
            }),
            Err(e) if e.kind() == IoErrorKind::PermissionDenied => Err(Error::DeviceAccessDenied {
                device: name.to_string(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn enumerate(&self, columns: &str) -> Result<LsblkOutput> {
        let output = self
            .runner
            .run(LSBLK, &["-b", "-J", "-o", columns])
            .map_err(|e| Error::Enumeration(format!("{} failed to start: {}", LSBLK, e)))?;

        if !output.success() {
            return Err(Error::Enumeration(format!(
                "{} exited with {:?}: {}",
                LSBLK,
                output.status,
                output.diagnostic()
            )));
        }

        serde_json::from_str(&output.stdout)
            .map_err(|e| Error::Enumeration(format!("{} JSON parse error: {}", LSBLK, e)))
    }
}

/// Check if a device should appear in disk listings
fn should_include_device(name: &str) -> bool {
    !SKIPPED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}
