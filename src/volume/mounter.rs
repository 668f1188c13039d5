//! System Mounter
//!
//! `mount(2)`/`umount2(2)` through nix, and mount table lookups from
//! `/proc/self/mountinfo`.

use crate::domain::ports::{ActiveMount, Mounter, UnmountMode};
use crate::domain::MountFlags;
use nix::mount::{mount, umount2, MntFlags};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mounts through the kernel
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mountinfo: PathBuf,
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from(MOUNTINFO),
        }
    }
}

impl SystemMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the mount table from another file (for testing)
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }
}

impl Mounter for SystemMounter {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> io::Result<()> {
        debug!(
            "mount -t {} -o {} {:?} {:?}",
            fs_type,
            flags,
            source,
            target
        );
        mount(Some(source), target, Some(fs_type), flags.to_ms_flags(), data)?;
        Ok(())
    }

    fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()> {
        let flags = match mode {
            UnmountMode::Normal => MntFlags::empty(),
            UnmountMode::Force => MntFlags::MNT_FORCE,
            UnmountMode::Lazy => MntFlags::MNT_DETACH,
        };
        debug!("umount ({}) {:?}", mode, target);
        umount2(target, flags)?;
        Ok(())
    }

    fn mounted_at(&self, target: &Path) -> io::Result<Option<ActiveMount>> {
        let table = fs::read_to_string(&self.mountinfo)?;
        Ok(find_mount(&table, target))
    }
}

/// Undo the octal escapes the kernel uses for whitespace and backslashes
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The topmost mount whose mount point is exactly `target`.
///
/// Line format: `id parent maj:min root mount_point opts [optional...] - fstype source super_opts`
pub(crate) fn find_mount(table: &str, target: &Path) -> Option<ActiveMount> {
    table
        .lines()
        .filter_map(|line| {
            let mut halves = line.splitn(2, " - ");
            let left: Vec<&str> = halves.next()?.split_whitespace().collect();
            let right: Vec<&str> = halves.next()?.split_whitespace().collect();

            let mount_point = unescape(left.get(4)?);
            if Path::new(&mount_point) != target {
                return None;
            }
            Some(ActiveMount {
                fs_type: right.first()?.to_string(),
                source: unescape(right.get(1)?),
            })
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
35 22 8:17 / /mnt/media rw,noatime shared:20 - ext4 /dev/sdb1 rw
36 22 8:33 / /mnt/my\\040disk rw - exfat /dev/sdc1 rw
37 35 8:49 / /mnt/media rw - xfs /dev/sdd1 rw
";

    #[test]
    fn test_find_mount() {
        let m = find_mount(TABLE, Path::new("/")).unwrap();
        assert_eq!(m.source, "/dev/sda1");

        let m = find_mount(TABLE, Path::new("/mnt/my disk")).unwrap();
        assert_eq!(m.fs_type, "exfat");

        assert!(find_mount(TABLE, Path::new("/mnt/none")).is_none());
    }

    #[test]
    fn test_stacked_mount_uses_topmost() {
        let m = find_mount(TABLE, Path::new("/mnt/media")).unwrap();
        assert_eq!(m.source, "/dev/sdd1");
        assert_eq!(m.fs_type, "xfs");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\040b"), "a b");
        assert_eq!(unescape("tab\\011"), "tab\t");
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("trail\\"), "trail\\");
    }

    #[test]
    fn test_mounted_at_reads_table_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mountinfo");
        fs::write(&path, TABLE).unwrap();

        let mounter = SystemMounter::with_mountinfo(&path);
        let m = mounter.mounted_at(Path::new("/mnt/media")).unwrap();
        assert!(m.is_some());
        assert!(mounter.mounted_at(Path::new("/srv")).unwrap().is_none());
    }
}
