//! Volume/Mount Lifecycle Manager
//!
//! Drives mount points through
//! `Unmounted -> Mounting -> Mounted -> Unmounting -> Unmounted`, with
//! `Error` reachable from any transition and recoverable by a new request.
//!
//! Mount events are emitted only after the kernel confirms the change.
//! Every call reads the mount point repository afresh; nothing about device
//! identity is cached between calls.

use crate::domain::ports::{Mounter, UnmountMode};
use crate::domain::{MountFlags, MountPointData, MountPointPath, RowState};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::hardware::BlockDeviceInterpreter;
use crate::store::MountPointRepository;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct VolumeManagerConfig {
    /// Mode for mount directories created by the manager
    pub dir_mode: u32,
    /// Remove the mount directory after a successful unmount
    pub remove_dir_on_unmount: bool,
}

impl Default for VolumeManagerConfig {
    fn default() -> Self {
        Self {
            dir_mode: 0o750,
            remove_dir_on_unmount: true,
        }
    }
}

// =============================================================================
// Requests & State
// =============================================================================

/// Lifecycle state of one mount path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
    Error,
}

impl MountState {
    fn is_transient(self) -> bool {
        matches!(self, MountState::Mounting | MountState::Unmounting)
    }
}

/// What to mount where
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub path: String,
    /// Kernel device name (`sda1` or `/dev/sda1`)
    pub device: Option<String>,
    /// Stable id (`by-id-...`); used to find the device when `device` is absent
    pub device_id: Option<String>,
    /// Probed through the block device interpreter when absent
    pub fs_type: Option<String>,
    pub flags: MountFlags,
    pub data: Option<String>,
    pub is_to_mount_at_startup: bool,
}

impl MountRequest {
    pub fn from_row(row: &MountPointPath) -> Self {
        Self {
            path: row.path.clone(),
            device: None,
            device_id: Some(row.device_id.clone()).filter(|id| !id.is_empty()),
            fs_type: row.fs_type.clone(),
            flags: row.flags,
            data: row.data.clone(),
            is_to_mount_at_startup: row.is_to_mount_at_startup,
        }
    }
}

/// Unmount escalation allowed by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountOptions {
    /// Retry a busy unmount with `MNT_FORCE`
    pub force: bool,
    /// Retry a busy unmount with `MNT_DETACH`
    pub lazy: bool,
}

/// Outcome of a sweep over many items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub already_in_state: usize,
    /// (item, error) for every failure
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct ResolvedDevice {
    kernel_name: String,
    device_id: String,
    node: PathBuf,
}

// =============================================================================
// Volume Manager
// =============================================================================

pub struct VolumeManager {
    config: VolumeManagerConfig,
    mounter: Arc<dyn Mounter>,
    interpreter: Arc<BlockDeviceInterpreter>,
    mount_points: MountPointRepository,
    bus: Arc<EventBus>,
    states: DashMap<String, MountState>,
}

impl VolumeManager {
    pub fn new(
        config: VolumeManagerConfig,
        mounter: Arc<dyn Mounter>,
        interpreter: Arc<BlockDeviceInterpreter>,
        mount_points: MountPointRepository,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            mounter,
            interpreter,
            mount_points,
            bus,
            states: DashMap::new(),
        }
    }

    /// Current lifecycle state of `path`
    pub fn state(&self, path: &str) -> MountState {
        self.states
            .get(path)
            .map(|s| *s)
            .unwrap_or(MountState::Unmounted)
    }

    /// Mount a volume.
    ///
    /// Returns [`Error::AlreadyMounted`] when the path already carries the
    /// same device (and filesystem, if requested), and
    /// [`Error::MountConflict`] when it carries something else.
    pub fn mount_volume(&self, request: &MountRequest) -> Result<MountPointData> {
        let path = validate_path(&request.path)?;
        let previous = self.begin(&path, MountState::Mounting)?;

        match self.do_mount(&path, request) {
            Ok(data) => {
                self.set_state(&path, MountState::Mounted);
                info!("Mounted {} on {}", data.source, path);
                self.bus.emit_mount_point(Event::add(data.clone()));
                Ok(data)
            }
            Err(e @ Error::AlreadyMounted { .. }) => {
                self.set_state(&path, MountState::Mounted);
                Err(e)
            }
            Err(e @ (Error::MountFailed { .. } | Error::Database(_) | Error::DeviceIdInUse { .. })) => {
                self.set_state(&path, MountState::Error);
                Err(e)
            }
            Err(e) => {
                self.set_state(&path, previous);
                Err(e)
            }
        }
    }

    fn do_mount(&self, path: &str, request: &MountRequest) -> Result<MountPointData> {
        let device = self.resolve_device(request)?;
        let target = Path::new(path);

        if let Some(active) = self.mounter.mounted_at(target)? {
            let same_source = same_file(Path::new(&active.source), &device.node);
            let same_fs = request
                .fs_type
                .as_deref()
                .map_or(true, |fs| fs == active.fs_type);

            return if same_source && same_fs {
                Err(Error::AlreadyMounted {
                    path: path.to_string(),
                })
            } else {
                Err(Error::MountConflict {
                    path: path.to_string(),
                    reason: format!("{} ({}) is mounted there", active.source, active.fs_type),
                })
            };
        }

        let fs_type = match &request.fs_type {
            Some(fs) => fs.clone(),
            None => self
                .interpreter
                .describe_device(&device.kernel_name)?
                .known_filesystem()
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::InvalidMountRequest(format!(
                        "cannot determine filesystem of {}",
                        device.kernel_name
                    ))
                })?,
        };

        let created = self.ensure_dir(target)?;

        if let Err(e) = self.mounter.mount(
            &device.node,
            target,
            &fs_type,
            request.flags,
            request.data.as_deref(),
        ) {
            if created {
                self.remove_dir(target);
            }
            return Err(Error::MountFailed {
                device: device.node.display().to_string(),
                path: path.to_string(),
                reason: e.to_string(),
            });
        }

        let row = match self.persist(path, request, &device, &fs_type) {
            Ok(row) => row,
            Err(e) => {
                error!("Mounted {} but could not record it: {}", path, e);
                if let Err(undo) = self.mounter.unmount(target, UnmountMode::Normal) {
                    warn!("Rollback unmount of {} failed: {}", path, undo);
                } else if created {
                    self.remove_dir(target);
                }
                return Err(e);
            }
        };

        Ok(MountPointData::from_row(&row, device.node.display().to_string(), true))
    }

    /// Read-then-write the row for `path`
    fn persist(
        &self,
        path: &str,
        request: &MountRequest,
        device: &ResolvedDevice,
        fs_type: &str,
    ) -> Result<MountPointPath> {
        let existing = self.mount_points.get(path)?;

        let mut row = existing.clone().unwrap_or_else(|| {
            let mut row = MountPointPath::new(path, "");
            row.is_to_mount_at_startup = request.is_to_mount_at_startup;
            row
        });
        row.device_id = device.device_id.clone();
        row.fs_type = Some(fs_type.to_string());
        row.flags = request.flags;
        row.data = request.data.clone();
        row.state = RowState::Active;

        if existing.as_ref() != Some(&row) {
            self.mount_points.save(&row)?;
            debug!("Recorded mount point {}", path);
        }
        Ok(row)
    }

    /// Unmount a volume.
    ///
    /// A busy mount is retried with `MNT_FORCE` and then `MNT_DETACH` when the
    /// caller allows it. The remove event is emitted once the kernel no
    /// longer lists the mount.
    pub fn unmount_volume(&self, path: &str, options: UnmountOptions) -> Result<MountPointData> {
        let path = validate_path(path)?;
        let target = Path::new(&path);

        let row = self.mount_points.get_active(&path)?;
        let active = self.mounter.mounted_at(target)?;

        let active = match (active, &row) {
            (Some(active), _) => active,
            (None, Some(_)) => {
                self.set_state(&path, MountState::Unmounted);
                return Err(Error::AlreadyUnmounted { path });
            }
            (None, None) => return Err(Error::MountPointNotFound { path }),
        };

        self.begin(&path, MountState::Unmounting)?;

        let mut modes = vec![UnmountMode::Normal];
        if options.force {
            modes.push(UnmountMode::Force);
        }
        if options.lazy {
            modes.push(UnmountMode::Lazy);
        }

        let mut last_error = None;
        for mode in modes {
            match self.mounter.unmount(target, mode) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                    warn!("{} is busy ({} unmount)", path, mode);
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = last_error {
            self.set_state(&path, MountState::Error);
            return Err(Error::UnmountFailed {
                path,
                reason: e.to_string(),
            });
        }

        if self.mounter.mounted_at(target)?.is_some() {
            self.set_state(&path, MountState::Error);
            return Err(Error::UnmountFailed {
                path,
                reason: "still listed in the mount table".to_string(),
            });
        }

        if self.config.remove_dir_on_unmount {
            self.remove_dir(target);
        }
        self.set_state(&path, MountState::Unmounted);
        info!("Unmounted {}", path);

        let data = match &row {
            Some(row) => MountPointData::from_row(row, active.source, false),
            None => MountPointData {
                path: path.clone(),
                device_id: String::new(),
                source: active.source,
                fs_type: active.fs_type,
                flags: MountFlags::empty(),
                is_mounted: false,
                is_to_mount_at_startup: false,
            },
        };
        self.bus.emit_mount_point(Event::remove(data.clone()));
        Ok(data)
    }

    /// Mount every startup-flagged addon volume.
    ///
    /// Per-volume failures are logged and the sweep moves on.
    pub fn automount_all(&self) -> Result<SweepReport> {
        let rows = self.mount_points.list_startup()?;
        let mut report = SweepReport::default();
        info!("Automounting {} volumes", rows.len());

        for row in rows {
            report.attempted += 1;
            match self.mount_volume(&MountRequest::from_row(&row)) {
                Ok(_) => report.succeeded += 1,
                Err(e) if e.is_already_in_desired_state() => {
                    info!("{} already mounted", row.path);
                    report.already_in_state += 1;
                }
                Err(e) => {
                    error!("Automount of {} failed: {}", row.path, e);
                    report.failed.push((row.path.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Enumerate disks and announce each with its partitions
    pub fn refresh_disks(&self) -> Result<usize> {
        let disks = self.interpreter.list_disks()?;
        let count = disks.len();
        for disk in disks {
            self.bus.emit_disk_and_partition(EventKind::Add, disk);
        }
        Ok(count)
    }

    fn resolve_device(&self, request: &MountRequest) -> Result<ResolvedDevice> {
        let resolver = self.interpreter.resolver();

        let kernel_name = match (&request.device, &request.device_id) {
            (Some(device), _) if !device.trim().is_empty() => {
                device.trim().trim_start_matches("/dev/").to_string()
            }
            (_, Some(id)) => resolver
                .kernel_name(id)
                .ok_or_else(|| Error::DeviceNotFound { device: id.clone() })?,
            _ => {
                return Err(Error::InvalidMountRequest(format!(
                    "no device given for {}",
                    request.path
                )))
            }
        };

        let device_id = match &request.device_id {
            Some(id) => id.clone(),
            None => resolver.resolve(&kernel_name).unwrap_or_default(),
        };

        Ok(ResolvedDevice {
            node: resolver.device_node(&kernel_name),
            kernel_name,
            device_id,
        })
    }

    /// Move `path` into `next`, refusing while another transition runs
    fn begin(&self, path: &str, next: MountState) -> Result<MountState> {
        let mut entry = self
            .states
            .entry(path.to_string())
            .or_insert(MountState::Unmounted);
        let previous = *entry;
        if previous.is_transient() {
            return Err(Error::OperationInProgress {
                path: path.to_string(),
            });
        }
        *entry = next;
        Ok(previous)
    }

    fn set_state(&self, path: &str, state: MountState) {
        self.states.insert(path.to_string(), state);
    }

    fn ensure_dir(&self, target: &Path) -> Result<bool> {
        if target.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(target)?;
        fs::set_permissions(target, fs::Permissions::from_mode(self.config.dir_mode))?;
        Ok(true)
    }

    fn remove_dir(&self, target: &Path) {
        if let Err(e) = fs::remove_dir(target) {
            debug!("Leaving mount directory {:?}: {}", target, e);
        }
    }
}

fn validate_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidMountRequest("mount path is empty".to_string()));
    }
    let p = Path::new(trimmed);
    if !p.is_absolute() {
        return Err(Error::InvalidMountRequest(format!("{} is not absolute", trimmed)));
    }
    if p.components().any(|c| c == Component::ParentDir) {
        return Err(Error::InvalidMountRequest(format!("{} contains '..'", trimmed)));
    }
    if p == Path::new("/") {
        return Err(Error::InvalidMountRequest("cannot mount over /".to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn same_file(a: &Path, b: &Path) -> bool {
    let a = fs::canonicalize(a).unwrap_or_else(|_| a.to_path_buf());
    let b = fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    a == b
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::ports::ActiveMount;
    use crate::events::EventCategory;
    use crate::hardware::lsblk::tests::ScriptedRunner;
    use crate::hardware::{ResolverConfig, StableIdResolver};
    use crate::store::tests::test_db;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::os::unix::fs::symlink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const LSBLK: &str = r#"{"blockdevices": [
        {"name": "sda", "fstype": null, "children": [
            {"name": "sda1", "label": "data", "fstype": "ext4", "mountpoint": null}
        ]},
        {"name": "sdb", "fstype": null, "children": [
            {"name": "sdb1", "fstype": "xfs", "mountpoint": null}
        ]},
        {"name": "sdc", "fstype": null, "children": [
            {"name": "sdc1", "fstype": null, "mountpoint": null}
        ]}
    ]}"#;

    /// In-memory mount table
    #[derive(Default)]
    pub(crate) struct FakeMounter {
        pub table: Mutex<HashMap<PathBuf, ActiveMount>>,
        pub fail_mount: Mutex<Option<i32>>,
        /// EBUSY answers left before an unmount succeeds
        pub busy: AtomicUsize,
        pub unmount_modes: Mutex<Vec<UnmountMode>>,
    }

    impl FakeMounter {
        pub fn preload(&self, target: &Path, source: &Path, fs_type: &str) {
            self.table.lock().insert(
                target.to_path_buf(),
                ActiveMount {
                    source: source.display().to_string(),
                    fs_type: fs_type.to_string(),
                },
            );
        }
    }

    impl Mounter for FakeMounter {
        fn mount(&self, source: &Path, target: &Path, fs_type: &str, _: MountFlags, _: Option<&str>) -> io::Result<()> {
            if let Some(code) = *self.fail_mount.lock() {
                return Err(io::Error::from_raw_os_error(code));
            }
            assert!(target.is_dir(), "mount target must exist");
            self.preload(target, source, fs_type);
            Ok(())
        }

        fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()> {
            self.unmount_modes.lock().push(mode);
            if self.busy.load(Ordering::SeqCst) > 0 {
                self.busy.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            match self.table.lock().remove(target) {
                Some(_) => Ok(()),
                None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
            }
        }

        fn mounted_at(&self, target: &Path) -> io::Result<Option<ActiveMount>> {
            Ok(self.table.lock().get(target).cloned())
        }
    }

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub mounter: Arc<FakeMounter>,
        pub repo: MountPointRepository,
        pub bus: Arc<EventBus>,
        pub manager: VolumeManager,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let dev = dir.path().join("dev");
            let by_id = dir.path().join("by-id");
            fs::create_dir_all(&dev).unwrap();
            fs::create_dir_all(&by_id).unwrap();
            for name in ["sda1", "sdb1", "sdc1"] {
                fs::write(dev.join(name), b"").unwrap();
            }
            symlink(dev.join("sda1"), by_id.join("ata-DISK_A-part1")).unwrap();
            symlink(dev.join("sdb1"), by_id.join("ata-DISK_B-part1")).unwrap();
            symlink(dev.join("sdc1"), by_id.join("ata-DISK_C-part1")).unwrap();

            let resolver = StableIdResolver::new(ResolverConfig {
                by_id_dir: by_id,
                dev_root: dev,
            });
            let interpreter = Arc::new(BlockDeviceInterpreter::new(
                Arc::new(ScriptedRunner::ok(LSBLK)),
                resolver,
            ));

            let mounter = Arc::new(FakeMounter::default());
            let repo = MountPointRepository::new(test_db());
            let bus = Arc::new(EventBus::new());
            let manager = VolumeManager::new(
                VolumeManagerConfig::default(),
                mounter.clone(),
                interpreter,
                repo.clone(),
                bus.clone(),
            );

            Self {
                dir,
                mounter,
                repo,
                bus,
                manager,
            }
        }

        pub fn mount_path(&self, name: &str) -> String {
            self.dir.path().join("mnt").join(name).display().to_string()
        }

        pub fn dev(&self, name: &str) -> PathBuf {
            self.dir.path().join("dev").join(name)
        }

        pub fn request(&self, name: &str, device: &str) -> MountRequest {
            MountRequest {
                path: self.mount_path(name),
                device: Some(device.to_string()),
                ..Default::default()
            }
        }

        pub fn count_events(&self) -> Arc<Mutex<Vec<EventKind>>> {
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            let _ = self.bus.on_mount_point(move |_, e| {
                sink.lock().push(e.kind);
                Ok(())
            });
            events
        }
    }

    #[test]
    fn test_mount_twice_is_already_mounted() {
        let fx = Fixture::new();
        let events = fx.count_events();
        let request = fx.request("data", "sda1");

        let data = fx.manager.mount_volume(&request).unwrap();
        assert!(data.is_mounted);
        assert_eq!(data.fs_type, "ext4");
        assert_eq!(data.device_id, "by-id-ata-DISK_A-part1");

        assert_matches!(fx.manager.mount_volume(&request), Err(Error::AlreadyMounted { .. }));
        assert_eq!(*events.lock(), vec![EventKind::Add]);
        assert_eq!(fx.manager.state(&request.path), MountState::Mounted);
    }

    #[test]
    fn test_mount_persists_resolved_row() {
        let fx = Fixture::new();
        let mut request = fx.request("media", "/dev/sdb1");
        request.flags = MountFlags::NOATIME;
        request.is_to_mount_at_startup = true;
        fx.manager.mount_volume(&request).unwrap();

        let row = fx.repo.get(&request.path).unwrap().unwrap();
        assert_eq!(row.device_id, "by-id-ata-DISK_B-part1");
        assert_eq!(row.fs_type.as_deref(), Some("xfs"));
        assert_eq!(row.flags, MountFlags::NOATIME);
        assert!(row.is_to_mount_at_startup);
    }

    #[test]
    fn test_mount_by_stable_id() {
        let fx = Fixture::new();
        let request = MountRequest {
            path: fx.mount_path("data"),
            device_id: Some("by-id-ata-DISK_A-part1".into()),
            ..Default::default()
        };
        let data = fx.manager.mount_volume(&request).unwrap();
        assert!(data.source.ends_with("dev/sda1"));
    }

    #[test]
    fn test_conflicting_mount_fails() {
        let fx = Fixture::new();
        fx.manager.mount_volume(&fx.request("data", "sda1")).unwrap();

        assert_matches!(
            fx.manager.mount_volume(&fx.request("data", "sdb1")),
            Err(Error::MountConflict { .. })
        );

        let mut other_fs = fx.request("data", "sda1");
        other_fs.fs_type = Some("vfat".into());
        assert_matches!(fx.manager.mount_volume(&other_fs), Err(Error::MountConflict { .. }));
        assert_eq!(fx.manager.state(&other_fs.path), MountState::Mounted);
    }

    #[test]
    fn test_unknown_filesystem_rejected() {
        let fx = Fixture::new();
        assert_matches!(
            fx.manager.mount_volume(&fx.request("raw", "sdc1")),
            Err(Error::InvalidMountRequest(_))
        );
        let mut request = fx.request("raw", "sdc1");
        request.fs_type = Some("ntfs3".into());
        fx.manager.mount_volume(&request).unwrap();
    }

    #[test]
    fn test_mount_failure_cleans_directory() {
        let fx = Fixture::new();
        let events = fx.count_events();
        *fx.mounter.fail_mount.lock() = Some(libc::EINVAL);

        let request = fx.request("broken", "sda1");
        assert_matches!(fx.manager.mount_volume(&request), Err(Error::MountFailed { .. }));
        assert!(!Path::new(&request.path).exists());
        assert!(fx.repo.get(&request.path).unwrap().is_none());
        assert!(events.lock().is_empty());
        assert_eq!(fx.manager.state(&request.path), MountState::Error);

        // Error is recoverable
        *fx.mounter.fail_mount.lock() = None;
        fx.manager.mount_volume(&request).unwrap();
        assert_eq!(fx.manager.state(&request.path), MountState::Mounted);
    }

    #[test]
    fn test_invalid_paths() {
        let fx = Fixture::new();
        for path in ["", "relative/dir", "/mnt/../etc", "/"] {
            let request = MountRequest {
                path: path.to_string(),
                device: Some("sda1".into()),
                ..Default::default()
            };
            assert_matches!(fx.manager.mount_volume(&request), Err(Error::InvalidMountRequest(_)));
        }

        let no_device = MountRequest {
            path: fx.mount_path("x"),
            ..Default::default()
        };
        assert_matches!(fx.manager.mount_volume(&no_device), Err(Error::InvalidMountRequest(_)));
    }

    #[test]
    fn test_missing_device_not_found() {
        let fx = Fixture::new();
        assert_matches!(
            fx.manager.mount_volume(&fx.request("x", "sdz9")),
            Err(Error::DeviceNotFound { .. })
        );
    }

    #[test]
    fn test_unmount_emits_remove_after_confirmation() {
        let fx = Fixture::new();
        let events = fx.count_events();
        let request = fx.request("data", "sda1");
        fx.manager.mount_volume(&request).unwrap();

        let data = fx.manager.unmount_volume(&request.path, UnmountOptions::default()).unwrap();
        assert!(!data.is_mounted);
        assert_eq!(*events.lock(), vec![EventKind::Add, EventKind::Remove]);
        assert!(!Path::new(&request.path).exists());

        // Intent stays recorded
        assert!(fx.repo.get_active(&request.path).unwrap().is_some());

        assert_matches!(
            fx.manager.unmount_volume(&request.path, UnmountOptions::default()),
            Err(Error::AlreadyUnmounted { .. })
        );
        assert_matches!(
            fx.manager.unmount_volume(&fx.mount_path("never"), UnmountOptions::default()),
            Err(Error::MountPointNotFound { .. })
        );
    }

    #[test]
    fn test_busy_unmount_escalates() {
        let fx = Fixture::new();
        let request = fx.request("data", "sda1");
        fx.manager.mount_volume(&request).unwrap();

        fx.mounter.busy.store(2, Ordering::SeqCst);
        let options = UnmountOptions {
            force: true,
            lazy: true,
        };
        fx.manager.unmount_volume(&request.path, options).unwrap();
        assert_eq!(
            *fx.mounter.unmount_modes.lock(),
            vec![UnmountMode::Normal, UnmountMode::Force, UnmountMode::Lazy]
        );
    }

    #[test]
    fn test_busy_unmount_without_escalation_fails() {
        let fx = Fixture::new();
        let events = fx.count_events();
        let request = fx.request("data", "sda1");
        fx.manager.mount_volume(&request).unwrap();

        fx.mounter.busy.store(1, Ordering::SeqCst);
        assert_matches!(
            fx.manager.unmount_volume(&request.path, UnmountOptions::default()),
            Err(Error::UnmountFailed { .. })
        );
        assert_eq!(*events.lock(), vec![EventKind::Add]);
        assert_eq!(fx.manager.state(&request.path), MountState::Error);
    }

    #[test]
    fn test_automount_sweep_continues_past_already_mounted() {
        let fx = Fixture::new();
        let events = fx.count_events();

        let rows = [
            ("a", "by-id-ata-DISK_A-part1", "ext4"),
            ("b", "by-id-ata-DISK_B-part1", "xfs"),
            ("c", "by-id-ata-DISK_C-part1", "ext4"),
        ];
        for (name, id, fs_type) in rows {
            let mut row = MountPointPath::new(fx.mount_path(name), id);
            row.fs_type = Some(fs_type.into());
            row.is_to_mount_at_startup = true;
            fx.repo.save(&row).unwrap();
        }
        // Second volume is already there
        fs::create_dir_all(fx.mount_path("b")).unwrap();
        fx.mounter.preload(Path::new(&fx.mount_path("b")), &fx.dev("sdb1"), "xfs");

        let report = fx.manager.automount_all().unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.already_in_state, 1);
        assert!(report.is_clean());

        assert_eq!(*events.lock(), vec![EventKind::Add, EventKind::Add]);
        assert!(fx.mounter.mounted_at(Path::new(&fx.mount_path("c"))).unwrap().is_some());
    }

    #[test]
    fn test_automount_sweep_survives_failures() {
        let fx = Fixture::new();
        let rows = [("a", "by-id-vanished"), ("b", "by-id-ata-DISK_B-part1")];
        for (name, id) in rows {
            let mut row = MountPointPath::new(fx.mount_path(name), id);
            row.is_to_mount_at_startup = true;
            fx.repo.save(&row).unwrap();
        }

        let report = fx.manager.automount_all().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, fx.mount_path("a"));
        assert!(fx.mounter.mounted_at(Path::new(&fx.mount_path("b"))).unwrap().is_some());
    }

    #[test]
    fn test_refresh_disks_emits_disk_then_partitions() {
        let fx = Fixture::new();
        let disks = Arc::new(AtomicUsize::new(0));
        let parts = Arc::new(AtomicUsize::new(0));
        let d = disks.clone();
        let _ = fx.bus.on_disk(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let p = parts.clone();
        let _ = fx.bus.on_partition(move |_, _| {
            p.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(fx.manager.refresh_disks().unwrap(), 3);
        assert_eq!(disks.load(Ordering::SeqCst), 3);
        assert_eq!(parts.load(Ordering::SeqCst), 3);
        assert_eq!(fx.bus.listener_count(EventCategory::Disk), 1);
    }
}
