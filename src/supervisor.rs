//! Host supervisor share exports
//!
//! The supervisor mounts exported shares on the host side. On shutdown every
//! exported share is released so the host does not hold stale network mounts.

use crate::domain::ports::SupervisorApi;
use crate::domain::ExportedShare;
use crate::error::{Error, Result};
use crate::store::ShareRepository;
use crate::volume::SweepReport;
use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const EXPORT_ATTEMPTS: u32 = 3;
const EXPORT_DEADLINE: Duration = Duration::from_secs(30);

/// Supervisor stand-in for hosts without one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSupervisor;

#[async_trait]
impl SupervisorApi for NoopSupervisor {
    async fn mount_share(&self, share: &ExportedShare) -> Result<()> {
        debug!("No supervisor, skipping export of {}", share.name);
        Ok(())
    }

    async fn unmount_share(&self, name: &str) -> Result<()> {
        debug!("No supervisor, skipping release of {}", name);
        Ok(())
    }
}

/// Pushes share exports to the supervisor
pub struct ShareExporter {
    shares: ShareRepository,
    supervisor: Arc<dyn SupervisorApi>,
    retry_delay: Duration,
}

impl ShareExporter {
    pub fn new(shares: ShareRepository, supervisor: Arc<dyn SupervisorApi>) -> Self {
        Self {
            shares,
            supervisor,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn exportable(&self) -> Result<Vec<ExportedShare>> {
        Ok(self
            .shares
            .list()?
            .into_iter()
            .filter(|s| !s.disabled && s.usage.is_externally_exported())
            .collect())
    }

    /// Release every exported share. Failures are recorded and the sweep
    /// moves on.
    pub async fn release_all(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for share in self.exportable()? {
            report.attempted += 1;
            match self.supervisor.unmount_share(&share.name).await {
                Ok(()) => {
                    info!("Released share {}", share.name);
                    report.succeeded += 1;
                }
                Err(e) => {
                    error!("Failed to release share {}: {}", share.name, e);
                    report.failed.push((share.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn export_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_delay)
            .with_multiplier(2.0)
            .with_max_interval(self.retry_delay * 4)
            .with_max_elapsed_time(Some(EXPORT_DEADLINE))
            .build()
    }

    async fn export_one(&self, share: &ExportedShare) -> Result<()> {
        let mut attempt: u32 = 0;
        retry_notify(
            self.export_backoff(),
            || {
                attempt += 1;
                let last = attempt >= EXPORT_ATTEMPTS;
                async move {
                    self.supervisor.mount_share(share).await.map_err(|e| {
                        if last {
                            backoff::Error::permanent(e)
                        } else {
                            backoff::Error::transient(e)
                        }
                    })
                }
            },
            |e: Error, wait: Duration| {
                warn!("Export of {} failed, retrying in {:?}: {}", share.name, wait, e);
            },
        )
        .await
    }

    /// Export every share, retrying each with exponential backoff
    pub async fn export_all(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for share in self.exportable()? {
            report.attempted += 1;
            match self.export_one(&share).await {
                Ok(()) => {
                    info!("Exported share {}", share.name);
                    report.succeeded += 1;
                }
                Err(e) => {
                    error!("Giving up on exporting {}: {}", share.name, e);
                    report.failed.push((share.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{MountPointPath, ShareUsage};
    use crate::store::tests::test_db;
    use crate::store::MountPointRepository;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Fails calls for the listed shares, a number of times each
    #[derive(Default)]
    pub(crate) struct FakeSupervisor {
        pub failures: Mutex<HashMap<String, usize>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeSupervisor {
        pub fn failing(name: &str, times: usize) -> Self {
            let fake = Self::default();
            fake.failures.lock().insert(name.to_string(), times);
            fake
        }

        fn call(&self, op: &str, name: &str) -> Result<()> {
            self.calls.lock().push(format!("{} {}", op, name));
            let mut failures = self.failures.lock();
            match failures.get_mut(name) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(Error::Supervisor {
                        operation: op.to_string(),
                        reason: "unavailable".into(),
                    })
                }
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl SupervisorApi for FakeSupervisor {
        async fn mount_share(&self, share: &ExportedShare) -> Result<()> {
            self.call("mount", &share.name)
        }

        async fn unmount_share(&self, name: &str) -> Result<()> {
            self.call("unmount", name)
        }
    }

    fn seeded() -> ShareRepository {
        let db = test_db();
        let mounts = MountPointRepository::new(db.clone());
        let shares = ShareRepository::new(db);
        for (name, usage, disabled) in [
            ("backup", ShareUsage::Backup, false),
            ("config", ShareUsage::Internal, false),
            ("media", ShareUsage::Media, false),
            ("old", ShareUsage::Share, true),
            ("share", ShareUsage::Share, false),
        ] {
            let path = format!("/mnt/{}", name);
            mounts.save(&MountPointPath::new(&path, format!("by-id-{}", name))).unwrap();
            let mut share = ExportedShare::new(name, &path, usage);
            share.disabled = disabled;
            shares.save(&share).unwrap();
        }
        shares
    }

    #[tokio::test]
    async fn test_release_all_continues_after_failure() {
        let supervisor = Arc::new(FakeSupervisor::failing("media", usize::MAX));
        let exporter = ShareExporter::new(seeded(), supervisor.clone());

        let report = exporter.release_all().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "media");
        assert_eq!(
            *supervisor.calls.lock(),
            vec!["unmount backup", "unmount media", "unmount share"]
        );
    }

    #[tokio::test]
    async fn test_export_all_retries() {
        let supervisor = Arc::new(FakeSupervisor::failing("backup", 2));
        let exporter =
            ShareExporter::new(seeded(), supervisor.clone()).with_retry_delay(Duration::from_millis(1));

        let report = exporter.export_all().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded, 3);
        let backup_calls = supervisor.calls.lock().iter().filter(|c| *c == "mount backup").count();
        assert_eq!(backup_calls, 3);
    }

    #[tokio::test]
    async fn test_export_backs_off_between_attempts() {
        let supervisor = Arc::new(FakeSupervisor::failing("media", 2));
        let exporter =
            ShareExporter::new(seeded(), supervisor.clone()).with_retry_delay(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let report = exporter.export_all().await.unwrap();
        assert!(report.is_clean());
        // 20ms then 40ms, each randomized by at most half
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_export_all_gives_up() {
        let supervisor = Arc::new(FakeSupervisor::failing("share", usize::MAX));
        let exporter =
            ShareExporter::new(seeded(), supervisor.clone()).with_retry_delay(Duration::from_millis(1));

        let report = exporter.export_all().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        let share_calls = supervisor.calls.lock().iter().filter(|c| *c == "mount share").count();
        assert_eq!(share_calls, EXPORT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_noop_supervisor() {
        let report = ShareExporter::new(seeded(), Arc::new(NoopSupervisor))
            .release_all()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 3);
    }
}
