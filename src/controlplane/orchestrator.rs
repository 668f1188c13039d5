//! Service Orchestrator
//!
//! Owns the startup and shutdown sequences:
//! - first-run import and internal account secrets
//! - OS/Samba account provisioning
//! - startup automount sweep
//! - initial Samba apply and the debounced auto-apply task
//! - releasing supervisor exports on shutdown

use super::bootstrap::{BootstrapConfig, ImportSummary};
use crate::domain::{DirtySections, SambaStatus};
use crate::error::{Error, Result};
use crate::events::{EventBus, Subscription};
use crate::samba::{AccountProvisioner, AutoApply, SambaService, MOUNT_USER};
use crate::store::properties::{CONFIG_VERSION, LOG_LEVEL, MOUNT_USER_PASSWORD};
use crate::store::{Database, MountPointRepository, PropertyRepository, ShareRepository, UserRepository};
use crate::supervisor::ShareExporter;
use crate::volume::{SweepReport, VolumeManager};
use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Written once the first-run import completed
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const MOUNT_USER_PASSWORD_LEN: usize = 24;

// =============================================================================
// Orchestrator Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Level persisted as the `LogLevel` property
    pub log_level: String,
    /// First-run document, built-in default when `None`
    pub bootstrap: Option<PathBuf>,
    /// Quiet period before the auto-apply task writes smb.conf
    pub apply_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bootstrap: None,
            apply_delay: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Phase & Reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Set when this start performed the first-run import
    pub imported: Option<ImportSummary>,
    pub accounts_created: usize,
    /// (username, error)
    pub accounts_failed: Vec<(String, String)>,
    pub automount: SweepReport,
    pub samba: SambaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub phase: OrchestratorPhase,
    pub dirty: DirtySections,
    pub config_path: String,
}

/// The wired components the orchestrator drives
pub struct Components {
    pub db: Database,
    pub bus: Arc<EventBus>,
    pub volumes: Arc<VolumeManager>,
    pub samba: Arc<SambaService>,
    pub accounts: Arc<AccountProvisioner>,
    pub exporter: ShareExporter,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    config: OrchestratorConfig,
    properties: PropertyRepository,
    users: UserRepository,
    mount_points: MountPointRepository,
    shares: ShareRepository,
    bus: Arc<EventBus>,
    volumes: Arc<VolumeManager>,
    samba: Arc<SambaService>,
    accounts: Arc<AccountProvisioner>,
    exporter: ShareExporter,
    phase: RwLock<OrchestratorPhase>,
    cancel: CancellationToken,
    auto_apply: Mutex<Option<JoinHandle<()>>>,
    /// Keeps the dirty tracker wired to the bus
    _tracking: Vec<Subscription>,
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MOUNT_USER_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, components: Components) -> Arc<Self> {
        let Components {
            db,
            bus,
            volumes,
            samba,
            accounts,
            exporter,
        } = components;
        let tracking = samba.tracker().attach(&bus);

        Arc::new(Self {
            config,
            properties: PropertyRepository::new(db.clone()),
            users: UserRepository::new(db.clone()),
            mount_points: MountPointRepository::new(db.clone()),
            shares: ShareRepository::new(db),
            bus,
            volumes,
            samba,
            accounts,
            exporter,
            phase: RwLock::new(OrchestratorPhase::Created),
            cancel: CancellationToken::new(),
            auto_apply: Mutex::new(None),
            _tracking: tracking,
        })
    }

    pub fn phase(&self) -> OrchestratorPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: OrchestratorPhase) {
        info!("Orchestrator phase: {:?}", phase);
        *self.phase.write() = phase;
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the startup sequence. Any step error aborts startup and leaves
    /// the orchestrator `Failed`.
    pub async fn startup(&self) -> Result<StartupReport> {
        self.set_phase(OrchestratorPhase::Starting);
        match self.run_startup().await {
            Ok(report) => {
                self.set_phase(OrchestratorPhase::Running);
                Ok(report)
            }
            Err(e) => {
                error!("Startup failed: {}", e);
                self.set_phase(OrchestratorPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run_startup(&self) -> Result<StartupReport> {
        let imported = self.first_run_import()?;

        self.properties.set(LOG_LEVEL, &self.config.log_level)?;

        let (accounts_created, accounts_failed) = self.provision_accounts().await?;

        let volumes = self.volumes.clone();
        let automount = blocking(move || volumes.automount_all()).await?;
        if !automount.is_clean() {
            warn!("{} startup mounts failed", automount.failed.len());
        }

        let samba = self.samba.clone();
        let samba = blocking(move || samba.write_and_restart()).await?;

        Ok(StartupReport {
            imported,
            accounts_created,
            accounts_failed,
            automount,
            samba,
        })
    }

    fn first_run_import(&self) -> Result<Option<ImportSummary>> {
        if self.properties.get(CONFIG_VERSION)?.is_some() {
            return Ok(None);
        }

        info!("No config version found, importing initial configuration");
        let bootstrap = BootstrapConfig::load(self.config.bootstrap.as_deref())?;
        let summary = bootstrap.import(&self.properties, &self.users, &self.mount_points, &self.shares)?;

        self.properties
            .set_internal(MOUNT_USER_PASSWORD, &generate_password())?;
        self.properties
            .set_internal(CONFIG_VERSION, &CURRENT_CONFIG_VERSION)?;
        Ok(Some(summary))
    }

    /// The internal mount account first, then every persisted user. Only a
    /// missing internal password is fatal.
    async fn provision_accounts(&self) -> Result<(usize, Vec<(String, String)>)> {
        let mount_password: String = self
            .properties
            .get_value(MOUNT_USER_PASSWORD)?
            .ok_or_else(|| Error::Internal("internal mount account has no password".into()))?;

        let mut accounts = vec![(MOUNT_USER.to_string(), mount_password)];
        accounts.extend(self.users.list()?.into_iter().map(|u| (u.username, u.password)));

        let provisioner = self.accounts.clone();
        let (total, failed) = blocking(move || {
            let mut failed = Vec::new();
            for (username, password) in &accounts {
                if let Err(e) = provisioner.create_account(username, password) {
                    error!("Failed to create account {}: {}", username, e);
                    failed.push((username.clone(), e.to_string()));
                }
            }
            Ok((accounts.len(), failed))
        })
        .await?;
        Ok((total - failed.len(), failed))
    }

    /// Start the background auto-apply task; a second call is a no-op
    pub fn spawn_auto_apply(&self) {
        let mut slot = self.auto_apply.lock();
        if slot.is_some() {
            return;
        }
        let task = AutoApply::new(self.samba.clone(), self.bus.clone(), self.config.apply_delay);
        *slot = Some(tokio::spawn(task.run(self.cancel.child_token())));
    }

    /// Ask the supervisor to export every share
    pub async fn export_shares(&self) -> Result<SweepReport> {
        self.exporter.export_all().await
    }

    /// Stop background work and release supervisor exports
    pub async fn shutdown(&self) -> Result<SweepReport> {
        self.set_phase(OrchestratorPhase::ShuttingDown);
        self.cancel.cancel();

        let handle = self.auto_apply.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Auto-apply task ended abnormally: {}", e);
            }
        }

        match self.exporter.release_all().await {
            Ok(report) => {
                if !report.is_clean() {
                    warn!("{} shares could not be released", report.failed.len());
                }
                self.set_phase(OrchestratorPhase::Stopped);
                Ok(report)
            }
            Err(e) => {
                error!("Shutdown sweep failed: {}", e);
                self.set_phase(OrchestratorPhase::Failed);
                Err(e)
            }
        }
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            phase: self.phase(),
            dirty: self.samba.tracker().snapshot(),
            config_path: self.samba.config_path().display().to_string(),
        }
    }
}
