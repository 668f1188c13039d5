//! NAS Share Reconciler
//!
//! Runs the startup sequence (first-run import, accounts, automount, Samba
//! apply), keeps smb.conf in sync while running, and releases supervisor
//! exports on shutdown.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nas_share_reconciler::domain::ports::CommandRunner;
use nas_share_reconciler::samba::DEFAULT_TEMPLATE;
use nas_share_reconciler::store::{
    MountPointRepository, PropertyRepository, ShareRepository,
};
use nas_share_reconciler::{
    AccountProvisioner, BlockDeviceInterpreter, Components, Database, DeviceSupportChecker,
    DirtyStateTracker, Error, EventBus, NoopSupervisor, Orchestrator, OrchestratorConfig,
    ResolverConfig, Result, SambaConfig, SambaService, ShareExporter, StableIdResolver,
    SystemCommandRunner, SystemMounter, SystemSambaDaemon, VolumeManager, VolumeManagerConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NAS Share Reconciler - mounts and Samba shares from a persisted desired state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where the rendered smb.conf is written
    #[arg(long, env = "SAMBA_CONFIG", default_value = "")]
    samba_config: String,

    /// SQLite database file
    #[arg(long, env = "DATABASE", default_value = "/data/nas.db")]
    database: PathBuf,

    /// smb.conf template, built-in when omitted
    #[arg(long, env = "SAMBA_TEMPLATE")]
    template: Option<PathBuf>,

    /// JSON document imported on first start
    #[arg(long, env = "BOOTSTRAP_CONFIG")]
    bootstrap_config: Option<PathBuf>,

    /// Override the stable device link directory
    #[arg(long, env = "BY_ID_DIR")]
    by_id_dir: Option<PathBuf>,

    /// Override the device node directory
    #[arg(long, env = "DEV_ROOT")]
    dev_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run without a host supervisor
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Seconds of quiet before changes are applied to Samba
    #[arg(long, env = "APPLY_DELAY_SECS", default_value = "2")]
    apply_delay_secs: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if args.samba_config.trim().is_empty() {
        error!("missing samba config output path");
        return Err(Error::Configuration("missing samba config output path".into()));
    }

    info!("Starting NAS Share Reconciler");
    info!("  Version: {}", nas_share_reconciler::VERSION);
    info!("  Samba config: {}", args.samba_config);
    info!("  Database: {}", args.database.display());
    info!("  Standalone mode: {}", args.standalone);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
    let interpreter = build_interpreter(&args, runner.clone());

    let db = Database::open(&args.database)?;
    let version = db.migrate(interpreter.resolver())?;
    info!("Database at schema version {}", version);

    let template = match &args.template {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read template {}: {}", path.display(), e))
        })?,
        None => DEFAULT_TEMPLATE.to_string(),
    };

    let bus = Arc::new(EventBus::new());

    let volumes = Arc::new(VolumeManager::new(
        VolumeManagerConfig::default(),
        Arc::new(SystemMounter::new()),
        interpreter.clone(),
        MountPointRepository::new(db.clone()),
        bus.clone(),
    ));

    let samba = Arc::new(SambaService::new(
        SambaConfig {
            config_path: PathBuf::from(args.samba_config.trim()),
            template,
        },
        ShareRepository::new(db.clone()),
        MountPointRepository::new(db.clone()),
        PropertyRepository::new(db.clone()),
        Arc::new(SystemSambaDaemon::new(runner.clone())),
        Arc::new(DirtyStateTracker::new()),
        bus.clone(),
    ));

    let orch_config = OrchestratorConfig {
        log_level: args.log_level.clone(),
        bootstrap: args.bootstrap_config.clone(),
        apply_delay: Duration::from_secs(args.apply_delay_secs),
    };

    let orchestrator = Orchestrator::new(
        orch_config,
        Components {
            db: db.clone(),
            bus,
            volumes: volumes.clone(),
            samba,
            accounts: Arc::new(AccountProvisioner::new(runner)),
            exporter: ShareExporter::new(ShareRepository::new(db), Arc::new(NoopSupervisor)),
        },
    );

    match volumes.refresh_disks() {
        Ok(count) => info!("Discovered {} disks", count),
        Err(e) => warn!("Disk discovery failed: {}", e),
    }
    log_device_support(&interpreter);

    let report = orchestrator.startup().await?;
    info!(
        "Startup complete: {} accounts, {}/{} volumes mounted, {} shares exported",
        report.accounts_created,
        report.automount.succeeded + report.automount.already_in_state,
        report.automount.attempted,
        report.samba.shares
    );

    if !args.standalone {
        match orchestrator.export_shares().await {
            Ok(exported) => info!(
                "Exported {}/{} shares to supervisor",
                exported.succeeded, exported.attempted
            ),
            Err(e) => error!("Share export failed, continuing: {}", e),
        }
    }

    orchestrator.spawn_auto_apply();

    wait_for_shutdown().await?;

    let released = orchestrator.shutdown().await?;
    info!(
        "Shutdown complete: {}/{} shares released",
        released.succeeded, released.attempted
    );
    Ok(())
}

fn build_interpreter(args: &Args, runner: Arc<dyn CommandRunner>) -> Arc<BlockDeviceInterpreter> {
    if args.by_id_dir.is_none() && args.dev_root.is_none() {
        return BlockDeviceInterpreter::system();
    }

    let defaults = ResolverConfig::default();
    let resolver = StableIdResolver::new(ResolverConfig {
        by_id_dir: args.by_id_dir.clone().unwrap_or(defaults.by_id_dir),
        dev_root: args.dev_root.clone().unwrap_or(defaults.dev_root),
    });
    Arc::new(BlockDeviceInterpreter::new(runner, resolver))
}

fn log_device_support(interpreter: &BlockDeviceInterpreter) {
    let checker = DeviceSupportChecker::new(
        interpreter.resolver().config().dev_root.clone(),
        "/sys",
    );
    let Ok(disks) = interpreter.list_disks() else {
        return;
    };
    for disk in disks {
        let support = checker.check_device_support(&disk.name);
        debug!(
            "{}: spin-down {}, sg {}, ata {}",
            disk.name,
            if support.supported { "supported" } else { "unsupported" },
            support.supports_sg,
            support.supports_ata
        );
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    info!("Shutdown signal received");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["rusqlite=warn", "tokio=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
