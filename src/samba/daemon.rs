//! Samba daemon control through `testparm` and `smbcontrol`

use crate::domain::ports::{CommandRunner, ReloadOutcome, SambaDaemon};
use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const NOT_RUNNING: &str = "Can't find pid";

pub struct SystemSambaDaemon {
    runner: Arc<dyn CommandRunner>,
}

impl SystemSambaDaemon {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl SambaDaemon for SystemSambaDaemon {
    fn test_config(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let output = self
            .runner
            .run("testparm", &["-s", &path_arg])
            .map_err(|e| Error::CommandFailed {
                command: "testparm".into(),
                reason: e.to_string(),
            })?;

        if !output.success() {
            return Err(Error::SambaConfigInvalid(output.diagnostic().to_string()));
        }
        debug!("testparm accepted {}", path.display());
        Ok(())
    }

    fn reload(&self) -> Result<ReloadOutcome> {
        let output = self
            .runner
            .run("smbcontrol", &["smbd", "reload-config"])
            .map_err(|e| Error::SambaReload(e.to_string()))?;

        if output.success() {
            return Ok(ReloadOutcome::Reloaded);
        }

        let diagnostic = output.diagnostic().to_string();
        if diagnostic.contains(NOT_RUNNING) {
            warn!("smbd is not running, new config applies on next start");
            return Ok(ReloadOutcome::NotRunning);
        }
        Err(Error::SambaReload(diagnostic))
    }
}
