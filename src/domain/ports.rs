//! Domain Ports - Boundaries to the operating system and the host
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems. Adapters implement them for the real system; tests
//! implement them with in-memory fakes.

use super::model::{ExportedShare, MountFlags};
use crate::error::Result;
use async_trait::async_trait;
use std::io;
use std::path::Path;

// =============================================================================
// External Commands
// =============================================================================

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr if present, stdout otherwise
    pub fn diagnostic(&self) -> &str {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim()
        } else {
            err
        }
    }
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Run a program feeding `input` on stdin
    fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> io::Result<CommandOutput>;
}

// =============================================================================
// Mounting
// =============================================================================

/// What the kernel reports for a mounted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMount {
    pub source: String,
    pub fs_type: String,
}

/// Unmount strength, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    Normal,
    Force,
    Lazy,
}

impl std::fmt::Display for UnmountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmountMode::Normal => write!(f, "normal"),
            UnmountMode::Force => write!(f, "force"),
            UnmountMode::Lazy => write!(f, "lazy"),
        }
    }
}

/// OS mount table access
pub trait Mounter: Send + Sync {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: Option<&str>,
    ) -> io::Result<()>;

    fn unmount(&self, target: &Path, mode: UnmountMode) -> io::Result<()>;

    /// The mount currently covering exactly `target`, if any
    fn mounted_at(&self, target: &Path) -> io::Result<Option<ActiveMount>>;
}

// =============================================================================
// Samba Daemon
// =============================================================================

/// Result of asking smbd to pick up a new configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    /// No daemon to signal; the next start reads the new file
    NotRunning,
}

/// Control over the Samba daemon
pub trait SambaDaemon: Send + Sync {
    /// Validate a rendered configuration file
    fn test_config(&self, path: &Path) -> Result<()>;

    /// Make the running daemon reload its configuration
    fn reload(&self) -> Result<ReloadOutcome>;
}

// =============================================================================
// Host Supervisor
// =============================================================================

/// Network share exports managed by the host supervisor
#[async_trait]
pub trait SupervisorApi: Send + Sync {
    /// Mount/export a share on the host
    async fn mount_share(&self, share: &ExportedShare) -> Result<()>;

    /// Unmount/release a previously exported share
    async fn unmount_share(&self, name: &str) -> Result<()>;
}
