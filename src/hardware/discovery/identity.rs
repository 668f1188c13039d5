//! Device Identity Resolver
//!
//! Maps volatile kernel device names (`sda1`) to stable identifiers derived
//! from the by-id symlink directory (`by-id-ata-WDC_WD40-part1`).
//!
//! Any directory read or link resolution failure counts as "no match"; the
//! resolver answers with an id or a confident `None`, never an error.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

// =============================================================================
// Constants
// =============================================================================

/// Prefix of every stable id
pub const STABLE_ID_PREFIX: &str = "by-id-";

const BY_ID_DIR: &str = "/dev/disk/by-id";
const DEV_ROOT: &str = "/dev";

// =============================================================================
// Resolver Configuration
// =============================================================================

/// Where to look for devices and their stable links
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Directory of stable symlinks
    pub by_id_dir: PathBuf,
    /// Directory holding kernel device nodes (for testing)
    pub dev_root: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            by_id_dir: PathBuf::from(BY_ID_DIR),
            dev_root: PathBuf::from(DEV_ROOT),
        }
    }
}

// =============================================================================
// Stable Id Resolver
// =============================================================================

/// Resolves kernel device names to `by-id-<link>` identifiers
#[derive(Debug, Clone)]
pub struct StableIdResolver {
    config: ResolverConfig,
}

impl StableIdResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn default_resolver() -> Self {
        Self::new(ResolverConfig::default())
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `kernel_name` to a stable id.
    ///
    /// Links are visited in lexicographic order, so when a device has several
    /// aliases the smallest name wins on every run.
    pub fn resolve(&self, kernel_name: &str) -> Option<String> {
        self.aliases(kernel_name).into_iter().next()
    }

    /// Every stable id that points at `kernel_name`, sorted
    pub fn aliases(&self, kernel_name: &str) -> Vec<String> {
        let kernel_name = kernel_name.trim_start_matches("/dev/");
        if kernel_name.is_empty() {
            return Vec::new();
        }

        let wanted = self.config.dev_root.join(kernel_name);
        let wanted = fs::canonicalize(&wanted).unwrap_or(wanted);

        let mut names = self.link_names();
        names.sort();

        let matches: Vec<String> = names
            .into_iter()
            .filter(|name| {
                let link = self.config.by_id_dir.join(name);
                match fs::canonicalize(&link) {
                    Ok(target) => target == wanted,
                    Err(e) => {
                        trace!("Skipping unresolvable link {:?}: {}", link, e);
                        false
                    }
                }
            })
            .map(|name| format!("{}{}", STABLE_ID_PREFIX, name))
            .collect();

        if matches.is_empty() {
            debug!("No stable id for device {}", kernel_name);
        }
        matches
    }

    /// Path of the symlink behind a stable id
    pub fn link_path(&self, stable_id: &str) -> Option<PathBuf> {
        let name = stable_id.strip_prefix(STABLE_ID_PREFIX)?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(self.config.by_id_dir.join(name))
    }

    /// Kernel name currently behind a stable id
    pub fn kernel_name(&self, stable_id: &str) -> Option<String> {
        let link = self.link_path(stable_id)?;
        let target = fs::canonicalize(link).ok()?;
        target.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    /// Device node for a kernel name
    pub fn device_node(&self, kernel_name: &str) -> PathBuf {
        self.config.dev_root.join(kernel_name.trim_start_matches("/dev/"))
    }

    fn link_names(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.config.by_id_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {:?}: {}", self.config.by_id_dir, e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_symlink(&entry.path()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
