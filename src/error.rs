//! Error types for the NAS Share Reconciler
//!
//! Provides structured error types for every reconciler component including
//! device discovery, mount lifecycle, persistence, and Samba reconciliation.

use thiserror::Error;

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Device access denied: {device}")]
    DeviceAccessDenied { device: String },

    #[error("Block device enumeration failed: {0}")]
    Enumeration(String),

    // =========================================================================
    // Mount Lifecycle Errors
    // =========================================================================
    #[error("Invalid mount request: {0}")]
    InvalidMountRequest(String),

    #[error("Mount point not found: {path}")]
    MountPointNotFound { path: String },

    #[error("Already mounted: {path}")]
    AlreadyMounted { path: String },

    #[error("Already unmounted: {path}")]
    AlreadyUnmounted { path: String },

    #[error("Mount conflict at {path}: {reason}")]
    MountConflict { path: String, reason: String },

    #[error("Operation already in progress for {path}")]
    OperationInProgress { path: String },

    #[error("Mount of {device} on {path} failed: {reason}")]
    MountFailed {
        device: String,
        path: String,
        reason: String,
    },

    #[error("Unmount of {path} failed: {reason}")]
    UnmountFailed { path: String, reason: String },

    // =========================================================================
    // Share / User Errors
    // =========================================================================
    #[error("Share not found: {name}")]
    ShareNotFound { name: String },

    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("Invalid share {name:?}: {reason}")]
    InvalidShare { name: String, reason: String },

    #[error("Device id {device_id} already in use by {path}")]
    DeviceIdInUse { device_id: String, path: String },

    // =========================================================================
    // External Tool Errors
    // =========================================================================
    #[error("Command failed: {command} - {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Supervisor {operation} failed: {reason}")]
    Supervisor { operation: String, reason: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Template render error: {0}")]
    TemplateRender(String),

    #[error("Samba configuration rejected: {0}")]
    SambaConfigInvalid(String),

    #[error("Samba reload failed: {0}")]
    SambaReload(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category an error falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device, share, user or mount point absent
    NotFound,
    /// Already mounted / already unmounted; idempotent callers treat as success
    AlreadyInDesiredState,
    /// Existing state is incompatible with the request
    Conflict,
    /// Request rejected before touching the system
    InvalidInput,
    /// Enumerator, mount syscall or other external tool failed
    ExternalToolFailure,
    /// Repository read/write failed
    PersistenceFailure,
    /// Template render or daemon reload failed
    ReconciliationFailure,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceNotFound { .. }
            | Error::MountPointNotFound { .. }
            | Error::ShareNotFound { .. }
            | Error::UserNotFound { .. } => ErrorKind::NotFound,

            Error::AlreadyMounted { .. } | Error::AlreadyUnmounted { .. } => {
                ErrorKind::AlreadyInDesiredState
            }

            Error::MountConflict { .. }
            | Error::OperationInProgress { .. }
            | Error::DeviceIdInUse { .. } => ErrorKind::Conflict,

            Error::InvalidMountRequest(_)
            | Error::InvalidShare { .. }
            | Error::Configuration(_) => ErrorKind::InvalidInput,

            Error::DeviceAccessDenied { .. }
            | Error::Enumeration(_)
            | Error::MountFailed { .. }
            | Error::UnmountFailed { .. }
            | Error::CommandFailed { .. }
            | Error::Supervisor { .. }
            | Error::Io(_) => ErrorKind::ExternalToolFailure,

            Error::Database(_) | Error::Migration { .. } => ErrorKind::PersistenceFailure,

            Error::TemplateRender(_) | Error::SambaConfigInvalid(_) | Error::SambaReload(_) => {
                ErrorKind::ReconciliationFailure
            }

            Error::Internal(_) | Error::JsonParse(_) => ErrorKind::Internal,
        }
    }

    /// True for already mounted / already unmounted
    pub fn is_already_in_desired_state(&self) -> bool {
        self.kind() == ErrorKind::AlreadyInDesiredState
    }

    /// True when the resource is absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExternalToolFailure
                | ErrorKind::ReconciliationFailure
                | ErrorKind::PersistenceFailure
        ) || matches!(self, Error::OperationInProgress { .. })
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::OperationInProgress { .. } | Error::Supervisor { .. } | Error::SambaReload(_)
        )
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::AlreadyMounted {
            path: "/mnt/data".into(),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyInDesiredState);
        assert!(err.is_already_in_desired_state());

        let err = Error::MountConflict {
            path: "/mnt/data".into(),
            reason: "different device".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = Error::DeviceNotFound {
            device: "sdz".into(),
        };
        assert!(err.is_not_found());

        let err = Error::TemplateRender("unterminated tag".into());
        assert_eq!(err.kind(), ErrorKind::ReconciliationFailure);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::SambaReload("smbd busy".into());
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let invalid = Error::InvalidMountRequest("empty path".into());
        assert!(!invalid.is_retryable());
        assert!(!invalid.is_transient());

        let conflict = Error::MountConflict {
            path: "/mnt/a".into(),
            reason: "fs mismatch".into(),
        };
        assert!(!conflict.is_retryable());
    }
}
