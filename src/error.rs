//! Error types for provisioning runs
//!
//! Protocol errors come from the driver layer, domain errors are classified
//! from the tool's result codes, and policy errors are raised by
//! reconciliation before any mutation is issued.

use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// A structured failure reported by the tool (`status: ERROR`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub message: String,
    pub code: i64,
    pub exception_type: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exception_type.is_empty() {
            write!(f, "{} (code {})", self.message, self.code)
        } else {
            write!(
                f,
                "{} (code {}, {})",
                self.message, self.code, self.exception_type
            )
        }
    }
}

impl std::error::Error for CommandError {}

/// Error types for provisioning operations
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The tool could not be spawned or its output pipe could not be attached
    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited without printing a result line
    #[error("missing machine readable output from `{command}`")]
    MissingOutput { command: String },

    /// The final line was not a valid result object
    #[error("failed to decode tool output {line:?}: {source}")]
    ProtocolDecode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The result body did not have the expected shape
    #[error("failed to decode response body of `{command}`: {source}")]
    ResponseDecode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// Reading from or waiting on a child process failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("VM {name} already exists")]
    VmAlreadyExists { name: String },

    #[error("VM {name} not found")]
    VmNotFound { name: String },

    #[error("shrinking VM disks is not allowed (requested {requested} bytes, current disk size {current} bytes)")]
    DiskShrinkNotAllowed { requested: u64, current: u64 },

    #[error("invalid size {input:?}: expected digits followed by G or M")]
    InvalidSizeFormat { input: String },

    #[error("invalid cpu count {input:?}: {source}")]
    InvalidCpuCount {
        input: String,
        #[source]
        source: ParseIntError,
    },

    #[error("conflicting hyperthreading request: enable_htt and disable_htt are both set")]
    ConflictingHyperthreadingRequest,

    /// Unclassified `status: ERROR` result, message surfaced verbatim
    #[error(transparent)]
    CommandFailed(#[from] CommandError),

    #[error("installer app {path}: {reason}")]
    Installer { path: PathBuf, reason: String },

    #[error("source vm {name} does not exist. create it before cloning")]
    SourceVmMissing { name: String },

    #[error("command `{command}` in {vm_name} {detail}")]
    GuestCommand {
        vm_name: String,
        command: String,
        detail: String,
    },

    #[error("registry request failed: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("registry returned unsupported http response code: {0}")]
    RegistryStatus(u16),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Suspending the VM during cleanup failed; the VM was deleted on a best-effort basis
    #[error("cleanup of VM {vm_name} failed: {source}")]
    CleanupFailed {
        vm_name: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// True for errors that mean the run never owned the VM it named.
    ///
    /// Cleanup leaves the VM untouched when the recorded error is one of these.
    pub fn is_identity_conflict(&self) -> bool {
        matches!(
            self,
            ProvisionError::VmAlreadyExists { .. } | ProvisionError::VmNotFound { .. }
        )
    }

    /// Error code reported by the tool, if this came from a `status: ERROR` result
    pub fn command_code(&self) -> Option<i64> {
        match self {
            ProvisionError::CommandFailed(err) => Some(err.code),
            _ => None,
        }
    }
}
