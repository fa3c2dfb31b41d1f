//! Process driver layer
//!
//! This module runs the virtualization tool and turns its output into
//! structured results:
//!
//! - [`protocol`]: the machine-readable result object and its error codes
//! - [`scanner`]: splits merged output into progress lines and the final line
//! - [`process`]: the real driver, spawning the tool with tokio
//! - [`scripted`]: an in-memory driver with canned replies, used by tests
//!
//! # Architecture
//!
//! The driver only knows about argument vectors and results. Which verbs
//! exist and how their error codes map onto domain errors is the
//! business of [`crate::client`].

pub mod process;
pub mod protocol;
pub mod scanner;
pub mod scripted;

pub use process::ProcessDriver;
pub use protocol::{MachineReadableOutput, Status};
pub use scripted::{ScriptedDriver, ScriptedReply};

use crate::error::Result;
use async_trait::async_trait;

/// Callback receiving progress lines while a streaming command runs
pub type ProgressSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Exit code the tool uses when the guest connection drops mid-command
pub const GUEST_DISCONNECT_CODE: i32 = 125;

/// Abstraction over how tool commands are executed
#[async_trait]
pub trait CommandDriver: Send + Sync {
    /// Run a command and return its decoded result.
    ///
    /// A `status: ERROR` result is returned as
    /// [`ProvisionError::CommandFailed`](crate::error::ProvisionError::CommandFailed).
    async fn invoke(&self, args: &[String]) -> Result<MachineReadableOutput>;

    /// Run a long command, forwarding every progress line to `progress`
    async fn invoke_streaming(
        &self,
        args: &[String],
        progress: &ProgressSink<'_>,
    ) -> Result<MachineReadableOutput>;

    /// Run a command inside the guest, feeding `input` to its shell on stdin
    async fn run_in_guest(&self, args: &[String], input: &str) -> Result<GuestOutput>;
}

/// How a guest command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestExit {
    Success,
    Failed(i32),
    /// The connection to the guest dropped
    Disconnected,
}

impl GuestExit {
    /// Classify a process exit code; a missing code counts as a plain failure
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => GuestExit::Success,
            Some(GUEST_DISCONNECT_CODE) => GuestExit::Disconnected,
            Some(code) => GuestExit::Failed(code),
            None => GuestExit::Failed(1),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GuestExit::Success)
    }
}

/// Captured result of a guest command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestOutput {
    pub exit: GuestExit,
    pub stdout: String,
    pub stderr: String,
}

impl GuestOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit: GuestExit::Success,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit: GuestExit::from_code(Some(code)),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}
