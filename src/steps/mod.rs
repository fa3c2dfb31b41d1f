//! Provisioning step machine
//!
//! A build is a sequence of [`Step`]s sharing one [`RunState`]. The
//! [`StepRunner`] runs them in order until one halts or cancellation is
//! requested, then runs the cleanup of every started step in reverse
//! order. Cleanup runs on success too: it is the safety net that leaves the
//! VM suspended, or deletes it when the build did not finish.

pub mod clone;
pub mod create;
pub mod generated_data;

pub use clone::CloneVmStep;
pub use create::CreateVmStep;
pub use generated_data::SetGeneratedDataStep;

use crate::client::{Client, StopParams};
use crate::config::BuildConfig;
use crate::error::{ProvisionError, Result};
use crate::installer::InstallerMetadata;
use crate::ui::Ui;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What the runner does after a step returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Halted,
    Cancelled,
}

/// Variables derived from the finished VM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedData {
    pub vm_name: String,
    pub os_version: String,
    pub darwin_version: String,
}

/// What a successful build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub vm_name: String,
    pub uuid: String,
    pub os_version: String,
    pub darwin_version: String,
}

/// State shared by all steps of one run
pub struct RunState {
    pub ui: Arc<dyn Ui>,

    /// Name of the VM this run works on, once known
    pub vm_name: Option<String>,

    /// UUID of the VM, once created or cloned
    pub instance_id: Option<String>,

    pub os_version: Option<String>,
    pub generated: Option<GeneratedData>,

    pub halted: bool,
    pub cancelled: bool,

    /// The error that halted the run
    pub error: Option<ProvisionError>,
}

impl RunState {
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self {
            ui,
            vm_name: None,
            instance_id: None,
            os_version: None,
            generated: None,
            halted: false,
            cancelled: false,
            error: None,
        }
    }

    /// Report `err` once, record it, and halt
    pub fn fail(&mut self, err: ProvisionError) -> StepAction {
        self.ui.error(&err.to_string());
        self.error = Some(err);
        StepAction::Halt
    }

    pub fn artifact(&self) -> Option<Artifact> {
        let generated = self.generated.as_ref()?;
        Some(Artifact {
            vm_name: generated.vm_name.clone(),
            uuid: self.instance_id.clone().unwrap_or_default(),
            os_version: generated.os_version.clone(),
            darwin_version: generated.darwin_version.clone(),
        })
    }
}

#[async_trait]
pub trait Step: Send {
    fn name(&self) -> &str;

    async fn run(&mut self, state: &mut RunState) -> StepAction;

    /// Undo or secure whatever `run` left behind.
    ///
    /// An error here is terminal for the whole run.
    async fn cleanup(&mut self, state: &RunState) -> Result<()>;
}

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct StepRunner {
    steps: Vec<Box<dyn Step>>,
    cancel: CancelFlag,
}

impl StepRunner {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            steps: Vec::new(),
            cancel,
        }
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run every step, then clean up.
    ///
    /// Returns `Err` only when a cleanup failed; a halted build is reported
    /// through the outcome and `state.error`.
    pub async fn run(&mut self, state: &mut RunState) -> Result<RunOutcome> {
        let mut started = 0;

        for step in self.steps.iter_mut() {
            if self.cancel.is_cancelled() {
                break;
            }
            started += 1;
            info!("Running step {}", step.name());
            if step.run(state).await == StepAction::Halt {
                state.halted = true;
                break;
            }
        }

        if self.cancel.is_cancelled() {
            info!("Build cancelled");
            state.cancelled = true;
        }

        let mut terminal = None;
        for step in self.steps[..started].iter_mut().rev() {
            debug!("Cleaning up step {}", step.name());
            if let Err(e) = step.cleanup(state).await {
                error!("Cleanup of step {} failed: {}", step.name(), e);
                terminal.get_or_insert(e);
            }
        }

        if let Some(e) = terminal {
            return Err(e);
        }

        Ok(if state.cancelled {
            RunOutcome::Cancelled
        } else if state.halted {
            RunOutcome::Halted
        } else {
            RunOutcome::Completed
        })
    }
}

/// Steps for a build: create or clone, then generated data
pub fn build_pipeline(
    client: &Client,
    config: &BuildConfig,
    installer: Box<dyn InstallerMetadata>,
    cancel: CancelFlag,
) -> StepRunner {
    let runner = StepRunner::new(cancel);
    let runner = if config.is_clone() {
        runner.with_step(CloneVmStep::new(client.clone(), config.clone()))
    } else {
        runner.with_step(CreateVmStep::new(client.clone(), config.clone(), installer))
    };
    runner.with_step(SetGeneratedDataStep::new(client.clone()))
}

/// Stop or suspend the VM if it is still running
pub(crate) async fn power_down(client: &Client, ui: &dyn Ui, vm_name: &str, stop_vm: bool) -> Result<()> {
    let show = client.show(vm_name).await?;
    if !show.is_running() {
        return Ok(());
    }

    if stop_vm {
        ui.say(&format!("Stopping VM {}", vm_name));
        client
            .stop(&StopParams {
                vm_name: vm_name.to_string(),
                force: false,
            })
            .await
    } else {
        ui.say(&format!("Suspending VM {}", vm_name));
        client.suspend(vm_name).await
    }
}

/// What a create or clone step did, as far as cleanup is concerned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub vm_name: Option<String>,

    /// Set only once the tool has created or cloned the VM
    pub created_new_vm: bool,
}

impl ProvisionOutcome {
    pub fn created(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: Some(vm_name.into()),
            created_new_vm: true,
        }
    }
}

/// Cleanup shared by the create and clone steps
///
/// A VM this run did not create is never touched.
pub(crate) async fn cleanup_vm(client: &Client, state: &RunState, outcome: &ProvisionOutcome) -> Result<()> {
    let Some(vm_name) = outcome.vm_name.as_deref() else {
        return Ok(());
    };

    if !outcome.created_new_vm {
        debug!("VM {} was not created by this run, leaving it untouched", vm_name);
        return Ok(());
    }

    if state
        .error
        .as_ref()
        .is_some_and(ProvisionError::is_identity_conflict)
    {
        debug!("Leaving VM {} untouched", vm_name);
        return Ok(());
    }

    if state.halted || state.cancelled {
        state.ui.say(&format!("Deleting VM {}", vm_name));
        if let Err(e) = client.delete(vm_name).await {
            state.ui.error(&e.to_string());
        }
        return Ok(());
    }

    if let Err(suspend_err) = client.suspend(vm_name).await {
        state.ui.error(&suspend_err.to_string());
        if let Err(delete_err) = client.delete(vm_name).await {
            state.ui.error(&delete_err.to_string());
        }
        return Err(ProvisionError::CleanupFailed {
            vm_name: vm_name.to_string(),
            source: Box::new(suspend_err),
        });
    }

    Ok(())
}
