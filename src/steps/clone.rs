//! Clone a VM from an existing source VM

use super::{cleanup_vm, power_down, ProvisionOutcome, RunState, Step, StepAction};
use crate::client::Client;
use crate::config::BuildConfig;
use crate::error::{ProvisionError, Result};
use crate::reconcile::{validate_desired, Reconciler};
use async_trait::async_trait;
use tracing::info;

pub struct CloneVmStep {
    client: Client,
    config: BuildConfig,
    outcome: ProvisionOutcome,
}

impl CloneVmStep {
    pub fn new(client: Client, config: BuildConfig) -> Self {
        Self {
            client,
            config,
            outcome: ProvisionOutcome::default(),
        }
    }

    async fn provision(&mut self, state: &mut RunState) -> Result<()> {
        validate_desired(&self.config)?;

        let vm_name = self.config.vm_name.clone();
        self.outcome.vm_name = Some(vm_name.clone());
        state.vm_name = Some(vm_name.clone());

        let ui = state.ui.clone();
        let source_name = self.config.source_vm_name.as_str();

        if !self.client.exists(source_name).await? {
            return Err(ProvisionError::SourceVmMissing {
                name: source_name.to_string(),
            });
        }

        if self.config.force && self.client.exists(&vm_name).await? {
            ui.say(&format!("Deleting existing virtual machine {}", vm_name));
            self.client.delete(&vm_name).await?;
        }

        let source = self.client.show(source_name).await?;
        ui.say(&format!(
            "Cloning source VM {} into a new virtual machine: {}",
            source.name, vm_name
        ));
        self.client.clone_vm(&source.uuid, &vm_name).await?;
        self.outcome.created_new_vm = true;

        let cloned = self.client.show(&vm_name).await?;
        state.instance_id = Some(cloned.uuid.clone());

        let reconciler = Reconciler::new(&self.client, ui.as_ref(), self.config.force);
        reconciler.reconcile_resources(&cloned, &self.config).await?;

        let described = self.client.describe(&vm_name).await?;
        reconciler
            .reconcile_properties(&described, &cloned, &self.config)
            .await?;

        power_down(&self.client, ui.as_ref(), &vm_name, self.config.stop_vm).await
    }
}

#[async_trait]
impl Step for CloneVmStep {
    fn name(&self) -> &str {
        "clone_vm"
    }

    async fn run(&mut self, state: &mut RunState) -> StepAction {
        match self.provision(state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, state: &RunState) -> Result<()> {
        info!("Cleaning up clone VM step");
        cleanup_vm(&self.client, state, &self.outcome).await
    }
}
