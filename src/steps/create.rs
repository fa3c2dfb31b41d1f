//! Create a VM from a macOS installer app

use super::{cleanup_vm, power_down, ProvisionOutcome, RunState, Step, StepAction};
use crate::client::{Client, CreateParams};
use crate::config::BuildConfig;
use crate::error::Result;
use crate::installer::InstallerMetadata;
use crate::reconcile::{validate_desired, Reconciler};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub const DEFAULT_DISK_SIZE: &str = "40G";
pub const DEFAULT_RAM_SIZE: &str = "4G";
pub const DEFAULT_CPU_COUNT: &str = "2";

pub struct CreateVmStep {
    client: Client,
    config: BuildConfig,
    installer: Box<dyn InstallerMetadata>,
    outcome: ProvisionOutcome,
}

impl CreateVmStep {
    pub fn new(client: Client, config: BuildConfig, installer: Box<dyn InstallerMetadata>) -> Self {
        Self {
            client,
            config,
            installer,
            outcome: ProvisionOutcome::default(),
        }
    }

    fn create_params(&self, vm_name: &str) -> CreateParams {
        let or_default = |value: &str, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };

        CreateParams {
            name: vm_name.to_string(),
            installer_app: self.config.installer_app.clone(),
            disk_size: or_default(&self.config.disk_size, DEFAULT_DISK_SIZE),
            ram_size: or_default(&self.config.ram_size, DEFAULT_RAM_SIZE),
            cpu_count: or_default(&self.config.cpu_count, DEFAULT_CPU_COUNT),
        }
    }

    async fn provision(&mut self, state: &mut RunState) -> Result<()> {
        validate_desired(&self.config)?;

        let version = self
            .installer
            .extract_version_tag(Path::new(&self.config.installer_app))?;
        let vm_name = format!("{}-{}", self.config.vm_name, version);
        self.outcome.vm_name = Some(vm_name.clone());
        state.vm_name = Some(vm_name.clone());

        let ui = state.ui.clone();

        if self.config.force && self.client.exists(&vm_name).await? {
            ui.say(&format!("Deleting existing virtual machine {}", vm_name));
            self.client.delete(&vm_name).await?;
        }

        ui.say(&format!(
            "Creating a new VM Template ({}) from installer, this will take a while",
            vm_name
        ));
        let progress_ui = ui.clone();
        let progress = move |line: &str| progress_ui.say(line);
        let created = self
            .client
            .create(&self.create_params(&vm_name), &progress)
            .await?;
        self.outcome.created_new_vm = true;
        ui.say(&format!("VM {} was created ({})", vm_name, created.uuid));
        state.instance_id = Some(created.uuid);

        let show = self.client.show(&vm_name).await?;
        let reconciler = Reconciler::new(&self.client, ui.as_ref(), self.config.force);
        reconciler.reconcile_resources(&show, &self.config).await?;

        let described = self.client.describe(&vm_name).await?;
        reconciler
            .reconcile_properties(&described, &show, &self.config)
            .await?;

        power_down(&self.client, ui.as_ref(), &vm_name, self.config.stop_vm).await
    }
}

#[async_trait]
impl Step for CreateVmStep {
    fn name(&self) -> &str {
        "create_vm"
    }

    async fn run(&mut self, state: &mut RunState) -> StepAction {
        match self.provision(state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, state: &RunState) -> Result<()> {
        info!("Cleaning up create VM step");
        cleanup_vm(&self.client, state, &self.outcome).await
    }
}
