//! Expose build variables derived from the finished VM

use super::{GeneratedData, RunState, Step, StepAction};
use crate::client::{Client, RunParams};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use tracing::info;

pub const DARWIN_VERSION_COMMAND: &[&str] = &["/usr/bin/uname", "-r"];
pub const OS_VERSION_COMMAND: &[&str] = &["/usr/bin/sw_vers", "-productVersion"];

pub struct SetGeneratedDataStep {
    client: Client,
}

impl SetGeneratedDataStep {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn guest_output(&self, vm_name: &str, command: &[&str]) -> Result<String> {
        let stdout = self
            .client
            .run_checked(&RunParams::new(vm_name, command))
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn collect(&self, state: &mut RunState) -> Result<()> {
        let vm_name = state
            .vm_name
            .clone()
            .ok_or_else(|| ProvisionError::InvalidConfig("no VM name was assigned".into()))?;

        info!("Exposing build contextual variables...");
        let darwin_version = self.guest_output(&vm_name, DARWIN_VERSION_COMMAND).await?;
        let os_version = match &state.os_version {
            Some(version) => version.clone(),
            None => self.guest_output(&vm_name, OS_VERSION_COMMAND).await?,
        };

        state.os_version = Some(os_version.clone());
        state.generated = Some(GeneratedData {
            vm_name,
            os_version,
            darwin_version,
        });
        Ok(())
    }
}

#[async_trait]
impl Step for SetGeneratedDataStep {
    fn name(&self) -> &str {
        "set_generated_data"
    }

    async fn run(&mut self, state: &mut RunState) -> StepAction {
        match self.collect(state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => state.fail(e),
        }
    }

    async fn cleanup(&mut self, _state: &RunState) -> Result<()> {
        Ok(())
    }
}
