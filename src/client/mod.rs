//! Resource client
//!
//! One method per tool verb. Each call is a single process invocation with
//! no retry; optional flags are only emitted when they carry a value.
//! Result codes that have a domain meaning are classified here, at the call
//! site that knows which VM name was meant.

pub mod registry;
pub mod types;

pub use registry::{
    PullParams, PushParams, RegistryApi, RegistryListEntry, RegistryParams, RegistryRepo,
    RegistryTemplate, RegistryTemplateVersion,
};
pub use types::*;

use crate::driver::protocol::{NAME_ALREADY_EXISTS, VM_NOT_FOUND};
use crate::driver::{CommandDriver, GuestExit, GuestOutput, MachineReadableOutput, ProgressSink};
use crate::error::{ProvisionError, Result};
use std::sync::Arc;
use tracing::debug;

/// Client for the virtualization tool
#[derive(Clone)]
pub struct Client {
    driver: Arc<dyn CommandDriver>,

    /// Run guest commands with `--log-level debug`
    guest_debug: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("guest_debug", &self.guest_debug)
            .finish_non_exhaustive()
    }
}

pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn classify_not_found(err: ProvisionError, name: &str) -> ProvisionError {
    match err.command_code() {
        Some(VM_NOT_FOUND) => ProvisionError::VmNotFound {
            name: name.to_string(),
        },
        _ => err,
    }
}

fn classify_already_exists(err: ProvisionError, name: &str) -> ProvisionError {
    match err.command_code() {
        Some(NAME_ALREADY_EXISTS) => ProvisionError::VmAlreadyExists {
            name: name.to_string(),
        },
        _ => err,
    }
}

impl Client {
    pub fn new(driver: Arc<dyn CommandDriver>) -> Self {
        Self {
            driver,
            guest_debug: false,
        }
    }

    pub fn with_guest_debug(mut self, enabled: bool) -> Self {
        self.guest_debug = enabled;
        self
    }

    async fn invoke(&self, args: Vec<String>) -> Result<MachineReadableOutput> {
        self.driver.invoke(&args).await
    }

    /// `create` from an installer app, streaming install progress
    pub async fn create(
        &self,
        params: &CreateParams,
        progress: &ProgressSink<'_>,
    ) -> Result<CreateResponse> {
        let mut args = argv(&["create"]);
        if !params.ram_size.is_empty() {
            args.extend(argv(&["--ram-size", params.ram_size.as_str()]));
        }
        if !params.cpu_count.is_empty() {
            args.extend(argv(&["--cpu-count", params.cpu_count.as_str()]));
        }
        if !params.disk_size.is_empty() {
            args.extend(argv(&["--disk-size", params.disk_size.as_str()]));
        }
        args.extend(argv(&["--app", params.installer_app.as_str(), params.name.as_str()]));

        let output = self
            .driver
            .invoke_streaming(&args, progress)
            .await
            .map_err(|e| classify_already_exists(e, &params.name))?;
        output.decode_body("create")
    }

    /// `clone` the VM identified by `source_uuid` into `vm_name`
    pub async fn clone_vm(&self, source_uuid: &str, vm_name: &str) -> Result<()> {
        self.invoke(argv(&["clone", source_uuid, vm_name]))
            .await
            .map_err(|e| classify_already_exists(e, vm_name))?;
        Ok(())
    }

    pub async fn delete(&self, vm_name: &str) -> Result<()> {
        self.invoke(argv(&["delete", "--yes", vm_name])).await?;
        Ok(())
    }

    pub async fn describe(&self, vm_name: &str) -> Result<DescribeResponse> {
        let output = self
            .invoke(argv(&["describe", vm_name]))
            .await
            .map_err(|e| classify_not_found(e, vm_name))?;
        output.decode_body("describe")
    }

    pub async fn show(&self, vm_name: &str) -> Result<ShowResponse> {
        let output = self
            .invoke(argv(&["show", vm_name]))
            .await
            .map_err(|e| classify_not_found(e, vm_name))?;
        output.decode_body("show")
    }

    /// Whether a VM with this name exists; "not found" is an answer, not an error
    pub async fn exists(&self, vm_name: &str) -> Result<bool> {
        match self.show(vm_name).await {
            Ok(_) => Ok(true),
            Err(ProvisionError::VmNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `modify <vm> <action> <property> [flags...]`
    pub async fn modify(
        &self,
        vm_name: &str,
        action: &str,
        property: &str,
        flags: &[String],
    ) -> Result<()> {
        let mut args = argv(&["modify", vm_name, action, property]);
        args.extend(flags.iter().cloned());
        self.invoke(args).await?;
        Ok(())
    }

    pub async fn stop(&self, params: &StopParams) -> Result<()> {
        let mut args = argv(&["stop"]);
        if params.force {
            args.push("--force".to_string());
        }
        args.push(params.vm_name.clone());
        self.invoke(args).await?;
        Ok(())
    }

    pub async fn suspend(&self, vm_name: &str) -> Result<()> {
        self.invoke(argv(&["suspend", vm_name])).await?;
        Ok(())
    }

    pub async fn start(&self, vm_name: &str) -> Result<()> {
        self.invoke(argv(&["start", vm_name])).await?;
        Ok(())
    }

    /// `cp -pRLf <src> <dst>`; either side may be `vm:/path`
    pub async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.invoke(argv(&["cp", "-pRLf", src, dst])).await?;
        Ok(())
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        self.invoke(argv(&["version"]))
            .await?
            .decode_body("version")
    }

    /// Run a command in the guest and report how it ended
    pub async fn run(&self, params: &RunParams) -> Result<GuestOutput> {
        let mut args = Vec::new();
        if self.guest_debug {
            args.extend(argv(&["--log-level", "debug"]));
        }
        args.push("run".to_string());
        match &params.volume {
            Some(volume) => args.extend(argv(&["-v", volume.as_str()])),
            None => args.push("-n".to_string()),
        }
        args.extend(argv(&[params.vm_name.as_str(), "sh"]));

        self.driver
            .run_in_guest(&args, &params.command.join(" "))
            .await
    }

    /// Run a command in the guest and return its stdout, failing on any non-zero exit
    pub async fn run_checked(&self, params: &RunParams) -> Result<String> {
        let output = self.run(params).await?;
        debug!("Guest stdout: {}", output.stdout.trim_end());

        if output.exit.is_success() {
            return Ok(output.stdout);
        }

        let detail = match output.exit {
            GuestExit::Disconnected => "lost connection to the guest".to_string(),
            GuestExit::Failed(code) => {
                format!("exited with {}: {}", code, output.stderr.trim())
            }
            GuestExit::Success => String::new(),
        };
        Err(ProvisionError::GuestCommand {
            vm_name: params.vm_name.clone(),
            command: params.command.join(" "),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use serde_json::json;

    fn client() -> (Arc<ScriptedDriver>, Client) {
        let driver = Arc::new(ScriptedDriver::new());
        (driver.clone(), Client::new(driver))
    }

    #[tokio::test]
    async fn test_show_not_found_is_classified() {
        let (driver, client) = client();
        driver.reply_error("show foo", VM_NOT_FOUND, "foo not found");

        let err = client.show("foo").await.unwrap_err();
        assert!(matches!(err, ProvisionError::VmNotFound { ref name } if name == "foo"));
    }

    #[tokio::test]
    async fn test_exists_resolves_not_found_to_false() {
        let (driver, client) = client();
        driver.reply_error("show gone", VM_NOT_FOUND, "gone not found");
        driver.reply_ok("show here", json!({"name": "here"}));

        assert!(!client.exists("gone").await.unwrap());
        assert!(client.exists("here").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_propagates_other_errors() {
        let (driver, client) = client();
        driver.reply_error("show foo", 99, "license expired");

        let err = client.exists("foo").await.unwrap_err();
        assert_eq!(err.command_code(), Some(99));
    }

    #[tokio::test]
    async fn test_clone_name_conflict_is_classified() {
        let (driver, client) = client();
        driver.reply_error("clone uuid-1 foo", NAME_ALREADY_EXISTS, "exists");

        let err = client.clone_vm("uuid-1", "foo").await.unwrap_err();
        assert!(matches!(err, ProvisionError::VmAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_not_found_on_clone_stays_generic() {
        let (driver, client) = client();
        driver.reply_error("clone uuid-1 foo", VM_NOT_FOUND, "source missing");

        let err = client.clone_vm("uuid-1", "foo").await.unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed(_)));
    }

    #[tokio::test]
    async fn test_create_emits_only_set_flags() {
        let (driver, client) = client();
        driver.reply_ok(
            "create --ram-size 8G --app /Applications/Install.app foo",
            json!({"uuid": "u-1", "name": "foo"}),
        );

        let params = CreateParams {
            name: "foo".into(),
            installer_app: "/Applications/Install.app".into(),
            ram_size: "8G".into(),
            ..CreateParams::default()
        };
        let response = client.create(&params, &|_: &str| {}).await.unwrap();
        assert_eq!(response.uuid, "u-1");
    }

    #[tokio::test]
    async fn test_stop_and_delete_arguments() {
        let (driver, client) = client();
        client.stop(&StopParams::forced("foo")).await.unwrap();
        client
            .stop(&StopParams {
                vm_name: "foo".into(),
                force: false,
            })
            .await
            .unwrap();
        client.delete("foo").await.unwrap();
        client.copy("/tmp/a", "foo:/tmp/a").await.unwrap();

        assert_eq!(
            driver.commands(),
            vec![
                "stop --force foo",
                "stop foo",
                "delete --yes foo",
                "cp -pRLf /tmp/a foo:/tmp/a"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_arguments_and_debug_flag() {
        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone()).with_guest_debug(true);

        let mut params = RunParams::new("foo", &["echo", "hi"]);
        client.run(&params).await.unwrap();
        params.volume = Some("/src".into());
        client.run(&params).await.unwrap();

        assert_eq!(
            driver.commands(),
            vec![
                "--log-level debug run -n foo sh",
                "--log-level debug run -v /src foo sh"
            ]
        );
        assert_eq!(driver.guest_inputs(), vec!["echo hi", "echo hi"]);
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let (driver, client) = client();
        driver.guest_reply("false", GuestOutput::failed(1, "nope"));
        driver.guest_reply("drop", GuestOutput::failed(125, ""));

        let err = client
            .run_checked(&RunParams::new("foo", &["false"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with 1"));

        let output = client.run(&RunParams::new("foo", &["drop"])).await.unwrap();
        assert_eq!(output.exit, GuestExit::Disconnected);
    }

    #[tokio::test]
    async fn test_version_decodes_body() {
        let (driver, client) = client();
        driver.reply_ok(
            "version",
            json!({"product": "Anka Build Basic", "version": "2.5.4", "build": "130"}),
        );

        let version = client.version().await.unwrap();
        assert_eq!(version.version, "2.5.4");
    }
}
