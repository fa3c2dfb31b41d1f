//! Reconciliation of a live VM towards its desired configuration
//!
//! Planning is pure: [`plan_resources`] and [`plan_properties`] compare
//! observed state with the desired [`BuildConfig`] and either return the
//! mutations to issue or a policy error. Nothing is mutated until a whole
//! plan has been accepted. [`Reconciler`] then applies each mutation with a
//! forced stop in front of it, since the tool only modifies stopped VMs.

use crate::client::{Client, DescribeResponse, RunParams, ShowResponse, StopParams};
use crate::config::{BuildConfig, Hyperthreading};
use crate::error::{ProvisionError, Result};
use crate::ui::Ui;
use std::collections::HashSet;
use tracing::{debug, warn};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Guest command growing the APFS container after the virtual disk grew
pub const RESIZE_CONTAINER_COMMAND: &[&str] = &["diskutil", "apfs", "resizeContainer", "disk1", "0"];

/// Parse a size such as `40G` or `512m` into bytes
pub fn parse_size(input: &str) -> Result<u64> {
    let invalid = || ProvisionError::InvalidSizeFormat {
        input: input.to_string(),
    };

    let unit = input.chars().last().ok_or_else(invalid)?;
    let digits = &input[..input.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let multiplier = match unit {
        'G' | 'g' => GIB,
        'M' | 'm' => MIB,
        _ => return Err(invalid()),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(invalid)
}

fn parse_cpu_count(input: &str) -> Result<u32> {
    input
        .parse::<u32>()
        .map_err(|source| ProvisionError::InvalidCpuCount {
            input: input.to_string(),
            source,
        })
}

/// Check everything about the desired state that needs no observation
pub fn validate_desired(desired: &BuildConfig) -> Result<()> {
    if !desired.disk_size.is_empty() {
        parse_size(&desired.disk_size)?;
    }
    if !desired.cpu_count.is_empty() {
        parse_cpu_count(&desired.cpu_count)?;
    }
    desired.hyperthreading()?;
    Ok(())
}

/// A single `modify` call against a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Grow the virtual disk, then the guest's container
    GrowDisk { size: String },
    SetRam { size: String },
    SetCpu { count: u32 },
    AddPortForwarding {
        host_port: u16,
        guest_port: u16,
        rule_name: String,
    },
    SetHardwareUuid { uuid: String },
}

impl Mutation {
    /// `(action, property, flags)` for the `modify` verb
    pub fn modify_args(&self) -> (&'static str, &'static str, Vec<String>) {
        match self {
            Mutation::GrowDisk { size } => ("set", "hard-drive", vec!["-s".into(), size.clone()]),
            Mutation::SetRam { size } => ("set", "ram", vec![size.clone()]),
            Mutation::SetCpu { count } => ("set", "cpu", vec!["-c".into(), count.to_string()]),
            Mutation::AddPortForwarding {
                host_port,
                guest_port,
                rule_name,
            } => (
                "add",
                "port-forwarding",
                vec![
                    "--host-port".into(),
                    host_port.to_string(),
                    "--guest-port".into(),
                    guest_port.to_string(),
                    rule_name.clone(),
                ],
            ),
            Mutation::SetHardwareUuid { uuid } => (
                "set",
                "custom-variable",
                vec!["hw.UUID".into(), uuid.clone()],
            ),
        }
    }

    fn announce(&self, vm_name: &str) -> String {
        match self {
            Mutation::GrowDisk { size } => format!("Modifying VM {} disk size to {}", vm_name, size),
            Mutation::SetRam { size } => format!("Modifying VM {} RAM to {}", vm_name, size),
            Mutation::SetCpu { count } => {
                format!("Modifying VM {} CPU core count to {}", vm_name, count)
            }
            Mutation::AddPortForwarding {
                host_port,
                guest_port,
                rule_name,
            } => format!(
                "Adding {} port-forwarding (Guest Port: {}, Host Port: {}, Rule Name: {})",
                vm_name, guest_port, host_port, rule_name
            ),
            Mutation::SetHardwareUuid { uuid } => {
                format!("Modifying VM custom-variable hw.UUID to {}", uuid)
            }
        }
    }
}

/// Disk, RAM and CPU changes, in that order
pub fn plan_resources(observed: &ShowResponse, desired: &BuildConfig) -> Result<Vec<Mutation>> {
    let mut plan = Vec::new();

    if !desired.disk_size.is_empty() {
        let requested = parse_size(&desired.disk_size)?;
        if requested < observed.hard_drive {
            return Err(ProvisionError::DiskShrinkNotAllowed {
                requested,
                current: observed.hard_drive,
            });
        }
        if requested > observed.hard_drive {
            plan.push(Mutation::GrowDisk {
                size: desired.disk_size.clone(),
            });
        }
    }

    if !desired.ram_size.is_empty() && desired.ram_size != observed.ram {
        plan.push(Mutation::SetRam {
            size: desired.ram_size.clone(),
        });
    }

    if !desired.cpu_count.is_empty() {
        let count = parse_cpu_count(&desired.cpu_count)?;
        if count != observed.cpu_cores {
            plan.push(Mutation::SetCpu { count });
        }
    }

    Ok(plan)
}

/// Port-forwarding and hardware UUID changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyPlan {
    pub mutations: Vec<Mutation>,

    /// Desired host ports that were already bound and are left alone
    pub skipped_host_ports: Vec<u16>,
}

pub fn plan_properties(described: &DescribeResponse, desired: &BuildConfig) -> PropertyPlan {
    let mut plan = PropertyPlan::default();
    let mut bound: HashSet<u16> = described.bound_host_ports();

    for rule in &desired.port_forwarding_rules {
        if bound.contains(&rule.host_port) {
            plan.skipped_host_ports.push(rule.host_port);
            continue;
        }
        if rule.host_port != 0 {
            bound.insert(rule.host_port);
        }
        plan.mutations.push(Mutation::AddPortForwarding {
            host_port: rule.host_port,
            guest_port: rule.guest_port,
            rule_name: rule.rule_name.clone(),
        });
    }

    if !desired.hw_uuid.is_empty() {
        plan.mutations.push(Mutation::SetHardwareUuid {
            uuid: desired.hw_uuid.clone(),
        });
    }

    plan
}

/// Applies reconciliation plans to one VM
pub struct Reconciler<'a> {
    client: &'a Client,
    ui: &'a dyn Ui,

    /// Keep going when a port-forwarding rule cannot be added
    force: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a Client, ui: &'a dyn Ui, force: bool) -> Self {
        Self { client, ui, force }
    }

    async fn stop(&self, vm_name: &str) -> Result<()> {
        self.client.stop(&StopParams::forced(vm_name)).await
    }

    /// Stop, then issue one mutation
    pub async fn apply(&self, vm_name: &str, mutation: &Mutation) -> Result<()> {
        self.stop(vm_name).await?;
        self.ui.say(&mutation.announce(vm_name));

        let (action, property, flags) = mutation.modify_args();
        self.client.modify(vm_name, action, property, &flags).await?;

        if let Mutation::GrowDisk { .. } = mutation {
            self.client
                .run_checked(&RunParams::new(vm_name, RESIZE_CONTAINER_COMMAND))
                .await?;
            // The guest run leaves the VM running; stop again before the next mutation.
            self.stop(vm_name).await?;
        }

        Ok(())
    }

    pub async fn reconcile_resources(
        &self,
        observed: &ShowResponse,
        desired: &BuildConfig,
    ) -> Result<()> {
        let plan = plan_resources(observed, desired)?;
        debug!("Resource plan for {}: {:?}", observed.name, plan);

        for mutation in &plan {
            self.apply(&observed.name, mutation).await?;
        }
        Ok(())
    }

    pub async fn reconcile_properties(
        &self,
        described: &DescribeResponse,
        shown: &ShowResponse,
        desired: &BuildConfig,
    ) -> Result<()> {
        let hyperthreading = desired.hyperthreading()?;
        let plan = plan_properties(described, desired);
        let vm_name = shown.name.as_str();

        for port in &plan.skipped_host_ports {
            self.ui.error(&format!(
                "Found an existing host port rule ({})! Skipping without setting...",
                port
            ));
        }

        for mutation in &plan.mutations {
            match self.apply(vm_name, mutation).await {
                Ok(()) => {}
                Err(e) if self.force && matches!(mutation, Mutation::AddPortForwarding { .. }) => {
                    warn!("Ignoring port-forwarding failure on {}: {}", vm_name, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.reconcile_hyperthreading(vm_name, hyperthreading).await
    }

    /// Toggle hyperthreading when the VM's state differs from the request
    pub async fn reconcile_hyperthreading(
        &self,
        vm_name: &str,
        request: Hyperthreading,
    ) -> Result<()> {
        let enable = match request {
            Hyperthreading::Unset => return Ok(()),
            Hyperthreading::Enable => true,
            Hyperthreading::Disable => false,
        };

        self.stop(vm_name).await?;
        let described = self.client.describe(vm_name).await?;
        if described.hyperthreading_enabled() == enable {
            debug!("Hyperthreading on {} already matches request", vm_name);
            return Ok(());
        }

        let flag = if enable {
            self.ui.say(&format!("Enabling hyperthreading on {}", vm_name));
            "--htt"
        } else {
            self.ui.say(&format!("Disabling hyperthreading on {}", vm_name));
            "--no-htt"
        };
        self.client
            .modify(vm_name, "set", "cpu", &[flag.to_string()])
            .await
    }
}
