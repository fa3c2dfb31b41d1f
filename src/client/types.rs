//! Request parameters and response bodies for tool commands
//!
//! Response types decode leniently: every field has a default, so a body
//! missing a field (or an empty `{}` body) still decodes.

use serde::{Deserialize, Serialize};

/// Parameters for `create`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateParams {
    pub name: String,
    pub installer_app: String,
    pub ram_size: String,
    pub disk_size: String,
    pub cpu_count: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CreateResponse {
    pub uuid: String,
    pub name: String,
    pub cpu_cores: u32,
    pub ram: String,
    pub image_id: String,
    pub status: String,
}

/// Parameters for `stop`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopParams {
    pub vm_name: String,
    pub force: bool,
}

impl StopParams {
    pub fn forced(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            force: true,
        }
    }
}

/// Parameters for `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParams {
    pub vm_name: String,

    /// Host folder mounted into the guest; without one the command runs with `-n`
    pub volume: Option<String>,

    /// Command words, joined with spaces and fed to the guest shell
    pub command: Vec<String>,
}

impl RunParams {
    pub fn new(vm_name: impl Into<String>, command: &[&str]) -> Self {
        Self {
            vm_name: vm_name.into(),
            volume: None,
            command: command.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Power state reported by `show`
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Suspended,
    #[default]
    #[serde(other)]
    Other,
}

/// Body of `show`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShowResponse {
    pub uuid: String,
    pub name: String,
    pub cpu_cores: u32,
    pub ram: String,
    pub image_id: String,
    pub status: VmStatus,

    /// Disk size in bytes
    pub hard_drive: u64,
}

impl ShowResponse {
    pub fn is_running(&self) -> bool {
        self.status == VmStatus::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.status == VmStatus::Stopped
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CpuInfo {
    pub cores: u32,
    pub threads: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortForwardingRule {
    pub guest_port: u16,
    pub rule_name: String,
    pub protocol: String,
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkCard {
    pub index: u32,
    pub mode: String,
    pub mac_address: String,
    pub port_forwarding_rules: Vec<PortForwardingRule>,
    pub pci_slot: u32,
    #[serde(rename = "type")]
    pub card_type: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardDrive {
    pub controller: String,
    pub pci_slot: u32,
    pub file: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypedDevice {
    #[serde(rename = "type")]
    pub device_type: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameBuffer {
    pub pci_slot: u32,
    pub vnc_port: u16,
    pub height: u32,
    pub width: u32,
    pub vnc_ip: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Display {
    pub headless: u32,
    pub frame_buffer: FrameBuffer,
}

/// Body of `describe`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DescribeResponse {
    pub name: String,
    pub version: u32,
    pub uuid: String,
    pub cpu: CpuInfo,
    pub ram: String,
    pub hard_drives: Vec<HardDrive>,
    pub network_cards: Vec<NetworkCard>,
    pub smbios: TypedDevice,
    pub smc: TypedDevice,
    pub nvram: bool,
    pub firmware: TypedDevice,
    pub display: Display,
}

impl DescribeResponse {
    /// Hyperthreading is on when the VM exposes more threads than cores
    pub fn hyperthreading_enabled(&self) -> bool {
        self.cpu.threads > self.cpu.cores
    }

    /// Host ports bound by any rule on any network card
    pub fn bound_host_ports(&self) -> std::collections::HashSet<u16> {
        self.network_cards
            .iter()
            .flat_map(|card| card.port_forwarding_rules.iter())
            .map(|rule| rule.host_port)
            .collect()
    }
}

/// Body of `version`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct VersionResponse {
    pub product: String,
    pub version: String,
    pub build: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_show_decodes_status_and_disk() {
        let show: ShowResponse = serde_json::from_value(json!({
            "uuid": "c0847bc9-5d2d-4dbc-ba6a-240f7ff08032",
            "name": "foo",
            "cpu_cores": 2,
            "ram": "4G",
            "image_id": "abc",
            "status": "running",
            "hard_drive": 42949672960u64
        }))
        .unwrap();
        assert!(show.is_running());
        assert_eq!(show.hard_drive, 40 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_status_is_other() {
        let show: ShowResponse = serde_json::from_value(json!({"status": "paused"})).unwrap();
        assert_eq!(show.status, VmStatus::Other);
        assert!(!show.is_running() && !show.is_stopped());
    }

    #[test]
    fn test_describe_collects_bound_ports_across_cards() {
        let describe: DescribeResponse = serde_json::from_value(json!({
            "cpu": {"cores": 4, "threads": 8},
            "network_cards": [
                {"port_forwarding_rules": [{"guest_port": 22, "host_port": 2222, "rule_name": "ssh"}]},
                {"port_forwarding_rules": [{"guest_port": 80, "host_port": 8080, "rule_name": "web"}]}
            ]
        }))
        .unwrap();
        let ports = describe.bound_host_ports();
        assert!(ports.contains(&2222) && ports.contains(&8080));
        assert!(describe.hyperthreading_enabled());
    }
}
