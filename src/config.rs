// Configuration File Support
//
// This module provides configuration file parsing for vmsmith.
// Supports TOML format with environment variable overrides.
// The configuration file defaults to ./vmsmith.toml and can be set with --config.

use crate::client::{PushParams, RegistryParams};
use crate::driver::ProcessDriver;
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "vmsmith.toml";

/// Environment variable carrying the default guest user to the tool
pub const DEFAULT_USER_ENV: &str = "ANKA_DEFAULT_USER";

/// Environment variable carrying the default guest password to the tool
pub const DEFAULT_PASSWORD_ENV: &str = "ANKA_DEFAULT_PASSWD";

/// Letters used for generated port-forwarding rule names
const RULE_NAME_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of generated port-forwarding rule names
pub const RULE_NAME_LEN: usize = 10;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// How the virtualization tool is invoked
    pub tool: ToolConfig,

    /// Desired VM state
    pub build: BuildConfig,

    /// Registry to push finished VMs to
    pub registry: RegistryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Convert log level string to tracing::Level
    pub fn level(&self) -> Result<tracing::Level> {
        self.level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Tool invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name or path
    pub executable: String,

    /// Program and arguments to run the executable through (e.g. `["sudo", "-n"]`)
    pub launcher: Vec<String>,

    /// Default guest user, passed to the tool as ANKA_DEFAULT_USER
    pub default_user: String,

    /// Default guest password, passed to the tool as ANKA_DEFAULT_PASSWD
    pub default_password: String,

    /// Run guest commands with debug logging
    pub debug: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            executable: crate::driver::process::DEFAULT_EXECUTABLE.to_string(),
            launcher: Vec::new(),
            default_user: String::new(),
            default_password: String::new(),
            debug: false,
        }
    }
}

impl ToolConfig {
    /// Build a process driver for these settings
    pub fn driver(&self) -> ProcessDriver {
        let mut driver =
            ProcessDriver::new(self.executable.clone()).with_launcher(self.launcher.clone());
        if !self.default_user.is_empty() {
            driver = driver.with_env(DEFAULT_USER_ENV, self.default_user.clone());
        }
        if !self.default_password.is_empty() {
            driver = driver.with_env(DEFAULT_PASSWORD_ENV, self.default_password.clone());
        }
        driver
    }
}

/// A desired port-forwarding rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PortForwardingRuleConfig {
    /// Guest port, required and nonzero
    pub guest_port: u16,

    pub host_port: u16,

    /// Generated when empty
    pub rule_name: String,
}

/// Requested hyperthreading state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hyperthreading {
    #[default]
    Unset,
    Enable,
    Disable,
}

/// Desired VM configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BuildConfig {
    /// Name of the VM to produce; create builds append the installer version
    pub vm_name: String,

    /// Installer app to create the VM from
    pub installer_app: String,

    /// Existing VM to clone from
    pub source_vm_name: String,

    /// Disk size, e.g. `80G`
    pub disk_size: String,

    /// RAM size, e.g. `8G`
    pub ram_size: String,

    /// CPU core count
    pub cpu_count: String,

    pub port_forwarding_rules: Vec<PortForwardingRuleConfig>,

    /// Custom hardware UUID
    pub hw_uuid: String,

    pub enable_htt: bool,
    pub disable_htt: bool,

    /// Stop instead of suspend once provisioning finishes
    pub stop_vm: bool,

    /// Replace an existing VM of the same name
    pub force: bool,
}

impl BuildConfig {
    /// Resolve the enable/disable flags into one request
    pub fn hyperthreading(&self) -> crate::error::Result<Hyperthreading> {
        match (self.enable_htt, self.disable_htt) {
            (true, true) => Err(crate::error::ProvisionError::ConflictingHyperthreadingRequest),
            (true, false) => Ok(Hyperthreading::Enable),
            (false, true) => Ok(Hyperthreading::Disable),
            (false, false) => Ok(Hyperthreading::Unset),
        }
    }

    /// Whether VMs are cloned rather than created from an installer
    pub fn is_clone(&self) -> bool {
        !self.source_vm_name.is_empty()
    }

    /// Validate the build settings and fill in generated rule names.
    ///
    /// All problems are reported together.
    pub fn validate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> crate::error::Result<()> {
        let mut errors = Vec::new();

        if self.installer_app.is_empty() && self.source_vm_name.is_empty() {
            errors.push("installer_app or source_vm_name must be specified".to_string());
        }
        if !self.installer_app.is_empty() && !self.source_vm_name.is_empty() {
            errors.push("cannot specify both an installer_app and source_vm_name".to_string());
        }
        if self.vm_name.is_empty() {
            errors.push("please specify a name for your vm".to_string());
        }
        if self.source_vm_name.contains([' ', '\n']) {
            errors.push("source_vm_name contains spaces".to_string());
        }
        if self.enable_htt && self.disable_htt {
            errors.push("enable_htt and disable_htt cannot both be set".to_string());
        }

        for rule in &mut self.port_forwarding_rules {
            if rule.guest_port == 0 {
                errors.push("guest port is required".to_string());
            }
            if rule.rule_name.is_empty() {
                rule.rule_name = generate_rule_name(rng);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ProvisionError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Generate a port-forwarding rule name of random ASCII letters
pub fn generate_rule_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..RULE_NAME_LEN)
        .map(|_| RULE_NAME_LETTERS[rng.random_range(0..RULE_NAME_LETTERS.len())] as char)
        .collect()
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name of a configured registry
    pub remote: String,

    /// Registry URL
    pub registry_path: String,

    pub cert: String,
    pub key: String,
    pub cacert: String,
    pub insecure: bool,

    /// Tag to push; required when pushing
    pub tag: String,

    pub description: String,

    /// Template name on the registry, if different from the VM name
    pub remote_vm: String,

    pub local: bool,

    /// Push the VM after a successful build
    pub push: bool,
}

impl RegistryConfig {
    pub fn params(&self) -> RegistryParams {
        RegistryParams {
            remote: self.remote.clone(),
            registry_path: self.registry_path.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
            cacert: self.cacert.clone(),
            insecure: self.insecure,
        }
    }

    pub fn push_params(&self, vm_id: &str) -> PushParams {
        PushParams {
            vm_id: vm_id.to_string(),
            tag: self.tag.clone(),
            description: self.description.clone(),
            remote_vm: self.remote_vm.clone(),
            local: self.local,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - VMSMITH_LOG_LEVEL
    /// - VMSMITH_LOG_FORMAT
    /// - VMSMITH_TOOL
    /// - VMSMITH_FORCE
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup("VMSMITH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("VMSMITH_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(tool) = lookup("VMSMITH_TOOL") {
            if !tool.is_empty() {
                self.tool.executable = tool;
            }
        }
        if let Some(force) = lookup("VMSMITH_FORCE") {
            self.build.force = force.parse().unwrap_or(self.build.force);
        }

        self
    }

    /// Validate settings every command depends on
    ///
    /// Build settings are checked separately by [`BuildConfig::validate`].
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.tool.executable.is_empty() {
            anyhow::bail!("Tool executable must not be empty");
        }

        if self.registry.push && self.registry.tag.is_empty() {
            anyhow::bail!("Registry push requires a tag");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clone_build() -> BuildConfig {
        BuildConfig {
            vm_name: "builder".into(),
            source_vm_name: "base-13.6".into(),
            ..BuildConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.tool.executable, "anka");
        assert!(!config.build.force);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/vmsmith.toml").unwrap();
        assert_eq!(config.tool.executable, Config::default().tool.executable);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[tool]
default_user = "anka"

[build]
vm_name = "ci"
source_vm_name = "base"
disk_size = "80G"
enable_htt = true

[[build.port_forwarding_rules]]
guest_port = 22
host_port = 2222

[registry]
tag = "v1"
push = true
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.build.disk_size, "80G");
        assert_eq!(config.build.port_forwarding_rules[0].host_port, 2222);
        assert_eq!(config.build.hyperthreading().unwrap(), Hyperthreading::Enable);
        assert!(config.registry.push);
        assert_eq!(config.logging.level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[build\nvm_name = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_push_requires_tag() {
        let mut config = Config::default();
        config.registry.push = true;
        assert!(config.validate().is_err());
        config.registry.tag = "latest".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VMSMITH_LOG_LEVEL", "trace"),
            ("VMSMITH_TOOL", "/opt/anka/bin/anka"),
            ("VMSMITH_FORCE", "true"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.tool.executable, "/opt/anka/bin/anka");
        assert!(config.build.force);
    }

    #[test]
    fn test_build_requires_exactly_one_source() {
        let mut rng = StdRng::seed_from_u64(7);

        let mut neither = BuildConfig {
            vm_name: "x".into(),
            ..BuildConfig::default()
        };
        assert!(neither.validate(&mut rng).is_err());

        let mut both = clone_build();
        both.installer_app = "/Applications/Install macOS.app".into();
        assert!(both.validate(&mut rng).is_err());

        assert!(clone_build().validate(&mut rng).is_ok());
    }

    #[test]
    fn test_build_reports_every_problem() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut build = BuildConfig {
            source_vm_name: "has space".into(),
            port_forwarding_rules: vec![PortForwardingRuleConfig::default()],
            ..BuildConfig::default()
        };

        let message = build.validate(&mut rng).unwrap_err().to_string();
        assert!(message.contains("name for your vm"));
        assert!(message.contains("contains spaces"));
        assert!(message.contains("guest port is required"));
    }

    #[test]
    fn test_build_fills_missing_rule_names() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut build = clone_build();
        build.port_forwarding_rules = vec![
            PortForwardingRuleConfig {
                guest_port: 22,
                host_port: 2222,
                rule_name: String::new(),
            },
            PortForwardingRuleConfig {
                guest_port: 80,
                host_port: 8080,
                rule_name: "web".into(),
            },
        ];

        build.validate(&mut rng).unwrap();
        let generated = &build.port_forwarding_rules[0].rule_name;
        assert_eq!(generated.len(), RULE_NAME_LEN);
        assert!(generated.chars().all(|c| c.is_ascii_alphabetic()));
        assert_eq!(build.port_forwarding_rules[1].rule_name, "web");
    }

    #[test]
    fn test_conflicting_hyperthreading() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut build = clone_build();
        build.enable_htt = true;
        build.disable_htt = true;

        assert!(matches!(
            build.hyperthreading(),
            Err(crate::error::ProvisionError::ConflictingHyperthreadingRequest)
        ));
        assert!(build.validate(&mut rng).is_err());
    }

    #[test]
    fn test_tool_driver_carries_credentials() {
        let tool = ToolConfig {
            default_user: "anka".into(),
            ..ToolConfig::default()
        };
        let driver = tool.driver();
        assert_eq!(driver.executable(), "anka");
        assert_eq!(
            driver.envs(),
            &[(DEFAULT_USER_ENV.to_string(), "anka".to_string())]
        );
    }

    proptest! {
        #[test]
        fn prop_rule_names_are_ten_letters(seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let name = generate_rule_name(&mut rng);
            prop_assert_eq!(name.len(), RULE_NAME_LEN);
            prop_assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
        }
    }
}
