//! Registry operations
//!
//! Push, pull and listing go through the tool's `registry` verb. Listing
//! templates and reverting a tag are only available on the registry's REST
//! API, which answers with the same status/body object as the tool.

use super::{argv, Client};
use crate::driver::MachineReadableOutput;
use crate::error::{ProvisionError, Result};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Connection options placed before every `registry` subcommand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryParams {
    /// Name of a configured registry (`--remote`)
    pub remote: String,

    /// Registry URL (`--registry-path`)
    pub registry_path: String,

    pub cert: String,
    pub key: String,
    pub cacert: String,
    pub insecure: bool,
}

impl RegistryParams {
    fn args(&self, subcommand: Vec<String>) -> Vec<String> {
        let mut args = argv(&["registry"]);
        let flags = [
            ("--remote", &self.remote),
            ("--registry-path", &self.registry_path),
            ("--cert", &self.cert),
            ("--key", &self.key),
            ("--cacert", &self.cacert),
        ];
        for (flag, value) in flags {
            if !value.is_empty() {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        if self.insecure {
            args.push("--insecure".to_string());
        }
        args.extend(subcommand);
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushParams {
    pub vm_id: String,
    pub tag: String,
    pub description: String,
    pub remote_vm: String,
    pub local: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullParams {
    pub vm_id: String,
    pub tag: String,
    pub local: bool,

    /// Only meaningful together with `local`
    pub shrink: bool,
}

/// Entry of `registry list`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryListEntry {
    pub latest: String,
    pub id: String,
    pub name: String,
}

/// Entry of `registry list-repos`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryRepo {
    pub default: bool,
    pub id: String,
    pub host: String,
    pub scheme: String,
    pub port: String,
}

impl RegistryRepo {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryTemplateVersion {
    pub tag: String,
    #[serde(rename = "number")]
    pub serial_number: String,
    pub description: String,
    pub images: Vec<String>,
    pub state_files: Vec<String>,
    pub config_file: String,
    pub nvram: String,
    pub size: u64,
}

/// Template as listed by the registry REST API
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryTemplate {
    pub name: String,
    pub id: String,
    pub size: u64,
    pub versions: Vec<RegistryTemplateVersion>,
}

impl Client {
    pub async fn registry_list(&self, registry: &RegistryParams) -> Result<Vec<RegistryListEntry>> {
        self.invoke(registry.args(argv(&["list"])))
            .await?
            .decode_body("registry list")
    }

    pub async fn registry_push(&self, registry: &RegistryParams, push: &PushParams) -> Result<()> {
        let mut sub = argv(&["push"]);
        if !push.tag.is_empty() {
            sub.extend(argv(&["--tag", push.tag.as_str()]));
        }
        if !push.description.is_empty() {
            sub.extend(argv(&["--description", push.description.as_str()]));
        }
        if !push.remote_vm.is_empty() {
            sub.extend(argv(&["--remote-vm", push.remote_vm.as_str()]));
        }
        if push.local {
            sub.push("--local".to_string());
        }
        sub.push(push.vm_id.clone());

        self.invoke(registry.args(sub)).await?;
        Ok(())
    }

    pub async fn registry_pull(&self, registry: &RegistryParams, pull: &PullParams) -> Result<()> {
        let mut sub = argv(&["pull"]);
        if !pull.tag.is_empty() {
            sub.extend(argv(&["--tag", pull.tag.as_str()]));
        }
        if pull.local {
            sub.push("--local".to_string());
            if pull.shrink {
                sub.push("--shrink".to_string());
            }
        }
        sub.push(pull.vm_id.clone());

        self.invoke(registry.args(sub)).await?;
        Ok(())
    }

    /// All configured registries, keyed by name
    pub async fn registry_list_repos(&self) -> Result<HashMap<String, RegistryRepo>> {
        self.invoke(argv(&["registry", "list-repos"]))
            .await?
            .decode_body("registry list-repos")
    }

    pub async fn registry_default_repo(&self) -> Result<RegistryRepo> {
        self.invoke(argv(&["registry", "list-repos", "--default"]))
            .await?
            .decode_body("registry list-repos --default")
    }
}

/// Client for the registry REST API
#[derive(Debug, Clone)]
pub struct RegistryApi {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, timeouts)
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, url: String) -> Result<MachineReadableOutput> {
        debug!("[API REQUEST] [{}] {}", method, url);

        let response = self.http.request(method, &url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ProvisionError::RegistryStatus(response.status().as_u16()));
        }

        let body = response.text().await?;
        debug!("[API RESPONSE] {}", body);

        Ok(MachineReadableOutput::parse(&body)?.into_result()?)
    }

    /// `GET /registry/v2/vm`
    pub async fn list_templates(&self) -> Result<Vec<RegistryTemplate>> {
        self.request(Method::GET, format!("{}/registry/v2/vm", self.base_url))
            .await?
            .decode_body("registry v2 vm")
    }

    /// `DELETE /registry/revert?id=<id>`, dropping the template's latest tag
    pub async fn revert(&self, id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            format!("{}/registry/revert?id={}", self.base_url, id),
        )
        .await?;
        Ok(())
    }
}
