//! Post-processing of a finished VM: pushing it to a registry and stopping it

use crate::client::{Client, RegistryApi, StopParams};
use crate::config::RegistryConfig;
use crate::error::{ProvisionError, Result};
use crate::ui::Ui;
use tracing::{debug, info};

/// REST client for the configured registry, falling back to the tool's default repo
pub async fn resolve_registry_api(client: &Client, registry: &RegistryConfig) -> Result<RegistryApi> {
    if !registry.registry_path.is_empty() {
        return Ok(RegistryApi::new(registry.registry_path.as_str()));
    }

    let repo = client.registry_default_repo().await?;
    debug!("Using default registry {} at {}", repo.id, repo.url());
    Ok(RegistryApi::new(repo.url()))
}

/// Push `vm_name` to the registry.
///
/// With `revert_with`, the latest tag of an existing template of the same
/// name is reverted first so the push can reuse the tag.
pub async fn push_to_registry(
    client: &Client,
    ui: &dyn Ui,
    registry: &RegistryConfig,
    vm_name: &str,
    revert_with: Option<&RegistryApi>,
) -> Result<()> {
    if registry.tag.is_empty() {
        return Err(ProvisionError::InvalidConfig(
            "registry tag is required to push".into(),
        ));
    }

    if let Some(api) = revert_with {
        let template_name = if registry.remote_vm.is_empty() {
            vm_name
        } else {
            registry.remote_vm.as_str()
        };

        let templates = api.list_templates().await?;
        if let Some(template) = templates.iter().find(|t| t.name == template_name) {
            ui.say(&format!(
                "Found existing template {} ({}) on registry",
                template.name, template.id
            ));
            api.revert(&template.id).await?;
            ui.say(&format!("Reverted latest tag of template {}", template.id));
        }
    }

    ui.say(&format!(
        "Pushing {} to registry with tag {}",
        vm_name, registry.tag
    ));
    client
        .registry_push(&registry.params(), &registry.push_params(vm_name))
        .await?;
    info!("Pushed {} to registry", vm_name);
    Ok(())
}

/// Stop the artifact VM
pub async fn stop_artifact(client: &Client, vm_name: &str, force: bool) -> Result<()> {
    info!("Stopping VM {}", vm_name);
    client
        .stop(&StopParams {
            vm_name: vm_name.to_string(),
            force,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::ui::RecordingUi;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    // Answers one connection per canned body, in order, and collects request lines.
    async fn serve(bodies: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                let text = String::from_utf8_lossy(&request).into_owned();
                lines.push(text.lines().next().unwrap_or_default().to_string());
            }
            lines
        });

        (url, handle)
    }

    fn api(url: String) -> RegistryApi {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        RegistryApi::with_client(http, url)
    }

    fn registry(tag: &str) -> RegistryConfig {
        RegistryConfig {
            remote: "office".into(),
            tag: tag.into(),
            ..RegistryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_push_without_tag_is_rejected() {
        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());
        let ui = RecordingUi::new();

        let err = push_to_registry(&client, &ui, &registry(""), "foo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
        assert!(driver.commands().is_empty());
    }

    #[tokio::test]
    async fn test_plain_push() {
        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());
        let ui = RecordingUi::new();

        push_to_registry(&client, &ui, &registry("v1"), "foo", None)
            .await
            .unwrap();
        assert_eq!(
            driver.commands(),
            vec!["registry --remote office push --tag v1 foo"]
        );
    }

    #[tokio::test]
    async fn test_forced_push_reverts_matching_template() {
        let templates = json!({
            "status": "OK",
            "body": [
                {"name": "other", "id": "t-0"},
                {"name": "foo", "id": "t-1", "versions": [{"tag": "v1", "number": "3"}]}
            ]
        })
        .to_string();
        let reverted = json!({"status": "OK"}).to_string();
        let (url, handle) = serve(vec![templates, reverted]).await;

        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());
        let ui = RecordingUi::new();
        push_to_registry(&client, &ui, &registry("v1"), "foo", Some(&api(url)))
            .await
            .unwrap();

        assert_eq!(
            handle.await.unwrap(),
            vec![
                "GET /registry/v2/vm HTTP/1.1",
                "DELETE /registry/revert?id=t-1 HTTP/1.1"
            ]
        );
        assert_eq!(driver.count("registry --remote office push"), 1);
    }

    #[tokio::test]
    async fn test_forced_push_without_existing_template() {
        let templates = json!({"status": "OK", "body": []}).to_string();
        let (url, handle) = serve(vec![templates]).await;

        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());
        let ui = RecordingUi::new();
        push_to_registry(&client, &ui, &registry("v1"), "foo", Some(&api(url)))
            .await
            .unwrap();

        assert_eq!(handle.await.unwrap().len(), 1);
        assert_eq!(driver.count("registry"), 1);
    }

    #[tokio::test]
    async fn test_registry_path_wins_over_default_repo() {
        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());
        let config = RegistryConfig {
            registry_path: "http://registry.local:8089/".into(),
            ..RegistryConfig::default()
        };

        let api = resolve_registry_api(&client, &config).await.unwrap();
        assert_eq!(api.base_url(), "http://registry.local:8089");
        assert!(driver.commands().is_empty());
    }

    #[tokio::test]
    async fn test_default_repo_is_resolved_through_tool() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.reply_ok(
            "registry list-repos --default",
            json!({"default": true, "id": "r1", "host": "10.0.0.2", "scheme": "https", "port": "443"}),
        );
        let client = Client::new(driver);

        let api = resolve_registry_api(&client, &RegistryConfig::default())
            .await
            .unwrap();
        assert_eq!(api.base_url(), "https://10.0.0.2:443");
    }

    #[tokio::test]
    async fn test_stop_artifact() {
        let driver = Arc::new(ScriptedDriver::new());
        let client = Client::new(driver.clone());

        stop_artifact(&client, "foo", false).await.unwrap();
        stop_artifact(&client, "foo", true).await.unwrap();
        assert_eq!(driver.commands(), vec!["stop foo", "stop --force foo"]);
    }
}
