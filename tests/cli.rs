use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn vmsmith() -> Command {
    Command::cargo_bin("vmsmith").unwrap()
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("vmsmith.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_cli_version() {
    vmsmith()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vmsmith 0.1.0"));
}

#[test]
fn test_cli_help() {
    vmsmith()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Build macOS VM templates from installers or existing VMs",
        ));
}

#[test]
fn test_cli_requires_subcommand() {
    vmsmith().assert().failure();
}

#[test]
fn test_cli_stop_requires_vm() {
    vmsmith()
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_build_rejects_incomplete_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[build]\nram_size = \"8G\"\n");

    vmsmith()
        .args(["--config", &config, "build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("please specify a name for your vm"))
        .stderr(predicate::str::contains(
            "installer_app or source_vm_name must be specified",
        ));
}

#[test]
fn test_cli_rejects_invalid_log_level() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[logging]\nlevel = \"loud\"\n");

    vmsmith()
        .args(["--config", &config, "show", "foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_cli_show_through_fake_tool() {
    let dir = TempDir::new().unwrap();
    let tool = dir.path().join("fake-anka");
    fs::write(
        &tool,
        r#"echo '{"status":"OK","body":{"uuid":"u-1","name":"foo","status":"stopped","cpu_cores":2},"message":"","code":0}'"#,
    )
    .unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "[tool]\nexecutable = {:?}\nlauncher = [\"sh\"]\n",
            tool.to_string_lossy()
        ),
    );

    vmsmith()
        .args(["--config", &config, "show", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"uuid\": \"u-1\""))
        .stdout(predicate::str::contains("\"status\": \"stopped\""));
}

#[test]
fn test_cli_stop_reports_tool_error() {
    let dir = TempDir::new().unwrap();
    let tool = dir.path().join("fake-anka");
    fs::write(
        &tool,
        r#"echo '{"status":"ERROR","body":{},"message":"vm foo not found","code":3,"exception_type":"VMNotFoundException"}'"#,
    )
    .unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "[tool]\nexecutable = {:?}\nlauncher = [\"sh\"]\n",
            tool.to_string_lossy()
        ),
    );

    vmsmith()
        .args(["--config", &config, "stop", "foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vm foo not found"));
}
