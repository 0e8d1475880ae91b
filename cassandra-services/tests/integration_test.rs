// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the cassandra-services binary

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

const RESOURCE: &str = r#"
metadata:
  name: cassandra-services
  namespace: cassandra
spec:
  cassandra:
    secretName: cassandra-secret
    deploymentSchema:
      dataCenters:
        - name: dc0
          replicas: 3
          deploy: true
        - name: dc1
          replicas: 2
          deploy: true
  backupDaemon:
    install: true
    secretName: cassandra-backup-api-credentials
    storageDirectory: /backup-storage
    storage:
      size: ["5Gi"]
"#;

/// Config with its state directory inside `temp_dir`
fn write_config(temp_dir: &TempDir) -> PathBuf {
    let config_path = temp_dir.path().join("cassandra-services.toml");
    let config_content = format!(
        r#"name = "test"
namespace = "cassandra"
state_dir = "{}"

[retry]
tries_count = 3
retry_timeout_secs = 0
"#,
        temp_dir.path().join("state").display()
    );
    std::fs::write(&config_path, config_content).unwrap();
    config_path
}

fn write_resource(temp_dir: &TempDir, contents: &str) -> PathBuf {
    let resource_path = temp_dir.path().join("resource.yaml");
    std::fs::write(&resource_path, contents).unwrap();
    resource_path
}

fn run(config_path: &Path, args: &[&str], resource_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--config").arg(config_path).args(args).arg(resource_path);
    cmd
}

/// Test the version command
#[test]
fn test_version_command() {
    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("cassandra-services v"))
        .stdout(predicate::str::contains("Supplementary services"));
}

/// Test the help output
#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("replication"))
        .stdout(predicate::str::contains("diff"));
}

/// Test init command creates config file
#[test]
fn test_init_creates_config() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("cassandra-services.toml");

    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--config").arg(&config_path).arg("init");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("SPDX-License-Identifier"));
    assert!(content.contains("tries_count = 5"));
}

/// Test init refuses to overwrite without --force
#[test]
fn test_init_existing_without_force() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("cassandra-services.toml");
    std::fs::write(&config_path, "old content").unwrap();

    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--config").arg(&config_path).arg("init");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert_eq!(content, "old content");
}

/// Test init with --force overwrites existing config
#[test]
fn test_init_force() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("cassandra-services.toml");
    std::fs::write(&config_path, "old content").unwrap();

    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--config").arg(&config_path).arg("init").arg("--force");
    cmd.assert().success();

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(!content.contains("old content"));
    assert!(content.contains("name = \"cassandra-services\""));
}

/// Test config command shows defaults when no file exists
#[test]
fn test_config_defaults() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nonexistent.toml");

    let mut cmd = Command::cargo_bin("cassandra-services").unwrap();
    cmd.arg("--config").arg(&config_path).arg("config");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Using defaults"))
        .stdout(predicate::str::contains("tries_count = 5"));
}

/// Test the replication descriptor of every deployed data center
#[test]
fn test_replication_command() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    run(&config_path, &["replication"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("'dc0': '3','dc1': '2'"))
        .stdout(predicate::str::contains(
            "CREATE KEYSPACE IF NOT EXISTS ssh WITH REPLICATION",
        ));
}

/// Test a resource without deployed data centers has no replication
#[test]
fn test_replication_without_deployed_data_centers() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(
        &temp_dir,
        r#"
spec:
  cassandra:
    secretName: cassandra-secret
    deploymentSchema:
      dataCenters:
        - name: dc0
          replicas: 3
"#,
    );

    run(&config_path, &["replication"], &resource_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to compute keyspace replication"));
}

/// Test an unparsable resource is reported with its path
#[test]
fn test_invalid_resource() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, "spec: [not, a, mapping]");

    run(&config_path, &["diff"], &resource_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load resource"));
}

/// Test diff before and after recording the resource
#[test]
fn test_diff_then_commit() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    run(&config_path, &["diff"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("first pass"))
        .stdout(predicate::str::contains("Service: backup"));

    run(&config_path, &["commit"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded last applied configuration"));
    assert!(temp_dir
        .path()
        .join("state/test-last-applied-configuration-info.json")
        .exists());

    run(&config_path, &["diff"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

/// Test plan lists the backup steps without running them
#[test]
fn test_plan_command() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    run(&config_path, &["plan"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("backup [clean-deploy]"))
        .stdout(predicate::str::contains("- create-storage-claims"))
        .stdout(predicate::str::contains("- ssh-key-bootstrap"))
        .stdout(predicate::str::contains("dbaas (not installed)"));
}

/// Test a simulated pass runs the backup pipeline end to end
#[test]
fn test_simulate_command() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    run(&config_path, &["simulate"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("backup [clean-deploy]: completed"))
        .stdout(predicate::str::contains("- ssh-key-bootstrap"))
        .stdout(predicate::str::contains("robot-tests [empty]: skipped"))
        .stdout(predicate::str::contains("Remote commands: 25"));
}

/// Test a simulated pass after commit has nothing to do
#[test]
fn test_simulate_after_commit() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    run(&config_path, &["commit"], &resource_path).assert().success();

    run(&config_path, &["simulate"], &resource_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("backup [clean-deploy]: unchanged"))
        .stdout(predicate::str::contains("Remote commands: 0"));
}

/// Test the JSON pass report
#[test]
fn test_simulate_json() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(&temp_dir);
    let resource_path = write_resource(&temp_dir, RESOURCE);

    let output = run(&config_path, &["simulate", "--json"], &resource_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pipelines"][0]["service"], "backup");
    assert_eq!(report["pipelines"][0]["outcome"], "Completed");
}
