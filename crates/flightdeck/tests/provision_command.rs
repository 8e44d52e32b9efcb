use std::fs;

use predicates::str::contains;
use tempfile::TempDir;

macro_rules! flightdeck {
    () => {{
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flightdeck");
        cmd.env("RUST_LOG", "off");
        cmd
    }};
}

fn flight_files(dir: &TempDir) -> usize {
    fs::read_dir(dir.path().join(".flightdeck/flights"))
        .expect("store directory exists")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
        .count()
}

#[test]
fn provision_succeeds_and_prints_resources() {
    let dir = TempDir::new().expect("create temp dir");

    flightdeck!()
        .args(["provision", "alpha"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(contains("Workspace 'alpha' provisioned"))
        .stdout(contains("bucket:   gs://ws-alpha-data"))
        .stdout(contains("✓ summarize"));

    assert_eq!(flight_files(&dir), 1);
}

#[test]
fn failed_step_is_rolled_back() {
    let dir = TempDir::new().expect("create temp dir");

    flightdeck!()
        .args(["provision", "beta", "--fail-at", "3"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stdout(contains("Provisioning failed: step 'grant_bucket_role' failed"))
        .stdout(contains("↩ create_identity"))
        .stdout(contains("↩ create_project"))
        .stderr(contains("ended with status error"));
}

#[test]
fn failed_undo_reports_incomplete_rollback() {
    let dir = TempDir::new().expect("create temp dir");

    flightdeck!()
        .args(["provision", "gamma", "--fail-at", "3", "--fatal-undo", "1"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stdout(contains("Rollback is incomplete"))
        .stdout(contains("↩ create_identity"))
        .stdout(contains("⚠ create_bucket"))
        .stderr(contains("ended with status fatal"));
}

#[test]
fn empty_workspace_name_is_a_construction_error() {
    let dir = TempDir::new().expect("create temp dir");

    flightdeck!()
        .args(["provision", " "])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(contains("failed to build flight 'create_workspace'"))
        .stderr(contains("workspace name is empty"));

    assert_eq!(flight_files(&dir), 0);
}

#[test]
fn store_directory_comes_from_config() {
    let dir = TempDir::new().expect("create temp dir");
    fs::write(
        dir.path().join("flightdeck.toml"),
        "[store]\ndir = \"records\"\n",
    )
    .expect("write config");

    flightdeck!()
        .args(["provision", "delta"])
        .current_dir(dir.path())
        .assert()
        .success();

    assert!(dir.path().join("records").is_dir());
    assert!(!dir.path().join(".flightdeck").exists());
}

#[test]
fn invalid_config_names_the_file() {
    let dir = TempDir::new().expect("create temp dir");
    fs::write(dir.path().join("custom.toml"), "[store]\nlocation = \"x\"\n").expect("write config");

    flightdeck!()
        .args(["--config", "custom.toml", "provision", "epsilon"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(contains("invalid configuration file 'custom.toml'"))
        .stderr(contains("caused by:"));
}
