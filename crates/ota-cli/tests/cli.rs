use std::{fs, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn embedded_bundle(dir: &Path) {
    fs::create_dir_all(dir).expect("bundle dir");
    fs::write(dir.join("index.bundle"), "abc").expect("bundle file");
    let manifest = format!(
        r#"{{"id":"E1","commitTime":0,"binaryCompatibility":"1","assets":[{{"key":"index.bundle","hashType":"sha256","contentHash":"{ABC_SHA256}","isLaunchAsset":true,"embeddedPath":"index.bundle"}}]}}"#
    );
    fs::write(dir.join("app.manifest.json"), manifest).expect("manifest");
}

const OTA_VARS: [&str; 9] = [
    "OTA_ROOT",
    "OTA_BINARY_VERSION",
    "OTA_MANIFEST_URL",
    "OTA_EMBEDDED_DIR",
    "OTA_CHECK_ON_LAUNCH",
    "OTA_RELOAD_ON_UPDATE",
    "OTA_ONLINE",
    "OTA_DOWNLOAD_PARALLELISM",
    "OTA_DOWNLOAD_ATTEMPTS",
];

fn clean_ota() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ota");
    for var in OTA_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn ota(temp: &TempDir, args: &[&str]) -> assert_cmd::assert::Assert {
    clean_ota()
        .arg("--root")
        .arg(temp.path().join("store"))
        .arg("--embedded-dir")
        .arg(temp.path().join("embedded"))
        .args(["--binary-version", "1", "--offline", "--json"])
        .args(args)
        .assert()
}

fn json_output(assert: &assert_cmd::assert::Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("json payload")
}

#[test]
fn help_lists_commands() {
    let assert = cargo_bin_cmd!("ota").arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help");
    for command in ["launch", "check", "fetch", "status", "gc"] {
        assert!(output.contains(command), "help missing {command}: {output}");
    }
}

#[test]
fn launch_resolves_the_embedded_update() {
    let temp = tempfile::tempdir().expect("tempdir");
    embedded_bundle(&temp.path().join("embedded"));

    let assert = ota(&temp, &["launch"]).success();
    let payload = json_output(&assert);
    assert_eq!(payload["status"], "ok");
    let launched = &payload["details"]["launched"];
    assert_eq!(launched["update"]["id"], "E1");
    assert_eq!(launched["update"]["status"], "embedded");
    let launch_path = launched["launch_asset_path"].as_str().expect("path");
    assert_eq!(fs::read_to_string(launch_path).expect("launch asset"), "abc");
    assert_eq!(launched["asset_files"]["index.bundle"], launch_path);
}

#[test]
fn status_lists_recorded_updates() {
    let temp = tempfile::tempdir().expect("tempdir");
    embedded_bundle(&temp.path().join("embedded"));
    ota(&temp, &["launch"]).success();

    let payload = json_output(&ota(&temp, &["status"]).success());
    let updates = payload["details"]["updates"].as_array().expect("updates");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["update"]["id"], "E1");
    assert_eq!(updates[0]["asset_count"], 1);
    assert_eq!(updates[0]["marked_for_deletion"], false);
}

#[test]
fn gc_keeps_the_launched_update() {
    let temp = tempfile::tempdir().expect("tempdir");
    embedded_bundle(&temp.path().join("embedded"));

    let payload = json_output(&ota(&temp, &["gc"]).success());
    assert_eq!(payload["details"]["launched"], "E1");
    assert_eq!(payload["details"]["summary"]["updates_deleted"], 0);
}

#[test]
fn launch_without_any_update_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = ota(&temp, &["launch"]).failure();
    let payload = json_output(&assert);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["code"], "OTA400");
}

#[test]
fn check_requires_a_remote_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    embedded_bundle(&temp.path().join("embedded"));
    let payload = json_output(&ota(&temp, &["check"]).failure());
    assert_eq!(payload["code"], "OTA410");
}

#[test]
fn environment_configures_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    embedded_bundle(&temp.path().join("embedded"));

    let assert = clean_ota()
        .env("OTA_ROOT", temp.path().join("store"))
        .env("OTA_BINARY_VERSION", "1")
        .env("OTA_EMBEDDED_DIR", temp.path().join("embedded"))
        .env("OTA_MANIFEST_URL", "http://127.0.0.1:9/manifest")
        .env("OTA_ONLINE", "0")
        .args(["--json", "check"])
        .assert()
        .failure();
    assert_eq!(json_output(&assert)["code"], "OTA410");

    let assert = clean_ota()
        .env("OTA_ROOT", temp.path().join("store"))
        .env("OTA_BINARY_VERSION", "1")
        .args(["--json", "status"])
        .assert()
        .success();
    let payload = json_output(&assert);
    assert_eq!(payload["details"]["updates"][0]["update"]["id"], "E1");
}
