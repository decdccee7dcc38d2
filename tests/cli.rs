#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use shiftbook_lib::{DatasetStore, LocalDataset};
use tempfile::TempDir;

use util::{id, shift, tx};

fn shiftbook(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("shiftbook").unwrap();
    cmd.env_remove("SHIFTBOOK_DATA_DIR")
        .env("SHIFTBOOK_LOG", "shiftbook=warn")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn export_inspect_and_restore_round_trip() {
    let source = TempDir::new().unwrap();
    let mut dataset = LocalDataset::default();
    dataset.shifts = vec![shift(id(1), 31.5), shift(id(2), 12.0)];
    dataset.transactions = vec![tx("Oct 13 - Oct 20", 9.5)];
    DatasetStore::new(source.path()).save(&dataset).unwrap();

    let out = TempDir::new().unwrap();
    let export = shiftbook(source.path())
        .arg("export")
        .arg("--out")
        .arg(out.path())
        .output()
        .unwrap();
    assert!(export.status.success(), "{}", String::from_utf8_lossy(&export.stderr));
    let bundle = PathBuf::from(stdout_json(&export)["path"].as_str().unwrap());
    assert!(bundle.is_file());

    let inspect = shiftbook(source.path())
        .arg("inspect")
        .arg(&bundle)
        .output()
        .unwrap();
    assert!(inspect.status.success());
    let summary = stdout_json(&inspect);
    assert_eq!(summary["format"], "archive");
    assert_eq!(summary["shifts"], 2);
    assert_eq!(summary["transactions"], 1);

    let target = TempDir::new().unwrap();
    let dry = shiftbook(target.path())
        .args(["restore", "--policy", "merge", "--dry-run", "--bundle"])
        .arg(&bundle)
        .output()
        .unwrap();
    assert!(dry.status.success());
    assert_eq!(stdout_json(&dry)["preview"]["shifts"]["added"], 2);
    assert!(!target.path().join("dataset.json").exists());

    let restore = shiftbook(target.path())
        .args(["restore", "--policy", "replace-all", "--bundle"])
        .arg(&bundle)
        .output()
        .unwrap();
    assert!(restore.status.success(), "{}", String::from_utf8_lossy(&restore.stderr));
    let outcome = stdout_json(&restore);
    assert_eq!(outcome["result"]["shiftsAdded"], 2);
    assert_eq!(DatasetStore::new(target.path()).load().unwrap(), dataset);
}

#[test]
fn missing_bundle_exits_with_error_code() {
    let data = TempDir::new().unwrap();
    let output = shiftbook(data.path())
        .args(["restore", "--policy", "add-missing", "--bundle"])
        .arg(data.path().join("absent.zip"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("BUNDLE/IO"));
}

#[test]
fn unknown_policy_is_rejected_by_the_parser() {
    let data = TempDir::new().unwrap();
    shiftbook(data.path())
        .args(["restore", "--policy", "overwrite", "--bundle", "x.zip"])
        .assert()
        .failure();
}
