//! CLI integration tests for the `hireline` subcommands.
//!
//! Uses `assert_cmd` to spawn the binary and verify exit codes, stdout
//! content, and stderr content.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn hireline() -> Command {
    let mut cmd = cargo_bin_cmd!("hireline");
    cmd.env_remove("HIRELINE_LOG");
    cmd
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    hireline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Freelance marketplace engagement engine",
        ));
}

#[test]
fn help_lists_subcommands() {
    hireline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("fees"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn version_prints_crate_version() {
    hireline()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_subcommand_fails() {
    hireline().arg("frobnicate").assert().failure();
}

// ──────────────────────────────────────────────
// 2. fees
// ──────────────────────────────────────────────

#[test]
fn fees_default_rate_text() {
    hireline()
        .args(["fees", "900"])
        .assert()
        .success()
        .stdout(predicate::str::contains("platform fee (5%)"))
        .stdout(predicate::str::contains("45.00"))
        .stdout(predicate::str::contains("855.00"));
}

#[test]
fn fees_json_output() {
    let output = hireline()
        .args(["--output", "json", "fees", "1250.50", "--percent", "10"])
        .output()
        .expect("run hireline");
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["escrow_amount"], "1250.50");
    assert_eq!(v["platform_fee_percentage"], "10");
    assert_eq!(v["platform_fee_amount"], "125.05");
    assert_eq!(v["freelancer_payout_amount"], "1125.45");
}

#[test]
fn fees_rejects_zero_amount() {
    hireline()
        .args(["fees", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn fees_rejects_sub_cent_amount() {
    hireline().args(["fees", "10.005"]).assert().failure();
}

#[test]
fn fees_rejects_out_of_range_percent() {
    hireline()
        .args(["fees", "100", "--percent", "150"])
        .assert()
        .failure();
}

#[test]
fn fees_rejects_non_numeric_amount() {
    hireline().args(["fees", "lots"]).assert().failure();
}

// ──────────────────────────────────────────────
// 3. inspect
// ──────────────────────────────────────────────

#[test]
fn inspect_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    hireline()
        .arg("inspect")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("data file not found"));
}

#[test]
fn inspect_empty_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    fs::write(&path, r#"{"format":1,"next_seq":0,"records":[]}"#).unwrap();

    hireline()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("no projects"));
}

#[test]
fn inspect_store_with_project_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let store = serde_json::json!({
        "format": 1,
        "next_seq": 1,
        "records": [{
            "kind": "project",
            "id": "p-1",
            "parent_id": null,
            "version": 0,
            "seq": 0,
            "body": {
                "id": "p-1",
                "client_id": "alice",
                "freelancer_id": null,
                "title": "Landing page",
                "description": "",
                "status": "open",
                "budget_min": "500",
                "budget_max": "1000",
                "deadline": null,
                "duration": null,
                "skills": [],
                "accepted_proposal_id": null,
                "escrow": null,
                "cancellation_note": null,
                "created_at": "2025-03-01T12:00:00Z",
                "updated_at": "2025-03-01T12:00:00Z"
            }
        }]
    });
    fs::write(&path, serde_json::to_vec(&store).unwrap()).unwrap();

    let output = hireline()
        .args(["--output", "json", "inspect"])
        .arg(&path)
        .output()
        .expect("run hireline");
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["projects"][0]["id"], "p-1");
    assert_eq!(v["projects"][0]["status"], "open");
    assert_eq!(v["projects"][0]["proposals"], 0);

    hireline()
        .args(["inspect", "--project", "p-1"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Landing page"))
        .stdout(predicate::str::contains("alice"));

    hireline()
        .args(["inspect", "--project", "missing"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn inspect_corrupt_store_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    fs::write(&path, "not json").unwrap();
    hireline().arg("inspect").arg(&path).assert().failure();
}

// ──────────────────────────────────────────────
// 4. serve argument handling
// ──────────────────────────────────────────────

#[test]
fn serve_rejects_unreadable_config() {
    hireline()
        .args(["serve", "--config", "/nonexistent/hireline.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not read"));
}

#[test]
fn serve_rejects_invalid_fee() {
    hireline()
        .args(["serve", "--port", "0", "--fee-percent", "250"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("platform_fee_percentage"));
}

#[test]
fn serve_rejects_unknown_config_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hireline.toml");
    fs::write(&path, "[server]\nprot = 9000\n").unwrap();
    hireline()
        .arg("serve")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not parse"));
}
