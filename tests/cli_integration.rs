//! CLI Integration Tests
//!
//! These tests drive the `datalayer` binary end-to-end and check the JSON it
//! prints, not just the library underneath.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Run datalayer and return (parsed stdout, stderr, success)
fn run_datalayer(args: &[&str], db_path: &Path) -> (Value, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_datalayer"))
        .arg("-d")
        .arg(db_path)
        .args(["-f", "json"])
        .args(args)
        .env_remove("DATALAYER_LOG")
        .output()
        .expect("Failed to execute datalayer");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let json = serde_json::from_str(stdout.trim()).unwrap_or(Value::Null);
    (
        json,
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn create_store(db_path: &Path) -> String {
    let (json, stderr, success) = run_datalayer(&["create-kv-store"], db_path);
    assert!(success, "create-kv-store failed: {}", stderr);
    json["id"].as_str().unwrap().to_string()
}

fn update(db_path: &Path, id: &str, changelist: &str) -> (Value, bool) {
    let (json, _stderr, success) = run_datalayer(
        &["update-kv-store", "--id", id, "--changelist", changelist],
        db_path,
    );
    (json, success)
}

// ============================================================================
// Database Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let (json, _stderr, success) = run_datalayer(&["init"], &db_path);

    assert!(success, "init should succeed");
    assert_eq!(json["status"], "ok");
    assert!(db_path.exists(), "database file should be created");
    assert!(dir.path().join("test.db.config").exists());
}

#[test]
fn test_cli_init_refuses_existing_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let (json, _stderr, success) = run_datalayer(&["init"], &db_path);
    assert!(!success, "init must not replace an existing database");
    assert!(json["message"].as_str().unwrap().contains("--force"));

    let (json, _stderr, _) = run_datalayer(&["list-stores"], &db_path);
    assert_eq!(json["count"], 1);
    assert_eq!(json["store_ids"][0], id.as_str());

    let (_json, _stderr, success) = run_datalayer(&["init", "--force"], &db_path);
    assert!(success);
    let (json, _stderr, _) = run_datalayer(&["list-stores"], &db_path);
    assert_eq!(json["count"], 0);
}

#[test]
fn test_cli_default_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_datalayer"))
        .args(["--help"])
        .output()
        .expect("Failed to execute datalayer");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("[default: datalayer.db]"),
        "Default database path should be datalayer.db, got: {}",
        stdout
    );
}

// ============================================================================
// Store Tests
// ============================================================================

#[test]
fn test_cli_new_store_is_empty() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);
    assert_eq!(id.len(), 64);

    let (json, _stderr, success) = run_datalayer(&["get-pairs", "--id", &id], &db_path);
    assert!(success);
    assert_eq!(json["count"], 0);

    let (json, _stderr, _) = run_datalayer(&["get-root", "--id", &id], &db_path);
    assert_eq!(json["root"], "0".repeat(64));
    assert_eq!(json["generation"], 0);
}

#[test]
fn test_cli_list_stores() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let a = create_store(&db_path);
    let b = create_store(&db_path);

    let (json, _stderr, success) = run_datalayer(&["list-stores"], &db_path);
    assert!(success);
    assert_eq!(json["count"], 2);
    let ids: Vec<_> = json["store_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(ids.contains(&a));
    assert!(ids.contains(&b));
}

// ============================================================================
// Changelist Tests
// ============================================================================

#[test]
fn test_cli_insert_and_get_value() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let (json, success) = update(
        &db_path,
        &id,
        r#"[{"action":"insert","key":"6b31","value":"7631"},
            {"action":"insert","key":"6b32","value":"7632"}]"#,
    );
    assert!(success, "update failed: {}", json);
    assert_eq!(json["generation"], 1);
    assert_eq!(json["changes"], 2);

    let (json, _stderr, success) =
        run_datalayer(&["get-value", "--id", &id, "--key", "6b31"], &db_path);
    assert!(success);
    assert_eq!(json["value"], "7631");

    let (json, _stderr, _) = run_datalayer(&["get-pairs", "--id", &id], &db_path);
    assert_eq!(json["count"], 2);
}

#[test]
fn test_cli_changelist_from_file() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let file = dir.path().join("changes.json");
    std::fs::write(&file, r#"[{"action":"insert","key":"01","value":"02"}]"#).unwrap();
    let arg = format!("@{}", file.display());

    let (json, success) = update(&db_path, &id, &arg);
    assert!(success, "update failed: {}", json);

    let (json, _stderr, _) = run_datalayer(&["get-value", "--id", &id, "--key", "01"], &db_path);
    assert_eq!(json["value"], "02");
}

#[test]
fn test_cli_failed_changelist_is_atomic() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);
    update(&db_path, &id, r#"[{"action":"insert","key":"aa","value":"01"}]"#);

    let (json, success) = update(
        &db_path,
        &id,
        r#"[{"action":"insert","key":"bb","value":"02"},
            {"action":"insert","key":"aa","value":"03"}]"#,
    );
    assert!(!success, "duplicate insert should fail");
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().contains("Change 1"));

    let (json, _stderr, _) = run_datalayer(&["get-pairs", "--id", &id], &db_path);
    assert_eq!(json["count"], 1);

    let (json, _stderr, _) = run_datalayer(&["root-history", "--id", &id], &db_path);
    assert_eq!(json["count"], 2);
}

#[test]
fn test_cli_malformed_changelist() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let (json, success) = update(
        &db_path,
        &id,
        r#"[{"action":"upsert","key":"aa","value":"01"}]"#,
    );
    assert!(!success);
    assert_eq!(json["status"], "error");
}

#[test]
fn test_cli_missing_key_is_absent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let (json, stderr, success) =
        run_datalayer(&["get-value", "--id", &id, "--key", "ff"], &db_path);
    assert!(success, "missing key should not fail: {}", stderr);
    assert_eq!(json["key"], "ff");
    assert!(json["value"].is_null());
}

#[test]
fn test_cli_keys_accept_0x_prefix() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);
    update(&db_path, &id, r#"[{"action":"insert","key":"0x6b31","value":"7631"}]"#);

    let (json, stderr, success) =
        run_datalayer(&["get-value", "--id", &id, "--key", "0x6b31"], &db_path);
    assert!(success, "get-value failed: {}", stderr);
    assert_eq!(json["key"], "6b31");
    assert_eq!(json["value"], "7631");

    let (json, stderr, success) =
        run_datalayer(&["get-proof", "--id", &id, "--key", "0x6b31"], &db_path);
    assert!(success, "get-proof failed: {}", stderr);
    assert_eq!(json["valid"], true);
}

#[test]
fn test_cli_unknown_store_errors() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    create_store(&db_path);

    let ghost = "ab".repeat(32);
    let (json, _stderr, success) = run_datalayer(&["get-pairs", "--id", &ghost], &db_path);
    assert!(!success);
    assert!(json["message"].as_str().unwrap().contains("Unknown store"));
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn test_cli_ancestors_and_proof() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);
    let (result, _) = update(
        &db_path,
        &id,
        r#"[{"action":"insert","key":"01","value":"aa"},
            {"action":"insert","key":"02","value":"bb"},
            {"action":"insert","key":"03","value":"cc"}]"#,
    );
    let root = result["root"].as_str().unwrap().to_string();

    let (proof, _stderr, success) =
        run_datalayer(&["get-proof", "--id", &id, "--key", "02"], &db_path);
    assert!(success);
    assert_eq!(proof["valid"], true);
    assert_eq!(proof["root"], root.as_str());
    assert_eq!(proof["value"], "bb");

    // The root has no ancestors; its children have exactly one
    let (json, _stderr, success) =
        run_datalayer(&["get-ancestors", "--id", &id, "--hash", &root], &db_path);
    assert!(success);
    assert_eq!(json["count"], 0);

    let sibling = proof["steps"].as_array().unwrap().last().unwrap()["sibling"]
        .as_str()
        .unwrap()
        .to_string();
    let (json, _stderr, success) =
        run_datalayer(&["get-ancestors", "--id", &id, "--hash", &sibling], &db_path);
    assert!(success);
    assert_eq!(json["count"], 1);
    assert_eq!(json["ancestors"][0]["hash"], root.as_str());
    assert_eq!(json["ancestors"][0]["type"], "internal");
}

#[test]
fn test_cli_history_and_diff() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let id = create_store(&db_path);

    let (first, _) = update(&db_path, &id, r#"[{"action":"insert","key":"01","value":"aa"}]"#);
    let (second, _) = update(
        &db_path,
        &id,
        r#"[{"action":"insert","key":"02","value":"bb"},{"action":"delete","key":"01"}]"#,
    );

    let (json, _stderr, success) = run_datalayer(
        &["get-pairs", "--id", &id, "--generation", "1"],
        &db_path,
    );
    assert!(success);
    assert_eq!(json["keys_values"][0]["key"], "01");

    let (json, _stderr, success) = run_datalayer(
        &[
            "diff",
            "--id",
            &id,
            "--from",
            first["root"].as_str().unwrap(),
            "--to",
            second["root"].as_str().unwrap(),
        ],
        &db_path,
    );
    assert!(success);
    assert_eq!(json["added"], 1);
    assert_eq!(json["removed"], 1);
    assert_eq!(json["modified"], 0);
}

#[test]
fn test_cli_status() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    create_store(&db_path);

    let (json, _stderr, success) = run_datalayer(&["status"], &db_path);
    assert!(success);
    assert_eq!(json["stores"], 1);
    assert_eq!(json["config"]["compression_level"], 3);
}
