use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const TEVA: &str = "טבע תעשיות פרמצבטיות בע\"מ";

fn nlq_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("nlq");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    fs::write(
        root.join("items.json"),
        format!(
            r#"{{"items": [
  {{"id": "a-1", "issuerName": "{teva}", "form_type": "דוח רבעוני", "publicationDate": "2025-08-06", "subject": "Q2 results", "dummy": "True"}},
  {{"id": "a-2", "issuerName": "{teva}", "form_type": "דוח רבעוני", "publicationDate": "2025-05-07", "subject": "Q1 results", "dummy": "True"}},
  {{"id": "a-3", "issuerName": "{teva}", "form_type": "דוח מיידי", "publicationDate": "2025-09-18", "subject": "Board change", "dummy": "True"}}
]}}"#,
            teva = TEVA.replace('"', "\\\"")
        ),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/nlq.sqlite"

[retrieval]
max_items = 20
base_backoff_ms = 1
max_backoff_ms = 5

[server]
bind = "127.0.0.1:7349"
"#,
        root.display()
    );

    let config_path = config_dir.join("nlq.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_nlq(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = nlq_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("NLQ_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nlq binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json(stdout: &str) -> Value {
    serde_json::from_str(stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout))
}

fn loaded_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_nlq(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let items = tmp.path().join("items.json");
    let (stdout, stderr, success) = run_nlq(&config_path, &["load", items.to_str().unwrap()]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nlq(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/nlq.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_nlq(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_nlq(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_upserts_without_duplicates() {
    let (tmp, config_path) = loaded_env();
    let items = tmp.path().join("items.json");

    let (stdout, _, success) = run_nlq(&config_path, &["load", items.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Loaded 3 items (3 total)."), "got: {}", stdout);
}

#[test]
fn test_filters_prints_compilation() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nlq(
        &config_path,
        &["filters", "רבעוני של טבע מהרבעון השלישי 2025", "--today", "2025-12-01"],
    );
    assert!(success, "filters failed: {}", stderr);
    let out = json(&stdout);
    assert_eq!(out["filters"]["companyNames"][0], TEVA);
    assert_eq!(out["filters"]["announcementTypes"][0], "דוח רבעוני");
    assert_eq!(out["filters"]["startDate"], "2025-07-01");
    assert_eq!(out["filters"]["endDate"], "2025-09-30");
    assert!(out["diagnostics"]["confidence"].as_f64().unwrap() > 0.7);
}

#[test]
fn test_filters_relative_flag_keeps_window() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_nlq(
        &config_path,
        &["filters", "Teva last 30 days", "--relative", "--today", "2025-12-01"],
    );
    assert!(success);
    let out = json(&stdout);
    assert!(out["filters"]["relativeTimeframe"].is_object());
    assert!(out["filters"].get("startDate").is_none());
}

#[test]
fn test_run_returns_matching_records() {
    let (_tmp, config_path) = loaded_env();

    let (stdout, stderr, success) = run_nlq(
        &config_path,
        &["run", "רבעוני של טבע 2025", "--today", "2025-12-01"],
    );
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    let out = json(&stdout);
    let ids: Vec<&str> = out["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a-1", "a-2"]);
    assert_eq!(out["planKind"], "by_primary_key");
    assert_eq!(out["degraded"], false);
}

#[test]
fn test_run_respects_max_items_and_order() {
    let (_tmp, config_path) = loaded_env();

    let (stdout, _, success) = run_nlq(
        &config_path,
        &["run", "טבע", "--max-items", "2", "--ascending", "--today", "2025-12-01"],
    );
    assert!(success);
    let out = json(&stdout);
    let items = out["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], "a-2");
    assert_eq!(items[1]["id"], "a-1");
}

#[test]
fn test_run_dry_run_renders_plan() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nlq(
        &config_path,
        &["run", "דוח מיידי", "--dry-run", "--region", "il-central-1", "--today", "2025-12-01"],
    );
    assert!(success, "dry run failed: {}", stderr);
    let out = json(&stdout);
    assert_eq!(out["planKind"], "by_category_index");
    assert!(out["items"].as_array().unwrap().is_empty());
    let description = out["renderedPlanDescription"].as_str().unwrap();
    assert!(description.contains("form_type-publicationDate-index"));
    assert!(description.contains("il-central-1"));
}

#[test]
fn test_run_unreachable_endpoint_serves_degraded() {
    let (tmp, config_path) = setup_test_env();
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let endpoint = blocker.join("remote.sqlite");

    let (stdout, stderr, success) = run_nlq(
        &config_path,
        &["run", "טבע", "--endpoint", endpoint.to_str().unwrap(), "--today", "2025-12-01"],
    );
    assert!(success, "degraded run failed: {}", stderr);
    let out = json(&stdout);
    assert_eq!(out["degraded"], true);
    assert_eq!(out["diagnostics"]["confidence"].as_f64().unwrap(), 0.0);
    assert!(out["diagnostics"]["notes"][0]
        .as_str()
        .unwrap()
        .starts_with("degraded mode"));
    assert!(!out["items"].as_array().unwrap().is_empty());
}

#[test]
fn test_run_no_fallback_fails_on_unreachable_endpoint() {
    let (tmp, config_path) = setup_test_env();
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let endpoint = blocker.join("remote.sqlite");

    let (_, stderr, success) = run_nlq(
        &config_path,
        &["run", "טבע", "--endpoint", endpoint.to_str().unwrap(), "--no-fallback"],
    );
    assert!(!success);
    assert!(stderr.contains("store unavailable"), "stderr: {}", stderr);
}

#[test]
fn test_suggest_prints_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_nlq(&config_path, &["suggest", "טב", "--limit", "3"]);
    assert!(success);
    let out = json(&stdout);
    assert_eq!(out["prefix"], "טב");
    assert_eq!(out["suggestions"][0], TEVA);
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (stdout, _, success) = run_nlq(&missing, &["suggest", "Leumi"]);
    assert!(success);
    let out = json(&stdout);
    assert_eq!(out["suggestions"][0], "Leumi");
}
