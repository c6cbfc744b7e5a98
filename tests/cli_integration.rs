//! CLI Integration Tests
//!
//! These tests drive the built `tilectl` binary end-to-end and check its
//! JSON output.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use std::process::Command;
use tempfile::tempdir;

/// Run tilectl and return (stdout, stderr, success)
fn run_tilectl(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_tilectl"))
        .env_remove("RUST_LOG")
        .args(["-f", "json"])
        .args(args)
        .output()
        .expect("Failed to execute tilectl");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn parse(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).expect("stdout should be JSON")
}

// ============================================================================
// Extent Commands
// ============================================================================

#[test]
fn test_cli_intersect_overlapping() {
    let (stdout, _stderr, success) = run_tilectl(&["intersect", "0,0..4,4@8,8", "2,2..6,6@8,8"]);

    assert!(success, "intersect should succeed");
    let json = parse(&stdout);
    assert_eq!(json["empty"], false);
    assert_eq!(json["extent"]["ul"], serde_json::json!([2, 2]));
    assert_eq!(json["extent"]["lr"], serde_json::json!([4, 4]));
    assert_eq!(json["extent"]["size"], 4);
}

#[test]
fn test_cli_intersect_disjoint_is_empty() {
    let (stdout, _stderr, success) = run_tilectl(&["intersect", "0,0..2,2", "2,2..4,4"]);

    assert!(success, "disjoint intersect is not an error");
    let json = parse(&stdout);
    assert_eq!(json["empty"], true);
    assert!(json["extent"].is_null());
}

#[test]
fn test_cli_intersect_rank_mismatch_fails() {
    let (_stdout, stderr, success) = run_tilectl(&["intersect", "0..2", "0,0..2,2"]);

    assert!(!success, "rank mismatch should fail");
    assert!(stderr.contains("Contract violation"), "stderr: {}", stderr);
}

#[test]
fn test_cli_slice() {
    let (stdout, _stderr, success) = run_tilectl(&["slice", "10,20", "2:5, -4:"]);

    assert!(success, "slice should succeed");
    let json = parse(&stdout);
    assert_eq!(json["extent"]["ul"], serde_json::json!([2, 16]));
    assert_eq!(json["extent"]["lr"], serde_json::json!([5, 20]));
    assert_eq!(json["extent"]["array_shape"], serde_json::json!([10, 20]));
}

#[test]
fn test_cli_slice_with_step_is_unsupported() {
    let (_stdout, stderr, success) = run_tilectl(&["slice", "10", "0:10:2"]);

    assert!(!success, "step slicing should fail");
    assert!(stderr.contains("Unsupported"), "stderr: {}", stderr);
}

#[test]
fn test_cli_ravel_and_unravel() {
    let (stdout, _stderr, success) = run_tilectl(&["ravel", "1,2,3", "--shape", "2,3,4"]);
    assert!(success);
    assert_eq!(parse(&stdout)["index"], 23);

    let (stdout, _stderr, success) = run_tilectl(&["unravel", "23", "--shape", "2,3,4"]);
    assert!(success);
    assert_eq!(parse(&stdout)["coord"], serde_json::json!([1, 2, 3]));

    let (_stdout, _stderr, success) = run_tilectl(&["unravel", "24", "--shape", "2,3,4"]);
    assert!(!success, "index past the end should fail");
}

#[test]
fn test_cli_find_shape() {
    let (stdout, _stderr, success) =
        run_tilectl(&["find-shape", "0,0..2,3", "2,0..4,3", "0,3..4,5"]);

    assert!(success, "find-shape should succeed");
    assert_eq!(parse(&stdout)["shape"], serde_json::json!([4, 5]));
}

#[test]
fn test_cli_find_shape_rejects_gap() {
    let (_stdout, stderr, success) = run_tilectl(&["find-shape", "0,0..2,2", "3,0..4,2"]);

    assert!(!success, "a gap should be rejected");
    assert!(stderr.contains("Invalid partition"), "stderr: {}", stderr);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_cli_flags_defaults() {
    let (stdout, _stderr, success) = run_tilectl(&["flags"]);

    assert!(success, "flags should succeed");
    let json = parse(&stdout);
    let flags = json["flags"].as_array().unwrap();
    assert_eq!(json["count"], flags.len());
    let log_level = flags.iter().find(|f| f["name"] == "log_level").unwrap();
    assert_eq!(log_level["value"], "INFO");
}

#[test]
fn test_cli_flags_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tilecore.json");
    std::fs::write(&path, r#"{"num_workers": 12, "assign_mode": "ByNode"}"#).unwrap();

    let (stdout, _stderr, success) = run_tilectl(&["-c", path.to_str().unwrap(), "flags"]);

    assert!(success, "flags with a config file should succeed");
    let json = parse(&stdout);
    let flags = json["flags"].as_array().unwrap();
    let value_of = |name: &str| {
        flags.iter().find(|f| f["name"] == name).unwrap()["value"]
            .as_str()
            .unwrap()
            .to_string()
    };
    assert_eq!(value_of("num_workers"), "12");
    assert_eq!(value_of("assign_mode"), "BY_NODE");
}

// ============================================================================
// Cluster Demo
// ============================================================================

#[test]
fn test_cli_demo() {
    let (stdout, stderr, success) =
        run_tilectl(&["demo", "--workers", "2", "--rows", "2", "--cols", "4"]);

    assert!(success, "demo should succeed: {}", stderr);
    let json = parse(&stdout);
    assert_eq!(json["array_shape"], serde_json::json!([4, 4]));
    assert_eq!(json["stored"], 2);

    let tiles = json["tiles"].as_array().unwrap();
    assert_eq!(tiles.len(), 2);
    // Column 2 of the ramp 0..8 laid out 2x4
    assert_eq!(tiles[0]["values"], serde_json::json!([2, 6]));
    assert_eq!(tiles[1]["extent"]["ul"], serde_json::json!([2, 2]));
}

#[test]
fn test_cli_demo_follows_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tilecore.json");
    std::fs::write(
        &path,
        r#"{
            "num_workers": 2,
            "hosts": [{"name": "n1", "count": 1}, {"name": "n2", "count": 1}],
            "tile_assignment_strategy": "block",
            "use_shared_memory": true
        }"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_tilectl(&[
        "-c",
        path.to_str().unwrap(),
        "demo",
        "--tiles",
        "4",
        "--rows",
        "1",
        "--cols",
        "4",
    ]);

    assert!(success, "demo should succeed: {}", stderr);
    let json = parse(&stdout);
    assert_eq!(json["workers"], 2);
    assert_eq!(json["array_shape"], serde_json::json!([4, 4]));
    assert_eq!(json["shared_memory"], true);
    assert_eq!(json["shared_sources"], 4);

    let tiles = json["tiles"].as_array().unwrap();
    let owners: Vec<_> = tiles.iter().map(|t| t["worker"].clone()).collect();
    assert_eq!(owners, vec![0, 0, 1, 1]);
    let hosts: Vec<_> = tiles.iter().map(|t| t["host"].clone()).collect();
    assert_eq!(hosts, vec!["n1", "n1", "n2", "n2"]);
    assert!(tiles.iter().all(|t| t["values"] == serde_json::json!([2])));
}

#[test]
fn test_cli_demo_rejects_unknown_strategy() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tilecore.json");
    std::fs::write(&path, r#"{"tile_assignment_strategy": "random"}"#).unwrap();

    let (_stdout, stderr, success) =
        run_tilectl(&["-c", path.to_str().unwrap(), "demo", "--workers", "1"]);

    assert!(!success, "unknown strategy should fail");
    assert!(stderr.contains("Config error"), "stderr: {}", stderr);
}
