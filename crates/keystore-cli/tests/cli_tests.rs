//! Integration tests for the `keystore` CLI binary.
//!
//! These tests exercise the CLI as a subprocess, verifying exit codes and
//! output. They use the in-memory backend or an unreachable MongoDB address,
//! so no database server is required.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

/// Helper: locate the `keystore` binary built by `cargo test`.
fn keystore_bin() -> String {
    let path = env!("CARGO_BIN_EXE_keystore");
    assert!(
        Path::new(path).exists(),
        "keystore binary not found at {path}"
    );
    path.to_owned()
}

/// Helper: run keystore with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(keystore_bin())
        .args(args)
        .env_remove("KEYSTORE_BACKEND")
        .env_remove("KEYSTORE_MONGO_URI")
        .env_remove("KEYSTORE_MONGO_DATABASE")
        .env_remove("KEYSTORE_MONGO_COLLECTION")
        .env_remove("KEYSTORE_MONGO_SERVER_SELECTION_TIMEOUT")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute keystore");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "keystore --version should exit 0");
    assert!(
        stdout.contains("keystore"),
        "version output should contain 'keystore': {stdout}"
    );
}

#[test]
fn test_help_lists_commands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "keystore --help should exit 0");
    for sub in ["status", "create", "get", "delete", "list"] {
        assert!(stdout.contains(sub), "help should list '{sub}': {stdout}");
    }
}

#[test]
fn test_unknown_backend_is_rejected() {
    let (code, _, stderr) = run(&["--backend", "cassandra", "status"]);
    assert_ne!(code, 0, "unknown backend should fail");
    assert!(stderr.contains("cassandra"), "should name the bad value: {stderr}");
}

// ── Memory backend ───────────────────────────────────────────────────

#[test]
fn test_status_memory_backend() {
    let (code, stdout, stderr) = run(&["status"]);
    assert_eq!(code, 0, "status should succeed: {stderr}");
    assert!(stdout.contains("latency"), "should print latency: {stdout}");
}

#[test]
fn test_get_missing_key_fails() {
    let (code, _, stderr) = run(&["get", "tenant/a/missing"]);
    assert_eq!(code, 1, "get of a missing key should exit 1");
    assert!(
        stderr.contains("does not exist"),
        "should report missing key: {stderr}"
    );
}

#[test]
fn test_delete_missing_key_fails() {
    let (code, _, stderr) = run(&["delete", "nope"]);
    assert_eq!(code, 1, "delete of a missing key should exit 1");
    assert!(stderr.contains("does not exist"), "{stderr}");
}

#[test]
fn test_create_prints_confirmation() {
    let (code, stdout, stderr) = run(&["create", "k", "c2VjcmV0"]);
    assert_eq!(code, 0, "create should succeed: {stderr}");
    assert!(stdout.contains("created 'k'"), "{stdout}");
}

#[test]
fn test_memory_backend_warns_on_create_and_delete() {
    let (code, _, stderr) = run(&["create", "k", "c2VjcmV0"]);
    assert_eq!(code, 0, "create should succeed: {stderr}");
    assert!(
        stderr.contains("memory backend does not persist"),
        "create on the memory backend should warn: {stderr}"
    );

    let (_, _, stderr) = run(&["delete", "k"]);
    assert!(stderr.contains("memory backend does not persist"), "{stderr}");
}

#[test]
fn test_memory_backend_read_commands_do_not_warn() {
    let (code, _, stderr) = run(&["status"]);
    assert_eq!(code, 0, "status should succeed: {stderr}");
    assert!(!stderr.contains("does not persist"), "{stderr}");
}

#[test]
fn test_create_rejects_invalid_base64() {
    let (code, _, stderr) = run(&["create", "k", "***"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("base64"), "should explain the encoding: {stderr}");
}

#[test]
fn test_create_rejects_empty_name() {
    let (code, _, stderr) = run(&["create", "", "dmFsdWU="]);
    assert_eq!(code, 1);
    assert!(stderr.contains("invalid key name"), "{stderr}");
}

#[test]
fn test_list_empty_store() {
    let (code, stdout, stderr) = run(&["list", "tenant/", "--limit", "5"]);
    assert_eq!(code, 0, "list should succeed: {stderr}");
    assert!(stdout.trim().is_empty(), "fresh store has no keys: {stdout}");
}

// ── MongoDB backend (no server) ──────────────────────────────────────

#[cfg(feature = "mongodb-backend")]
#[test]
fn test_status_unreachable_mongodb_is_unavailable() {
    let (code, _, stderr) = run(&[
        "--backend",
        "mongodb",
        "--mongo-uri",
        "mongodb://127.0.0.1:1",
        "--server-selection-timeout",
        "1",
        "--timeout",
        "5",
        "status",
    ]);
    assert_eq!(code, 1, "status against an unreachable server should fail");
    assert!(stderr.contains("unavailable"), "{stderr}");
}

#[cfg(feature = "mongodb-backend")]
#[test]
fn test_malformed_mongodb_uri_fails_to_connect() {
    let (code, _, stderr) = run(&["--backend", "mongodb", "--mongo-uri", "nonsense", "status"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to connect"), "{stderr}");
}
