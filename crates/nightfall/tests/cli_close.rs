//! Tests for the `nightfall` binary: exit codes and the night lock.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn nightfall_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nightfall"))
}

fn write_config(root: &Path) -> PathBuf {
    let config = format!(
        r#"
[paths]
analysis_dir = "{root}/running_analysis"
destination_root = "{root}/data"
closer_dir = "{root}/Closer"
raw_dir = "{root}/R0"
systematics_dir = "{root}/systematics"
night_summary_dir = "{root}/NightSummary"

[database]
path = "{root}/nightfall.duckdb"
"#,
        root = root.display()
    );
    let path = root.join("nightfall.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn nightfall(home: &Path, args: &[&str]) -> Output {
    Command::new(nightfall_bin())
        .env("NIGHTFALL_HOME", home)
        .env_remove("NIGHTFALL_CONFIG")
        .arg("--config")
        .arg(home.join("nightfall.toml"))
        .args(["--date", "2020_01_17", "--telescope", "LST1"])
        .args(args)
        .output()
        .expect("Failed to run nightfall")
}

fn lock_path(root: &Path) -> PathBuf {
    root.join("Closer/20200117/v0.1.0/NightFinished.txt")
}

#[test]
fn close_with_reason_then_refuse_second_close() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let first = nightfall(tmp.path(), &["close", "--reason", "bad weather", "-y"]);
    assert!(
        first.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&first.stdout),
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(lock_path(tmp.path()).exists());
    assert!(tmp.path().join("nightfall.duckdb").exists());

    let second = nightfall(tmp.path(), &["close", "--reason", "bad weather", "-y"]);
    assert_eq!(second.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already closed"));
}

#[test]
fn missing_night_summary_exits_2() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let output = nightfall(tmp.path(), &["close", "-y"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--reason"));
    assert!(!lock_path(tmp.path()).exists());
}

#[test]
fn no_summary_and_no_reason_exits_9() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let output = nightfall(tmp.path(), &["close", "-y", "--no-night-summary"]);

    assert_eq!(output.status.code(), Some(9));
}

#[test]
fn simulated_close_leaves_no_trace() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let output = nightfall(tmp.path(), &["--simulate", "close", "--reason", "test", "-y"]);

    assert!(output.status.success());
    assert!(!lock_path(tmp.path()).exists());
    assert!(!tmp.path().join("nightfall.duckdb").exists());
}

#[test]
fn history_level_of_unprocessed_run() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let output = nightfall(tmp.path(), &["history-level", "1807", "--kind", "DATA"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3 0");
}

#[test]
fn config_prints_effective_toml() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path());

    let output = nightfall(tmp.path(), &["config"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[paths]"));
    assert!(stdout.contains("NightFinished.txt"));
}
