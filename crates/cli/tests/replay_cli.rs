use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

fn swing_trade(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_swing-trade"))
        .arg("--config-dir")
        .arg(repo_path("config"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch swing-trade")
}

#[test]
fn demo_replay_opens_a_protected_position() {
    let out = TempDir::new().unwrap();
    let bars = repo_path("demos/nifty_5m.csv");
    let chain = repo_path("demos/chain.json");

    let output = swing_trade(&[
        "--profile",
        "demo",
        "replay",
        "--bars",
        bars.to_str().unwrap(),
        "--chain",
        chain.to_str().unwrap(),
        "--output-dir",
        out.path().to_str().unwrap(),
        "--json",
    ]);
    assert!(
        output.status.success(),
        "replay failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["summary"]["bars"], 18);
    assert_eq!(report["summary"]["breakouts"], 1);
    assert_eq!(report["summary"]["entries_submitted"], 1);
    assert_eq!(report["paper_orders"], 3);
    assert_eq!(report["position"]["correlation_id"], "NIFTY-1-17");
    assert_eq!(report["position"]["symbol"], "X120CE");
    assert_eq!(report["position"]["quantity"], 50);
    assert_eq!(report["position"]["state"], "monitoring");

    let structures = std::fs::read_to_string(out.path().join("structures-2025-01-06.csv")).unwrap();
    assert_eq!(structures.lines().count(), 2);

    // order rows are dated by broker time, so look the file up by prefix
    let orders: usize = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("orders-"))
        .map(|e| std::fs::read_to_string(e.path()).unwrap().lines().count() - 1)
        .sum();
    assert!(orders >= 3, "expected entry, stop and target rows, got {orders}");
}

#[test]
fn show_config_applies_profile_overlay() {
    let output = swing_trade(&["--profile", "demo", "show-config", "--section", "underlying"]);
    assert!(output.status.success());

    let underlying: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(underlying["symbol"], "NIFTY");
    assert_eq!(underlying["lot_size"], 10);
    assert_eq!(underlying["strike_step"], "10");
}

#[test]
fn missing_bar_file_fails_cleanly() {
    let output = swing_trade(&[
        "replay",
        "--bars",
        "does/not/exist.csv",
        "--chain",
        repo_path("demos/chain.json").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to open bar file"));
}
