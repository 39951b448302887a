//! Concurrency tests for medrem.
//!
//! These tests verify that multiple processes can safely:
//! - Add medicines to the same store without losing updates
//! - Take doses while other writers are active
//! - Append to the intake log without interleaving lines
//! - Roll up the intake log while takes are appending to it

use assert_cmd::Command;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const T0: &str = "2024-03-01T08:00:00Z";

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("medrem"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn read_medicines(data_dir: &Path) -> Vec<serde_json::Value> {
    let contents = std::fs::read_to_string(data_dir.join("medicines.json"))
        .expect("Failed to read store");
    let store: serde_json::Value = serde_json::from_str(&contents).expect("Store is not valid JSON");
    store["medicines"].as_array().expect("medicines array").clone()
}

fn add(data_dir: &Path, name: &str) {
    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["--now", T0])
        .args(["add", "--name", name, "--frequency-hours", "6", "--duration-days", "2"])
        .timeout(Duration::from_secs(10))
        .assert()
        .success();
}

#[test]
fn test_concurrent_adds_are_not_lost() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let data_dir = data_dir.clone();
            thread::spawn(move || add(&data_dir, &format!("Medicine {}", i)))
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let medicines = read_medicines(&data_dir);
    assert_eq!(medicines.len(), 8, "Expected 8 medicines, got {}", medicines.len());
}

#[test]
fn test_concurrent_takes_write_valid_log() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    for i in 0..5 {
        add(&data_dir, &format!("Medicine {}", i));
    }
    let ids: Vec<String> = read_medicines(&data_dir)
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();

    // At 21:00 the 08:00, 14:00 and 20:00 doses are due for every medicine
    let handles: Vec<_> = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(i as u64 * 5));
                cli()
                    .arg("--data-dir")
                    .arg(&data_dir)
                    .args(["--now", "2024-03-01T21:00:00Z"])
                    .args(["take", id.as_str()])
                    .timeout(Duration::from_secs(10))
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let log = std::fs::read_to_string(data_dir.join("wal/intake.wal")).expect("Failed to read log");
    let mut valid_count = 0;
    for line in log.lines().filter(|l| !l.is_empty()) {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(line);
        assert!(parsed.is_ok(), "Intake log contains invalid JSON line: {}", line);
        valid_count += 1;
    }
    assert_eq!(valid_count, 5 * 3);

    // Every medicine kept its own taken doses
    for medicine in read_medicines(&data_dir) {
        let taken = medicine["doses"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|d| d["taken"] == true)
            .count();
        assert_eq!(taken, 3);
    }
}

#[test]
fn test_takes_during_rollup_keep_every_intake() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    for i in 0..5 {
        add(&data_dir, &format!("Medicine {}", i));
    }
    let ids: Vec<String> = read_medicines(&data_dir)
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();

    let takers: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                cli()
                    .arg("--data-dir")
                    .arg(&data_dir)
                    .args(["--now", "2024-03-01T21:00:00Z"])
                    .args(["take", id.as_str()])
                    .timeout(Duration::from_secs(10))
                    .assert()
                    .success();
            })
        })
        .collect();

    let rollup_dir = data_dir.clone();
    let roller = thread::spawn(move || {
        for _ in 0..5 {
            cli()
                .arg("--data-dir")
                .arg(&rollup_dir)
                .arg("rollup")
                .timeout(Duration::from_secs(10))
                .assert()
                .success();
            thread::sleep(Duration::from_millis(5));
        }
    });

    for handle in takers {
        handle.join().expect("Thread panicked");
    }
    roller.join().expect("Thread panicked");

    cli().arg("--data-dir").arg(&data_dir).arg("rollup").assert().success();

    let history = std::fs::read_to_string(data_dir.join("intake_history.csv"))
        .expect("Failed to read intake history");
    // Header plus one row per intake
    assert_eq!(history.lines().count(), 1 + 5 * 3);
}
