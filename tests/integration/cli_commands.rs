#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn setup_db(name: &str, events: usize) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.tdb"));
    cargo_bin_cmd!("tracedb")
        .args(["--page-size", "1024", "gen"])
        .arg(&path)
        .args(["--events", &events.to_string(), "--seed", "7", "--threads", "3"])
        .assert()
        .success();
    (dir, path)
}

fn json(args: &[&str], db: &Path, extra: &[&str]) -> Value {
    let output = cargo_bin_cmd!("tracedb")
        .args(["--format", "json", "--page-size", "1024"])
        .args(args)
        .arg(db)
        .args(extra)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn gen_then_stats() {
    let (_dir, db) = setup_db("stats", 2_000);
    let stats = json(&["stats"], &db, &[]);
    assert_eq!(stats["events"].as_u64(), Some(2_000));
    assert_eq!(stats["threads"].as_u64(), Some(3));
    assert_eq!(stats["dropped"].as_u64(), Some(0));
    assert!(stats["pages"].as_u64().unwrap_or(0) > 10);
    assert!(stats["pager"]["misses"].is_number());
}

#[test]
fn scan_filters_by_thread_in_both_directions() {
    let (_dir, db) = setup_db("scan", 1_000);
    let forward = json(&["scan"], &db, &["--thread", "2", "--limit", "25"]);
    let rows = forward["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 25);
    assert!(rows.iter().all(|row| row["thread"].as_u64() == Some(2)));
    let ts: Vec<u64> = rows.iter().filter_map(|row| row["timestamp"].as_u64()).collect();
    assert!(ts.windows(2).all(|w| w[0] < w[1]));

    let backward = json(&["scan"], &db, &["--thread", "2", "--limit", "10", "--reverse"]);
    let ts: Vec<u64> = backward["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|row| row["timestamp"].as_u64())
        .collect();
    assert_eq!(ts.len(), 10);
    assert!(ts.windows(2).all(|w| w[0] > w[1]));

    let from = json(&["scan"], &db, &["--from", "100", "--limit", "1"]);
    assert!(from["rows"][0]["timestamp"].as_u64().unwrap_or(0) >= 100);
}

#[test]
fn dump_decodes_a_scanned_pointer() {
    let (_dir, db) = setup_db("dump", 300);
    let scan = json(&["scan"], &db, &["--from", "50", "--limit", "1"]);
    let pointer = scan["rows"][0]["pointer"].as_str().expect("pointer").to_string();
    let timestamp = scan["rows"][0]["timestamp"].as_u64();

    let dump = json(&["dump"], &db, &["--pointer", &pointer]);
    assert_eq!(dump["pointer"].as_str(), Some(pointer.as_str()));
    assert_eq!(dump["record"]["header"]["timestamp"].as_u64(), timestamp);
    assert_eq!(dump["external"]["timestamp"].as_u64(), timestamp);
    let bytes = dump["bytes"].as_str().expect("hex bytes");
    assert!(!bytes.is_empty());
    assert!(hex::decode(bytes).is_ok());
}

#[test]
fn count_buckets_sum_to_total() {
    let (_dir, db) = setup_db("count", 1_500);
    let report = json(&["count"], &db, &["--from", "0", "--to", "2000", "--slots", "4"]);
    let total = report["total"].as_u64().expect("total");
    let buckets: Vec<u64> = report["buckets"]
        .as_array()
        .expect("buckets")
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    assert_eq!(buckets.len(), 4);
    assert_eq!(buckets.iter().sum::<u64>(), total);
    assert!(total > 0);
}

#[test]
fn config_prints_effective_toml() {
    let output = cargo_bin_cmd!("tracedb")
        .args(["--page-size", "2048", "--reorder-capacity", "77", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("page_size = 2048"), "{text}");
    assert!(text.contains("reorder_capacity = 77"), "{text}");
    assert!(text.contains("[object_split]"), "{text}");
}

#[test]
fn opening_a_missing_database_fails() {
    let dir = TempDir::new().expect("tempdir");
    let output = cargo_bin_cmd!("tracedb")
        .arg("stats")
        .arg(dir.path().join("missing.tdb"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("error:"), "{stderr}");
}
