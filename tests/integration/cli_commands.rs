#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    file: PathBuf,
}

impl Fixture {
    fn new(lines: usize) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("input.txt");
        let text: String = (0..lines).map(|i| format!("line {i}\n")).collect();
        fs::write(&file, text).expect("write input");
        Self { dir, file }
    }

    /// Config path that does not exist, so defaults apply regardless of the
    /// user's own config directory.
    fn no_config(&self) -> PathBuf {
        self.dir.path().join("absent.toml")
    }
}

#[test]
fn cat_prints_requested_range() {
    let fx = Fixture::new(50);
    cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .args(["--page-size", "4", "cat", "--from", "3", "--count", "2"])
        .arg(&fx.file)
        .assert()
        .success()
        .stdout("line 3\nline 4\n");
}

#[test]
fn cat_clamps_past_the_end() {
    let fx = Fixture::new(5);
    cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .args(["cat", "--from", "3", "--count", "100"])
        .arg(&fx.file)
        .assert()
        .success()
        .stdout("line 3\nline 4\n");
}

#[test]
fn stats_json_reports_counters() {
    let fx = Fixture::new(100);
    let output = cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .args([
            "--format",
            "json",
            "--page-size",
            "10",
            "--cache-pages",
            "3",
            "--prefetch",
            "none",
            "--policy",
            "arc",
            "stats",
        ])
        .arg(&fx.file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["lines"], 100);
    assert_eq!(json["page_size"], 10);
    assert_eq!(json["cache_pages"], 3);
    assert_eq!(json["policy"], "arc");
    assert_eq!(json["prefetch"], "none");
    assert_eq!(json["stats"]["misses"], 10);
    assert_eq!(json["stats"]["hits"], 90);
    assert_eq!(json["stats"]["evictions"], 7);
    assert_eq!(json["stats"]["pages_in_memory"], 3);
}

#[test]
fn bench_json_covers_every_policy() {
    let fx = Fixture::new(2_000);
    let output = cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .args([
            "--format",
            "json",
            "--page-size",
            "50",
            "--cache-pages",
            "4",
            "bench",
            "--accesses",
            "300",
        ])
        .arg(&fx.file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows: Value = serde_json::from_slice(&output).expect("valid json");
    let rows = rows.as_array().expect("array of rows");
    let names: Vec<&str> = rows
        .iter()
        .map(|row| row["policy"].as_str().expect("policy name"))
        .collect();
    assert_eq!(names, ["lru", "slru", "arc", "spatial"]);
    for row in rows {
        let rate = row["hit_rate"].as_f64().expect("hit rate");
        assert!((0.0..=1.0).contains(&rate));
    }
}

#[test]
fn config_file_sets_defaults_and_flags_override() {
    let fx = Fixture::new(40);
    let config = fx.dir.path().join("pagebuf.toml");
    fs::write(
        &config,
        "default_page_size = 8\ndefault_cache_size = 2\neviction_policy = \"slru\"\nprefetch_enabled = false\n",
    )
    .expect("write config");
    let output = cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "--cache-pages", "5", "stats"])
        .arg(&fx.file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["page_size"], 8);
    assert_eq!(json["cache_pages"], 5);
    assert_eq!(json["policy"], "slru");
    assert_eq!(json["prefetch"], "none");
    assert_eq!(json["stats"]["misses"], 5);
}

#[test]
fn bad_input_fails_with_message() {
    let fx = Fixture::new(3);
    let zero_page = cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .args(["--page-size", "0", "stats"])
        .arg(&fx.file)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&zero_page).contains("error:"));

    let config = fx.dir.path().join("bad.toml");
    fs::write(&config, "eviction_policy = \"mru\"\n").expect("write config");
    let bad_policy = cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .arg(&fx.file)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&bad_policy).contains("mru"));

    cargo_bin_cmd!("pagebuf")
        .arg("--config")
        .arg(fx.no_config())
        .arg("stats")
        .arg(fx.dir.path().join("missing.txt"))
        .assert()
        .failure();
}
