//! Command-line surface tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vcompress() -> Command {
    let mut cmd = Command::cargo_bin("vcompress").unwrap();
    cmd.env_remove("VCOMPRESS_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_profiles_table() {
    vcompress()
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("TIER"))
        .stdout(predicate::str::is_match(r"low\s+640x480\s+500 kbps\s+64 kbps").unwrap())
        .stdout(predicate::str::is_match(r"medium\s+960x540\s+1000 kbps\s+96 kbps").unwrap())
        .stdout(predicate::str::is_match(r"high\s+1280x720\s+2000 kbps\s+128 kbps").unwrap());
}

#[test]
fn test_profiles_json() {
    let output = vcompress().args(["profiles", "--json"]).output().unwrap();
    assert!(output.status.success());

    let profiles: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let profiles = profiles.as_array().unwrap();
    assert_eq!(profiles.len(), 3);
    assert_eq!(profiles[0]["tier"], "low");
    assert_eq!(profiles[2]["video_bitrate"], 2_000_000);
}

#[test]
fn test_compress_requires_path() {
    let dir = TempDir::new().unwrap();
    vcompress()
        .current_dir(dir.path())
        .arg("compress")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Must provide a 'path' to the video file."));
}

#[test]
fn test_compress_missing_file() {
    let dir = TempDir::new().unwrap();
    vcompress()
        .current_dir(dir.path())
        .args(["compress", "--input", "nowhere.mp4", "--quality", "low"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Original file does not exist at path: nowhere.mp4"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[compressor]\nframe_rate = 0\n").unwrap();

    vcompress()
        .args(["compress", "--input", "clip.mp4", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("frame_rate"));
}

#[test]
fn test_inspect_requires_input() {
    vcompress().arg("inspect").assert().failure();
}
