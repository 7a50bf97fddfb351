use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;

fn map(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("dualread")
        .arg("map")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

#[test]
fn map_uses_proportional_mapping() {
    let value = map(&["--primary-pages", "10", "--secondary-pages", "8", "--page", "10"]);
    assert_eq!(value["primary_page"], 10);
    assert_eq!(value["secondary_page"], 8);

    let value = map(&["--primary-pages", "10", "--secondary-pages", "8", "--page", "1"]);
    assert_eq!(value["secondary_page"], 1);
}

#[test]
fn map_honors_anchor_offset() {
    let value = map(&[
        "--primary-pages",
        "10",
        "--secondary-pages",
        "10",
        "--page",
        "5",
        "--anchor",
        "3:1",
    ]);
    assert_eq!(value["secondary_page"], 3);
}

#[test]
fn page_zero_is_rejected() {
    cargo_bin_cmd!("dualread")
        .args(["map", "--primary-pages", "4", "--secondary-pages", "4", "--page", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1-based"));
}

#[test]
fn page_past_the_end_is_rejected() {
    cargo_bin_cmd!("dualread")
        .args(["map", "--primary-pages", "4", "--secondary-pages", "4", "--page", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn missing_file_is_reported() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let missing = temp.path().join("missing.pdf");

    cargo_bin_cmd!("dualread")
        .arg("info")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn render_rejects_directory_input() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("dualread")
        .arg("render")
        .arg(temp.path())
        .args(["--page", "1", "--output"])
        .arg(temp.path().join("out.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("path is not a file"));
}

#[test]
fn text_rejects_malformed_rectangle() {
    cargo_bin_cmd!("dualread")
        .args(["text", "paper.pdf", "--page", "1", "--rect", "0.1,0.2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected x0,y0,x1,y1"));
}

#[test]
fn log_file_receives_output() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let log = temp.path().join("dualread.log");

    cargo_bin_cmd!("dualread")
        .arg("--log-file")
        .arg(&log)
        .args(["map", "--primary-pages", "2", "--secondary-pages", "2", "--page", "1"])
        .assert()
        .success();

    assert!(log.exists(), "log file should be created");
}
