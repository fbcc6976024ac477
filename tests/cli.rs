use assert_cmd::Command;
use predicates::prelude::*;

fn stitchcast() -> Command {
    Command::cargo_bin("stitchcast").unwrap()
}

#[test]
fn test_help_lists_commands() {
    stitchcast()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("stitch"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("transcribe"))
        .stdout(predicate::str::contains("creator-info"));
}

#[test]
fn test_version() {
    stitchcast()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("stitchcast"));
}

#[test]
fn test_inverted_range_rejected() {
    stitchcast()
        .args(["stitch", "in.mov", "--range", "5-2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value '5-2'"));
}

#[test]
fn test_range_required() {
    stitchcast()
        .args(["publish", "in.mov"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--range"));
}

#[test]
fn test_unknown_preset_rejected() {
    stitchcast()
        .args(["stitch", "in.mov", "-r", "0-1", "--preset", "ultra"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ultra"));
}
