use assert_cmd::Command;
use assert_fs::TempDir;
use rstest::fixture;
use std::path::Path;

use crate::common::file::write_file;

#[fixture]
pub fn repository_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// A repository with one commit holding `1.txt`, `a/2.txt` and `a/b/3.txt`
#[fixture]
pub fn init_repository_dir(repository_dir: TempDir) -> TempDir {
    run_knot_command(repository_dir.path(), &["init"])
        .assert()
        .success();

    write_file(repository_dir.path(), "1.txt", "one");
    write_file(repository_dir.path(), "a/2.txt", "two");
    write_file(repository_dir.path(), "a/b/3.txt", "three");

    run_knot_command(repository_dir.path(), &["add", "."])
        .assert()
        .success();
    knot_commit(repository_dir.path(), "Initial commit")
        .assert()
        .success();

    repository_dir
}

pub fn run_knot_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("knot").expect("Failed to find knot binary");
    cmd.current_dir(dir).args(args).envs([
        ("KNOT_AUTHOR_NAME", "fake_user"),
        ("KNOT_AUTHOR_EMAIL", "fake_email@email.com"),
        ("KNOT_AUTHOR_DATE", "2023-01-01 12:00:00 +0000"),
        ("NO_COLOR", "1"),
    ]);
    cmd.env_remove("KNOT_LOG");
    cmd
}

pub fn knot_commit(dir: &Path, message: &str) -> Command {
    run_knot_command(dir, &["commit", "-m", message])
}

/// Stage everything and commit it
pub fn commit_all(dir: &Path, message: &str) {
    run_knot_command(dir, &["add", "."]).assert().success();
    knot_commit(dir, message).assert().success();
}

/// Standard output of a successful command
pub fn knot_output(dir: &Path, args: &[&str]) -> String {
    let output = run_knot_command(dir, args)
        .output()
        .expect("Failed to run knot");
    assert!(
        output.status.success(),
        "knot {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("knot output is not UTF-8")
}

/// The commit `HEAD` points at, read straight from the data directory
pub fn head_oid(knot_dir: &Path) -> String {
    let head = std::fs::read_to_string(knot_dir.join("HEAD")).expect("Failed to read HEAD");
    match head.strip_prefix("ref: ") {
        Some(name) => read_ref(knot_dir, name.trim()),
        None => head.trim().to_string(),
    }
}

pub fn read_ref(knot_dir: &Path, name: &str) -> String {
    std::fs::read_to_string(knot_dir.join(name))
        .unwrap_or_else(|_| panic!("Failed to read {name}"))
        .trim()
        .to_string()
}
