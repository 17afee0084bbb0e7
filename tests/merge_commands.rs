use assert_fs::TempDir;
use predicates::prelude::predicate;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeSet;

mod common;
use common::command::{commit_all, head_oid, knot_commit, knot_output, read_ref, repository_dir, run_knot_command};
use common::file::{delete_path, read_file, write_file};

/// History:
///
/// ```text
///   A---B  main
///    \
///     C  topic
/// ```
fn diverged(dir: &std::path::Path, main_file: (&str, &str), topic_file: (&str, &str)) {
    run_knot_command(dir, &["init"]).assert().success();
    write_file(dir, "shared.txt", "line1\nline2\nline3\n");
    write_file(dir, "left.txt", "left\n");
    write_file(dir, "right.txt", "right\n");
    commit_all(dir, "Commit A - base");

    run_knot_command(dir, &["branch", "topic"]).assert().success();

    write_file(dir, main_file.0, main_file.1);
    commit_all(dir, "Commit B - main");

    run_knot_command(dir, &["checkout", "topic"]).assert().success();
    write_file(dir, topic_file.0, topic_file.1);
    commit_all(dir, "Commit C - topic");

    run_knot_command(dir, &["checkout", "main"]).assert().success();
}

fn parents(dir: &std::path::Path, revision: &str) -> Vec<String> {
    knot_output(dir, &["cat-file", "-p", revision])
        .lines()
        .filter_map(|line| line.strip_prefix("parent "))
        .map(str::to_string)
        .collect()
}

#[rstest]
fn merging_a_descendant_fast_forwards(repository_dir: TempDir) {
    let dir = repository_dir.path();
    run_knot_command(dir, &["init"]).assert().success();
    write_file(dir, "file.txt", "one\n");
    commit_all(dir, "First");
    run_knot_command(dir, &["checkout", "-b", "topic"]).assert().success();
    write_file(dir, "file.txt", "two\n");
    write_file(dir, "extra.txt", "extra\n");
    commit_all(dir, "Second");
    let topic = head_oid(&dir.join(".knot"));
    run_knot_command(dir, &["checkout", "main"]).assert().success();

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fast-forward"));

    assert_eq!(read_ref(&dir.join(".knot"), "refs/heads/main"), topic);
    assert_eq!(read_file(dir, "file.txt"), "two\n");
    assert_eq!(read_file(dir, "extra.txt"), "extra\n");
    assert!(!dir.join(".knot").join("MERGE_HEAD").exists());
}

#[rstest]
fn merging_an_ancestor_is_already_up_to_date(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(dir, ("left.txt", "left changed\n"), ("right.txt", "right changed\n"));
    run_knot_command(dir, &["tag", "base", "main~1"]).assert().success();
    let before = head_oid(&dir.join(".knot"));

    run_knot_command(dir, &["merge", "base"])
        .assert()
        .success()
        .stdout("Already up to date.\n");
    run_knot_command(dir, &["merge", "main"])
        .assert()
        .success()
        .stdout("Already up to date.\n");

    assert_eq!(head_oid(&dir.join(".knot")), before);
}

#[rstest]
fn independent_changes_merge_cleanly(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(dir, ("left.txt", "left changed\n"), ("right.txt", "right changed\n"));
    let main = head_oid(&dir.join(".knot"));
    let topic = read_ref(&dir.join(".knot"), "refs/heads/topic");

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Merge made by the 'recursive' strategy."));

    assert_eq!(parents(dir, "HEAD"), vec![main, topic]);
    assert_eq!(read_file(dir, "left.txt"), "left changed\n");
    assert_eq!(read_file(dir, "right.txt"), "right changed\n");
    run_knot_command(dir, &["status", "--porcelain"]).assert().success().stdout("");
    run_knot_command(dir, &["log", "--oneline", "-n", "1"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with(" Merge branch 'topic' into main\n"));
}

#[rstest]
fn changes_to_different_lines_of_one_file_merge(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(
        dir,
        ("shared.txt", "line1 main\nline2\nline3\n"),
        ("shared.txt", "line1\nline2\nline3 topic\n"),
    );

    run_knot_command(dir, &["merge", "topic", "-m", "Combine"]).assert().success();

    assert_eq!(read_file(dir, "shared.txt"), "line1 main\nline2\nline3 topic\n");
    run_knot_command(dir, &["log", "--oneline", "-n", "1"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with(" Combine\n"));
}

#[rstest]
fn overlapping_edits_stop_with_conflicts(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(
        dir,
        ("shared.txt", "line1\nline2 main\nline3\n"),
        ("shared.txt", "line1\nline2 topic\nline3\n"),
    );
    let main = head_oid(&dir.join(".knot"));
    let topic = read_ref(&dir.join(".knot"), "refs/heads/topic");

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("CONFLICT (content): Merge conflict in shared.txt"))
        .stdout(predicate::str::contains("Automatic merge failed"));

    assert_eq!(
        read_file(dir, "shared.txt"),
        "line1\n<<<<<<< HEAD\nline2 main\n=======\nline2 topic\n>>>>>>> topic\nline3\n"
    );
    assert_eq!(read_ref(&dir.join(".knot"), "MERGE_HEAD"), topic);
    assert_eq!(head_oid(&dir.join(".knot")), main);

    run_knot_command(dir, &["status", "--porcelain"])
        .assert()
        .success()
        .stdout("UU shared.txt\n");
    run_knot_command(dir, &["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("You have unmerged paths."))
        .stdout(predicate::str::contains("both modified:"));

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MERGE_HEAD exists"));
    knot_commit(dir, "Too early")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unmerged paths"));

    write_file(dir, "shared.txt", "line1\nline2 both\nline3\n");
    run_knot_command(dir, &["add", "shared.txt"]).assert().success();
    run_knot_command(dir, &["commit"]).assert().success();

    assert_eq!(parents(dir, "HEAD"), vec![main, topic]);
    assert!(!dir.join(".knot").join("MERGE_HEAD").exists());
    let message = knot_output(dir, &["log", "-n", "1"]);
    assert!(message.contains("    Merge branch 'topic' into main\n"));
    assert!(!message.contains("# Conflicts"));
}

#[rstest]
fn modify_delete_keeps_the_surviving_version(repository_dir: TempDir) {
    let dir = repository_dir.path();
    run_knot_command(dir, &["init"]).assert().success();
    write_file(dir, "doomed.txt", "original\n");
    write_file(dir, "keep.txt", "keep\n");
    commit_all(dir, "Base");
    run_knot_command(dir, &["branch", "topic"]).assert().success();

    write_file(dir, "doomed.txt", "edited on main\n");
    commit_all(dir, "Edit");

    run_knot_command(dir, &["checkout", "topic"]).assert().success();
    delete_path(dir, "doomed.txt");
    commit_all(dir, "Delete");
    run_knot_command(dir, &["checkout", "main"]).assert().success();

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("CONFLICT (modify/delete): Merge conflict in doomed.txt"));

    assert_eq!(read_file(dir, "doomed.txt"), "edited on main\n");
    run_knot_command(dir, &["status", "--porcelain"])
        .assert()
        .success()
        .stdout("UD doomed.txt\n");
}

#[rstest]
fn merge_refuses_staged_changes(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(dir, ("left.txt", "left changed\n"), ("right.txt", "right changed\n"));
    write_file(dir, "staged.txt", "staged\n");
    run_knot_command(dir, &["add", "staged.txt"]).assert().success();

    run_knot_command(dir, &["merge", "topic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("would be overwritten by merge"));
}

/// History:
///
/// ```text
///   A---B---M1---D  main
///    \   \ /
///     \   X
///      \ / \
///       C---M2---E  topic
/// ```
#[rstest]
fn criss_cross_history_merges_through_a_virtual_base(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(dir, ("left.txt", "left B\n"), ("right.txt", "right C\n"));
    let b = head_oid(&dir.join(".knot"));
    let c = read_ref(&dir.join(".knot"), "refs/heads/topic");
    run_knot_command(dir, &["tag", "b"]).assert().success();

    run_knot_command(dir, &["merge", "topic"]).assert().success();
    run_knot_command(dir, &["checkout", "topic"]).assert().success();
    run_knot_command(dir, &["merge", "b"]).assert().success();

    let bases = knot_output(dir, &["merge-base", "--all", "main", "topic"])
        .lines()
        .map(str::to_string)
        .collect::<BTreeSet<_>>();
    assert_eq!(bases, BTreeSet::from([b, c]));

    write_file(dir, "topic.txt", "E\n");
    commit_all(dir, "Commit E - topic");
    run_knot_command(dir, &["checkout", "main"]).assert().success();
    write_file(dir, "shared.txt", "line1\nline2\nline3\nline4 D\n");
    commit_all(dir, "Commit D - main");

    run_knot_command(dir, &["merge", "topic"]).assert().success();

    assert_eq!(read_file(dir, "left.txt"), "left B\n");
    assert_eq!(read_file(dir, "right.txt"), "right C\n");
    assert_eq!(read_file(dir, "topic.txt"), "E\n");
    assert_eq!(read_file(dir, "shared.txt"), "line1\nline2\nline3\nline4 D\n");
    run_knot_command(dir, &["status", "--porcelain"]).assert().success().stdout("");
}

#[rstest]
fn ancestry_checks_report_through_the_exit_status(repository_dir: TempDir) {
    let dir = repository_dir.path();
    diverged(dir, ("left.txt", "left changed\n"), ("right.txt", "right changed\n"));

    run_knot_command(dir, &["merge-base", "--is-ancestor", "main~1", "main"])
        .assert()
        .success();
    run_knot_command(dir, &["merge-base", "--is-ancestor", "main", "main"])
        .assert()
        .success();
    run_knot_command(dir, &["merge-base", "--is-ancestor", "topic", "main"])
        .assert()
        .failure();

    let base = knot_output(dir, &["merge-base", "main", "topic"]);
    assert_eq!(base.trim(), knot_output(dir, &["cat-file", "-p", "main"])
        .lines()
        .find_map(|line| line.strip_prefix("parent "))
        .unwrap());
}
