use assert_fs::TempDir;
use predicates::prelude::predicate;
use pretty_assertions::assert_eq;
use rstest::rstest;

mod common;
use common::command::{init_repository_dir, knot_output, repository_dir, run_knot_command};
use common::file::write_file;

#[rstest]
fn init_creates_the_data_directory(repository_dir: TempDir) {
    run_knot_command(repository_dir.path(), &["init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty Knot repository in"));

    let knot_dir = repository_dir.path().join(".knot");
    assert!(knot_dir.join("objects").is_dir());
    assert!(knot_dir.join("refs").join("heads").is_dir());
    assert_eq!(
        std::fs::read_to_string(knot_dir.join("HEAD")).unwrap(),
        "ref: refs/heads/main\n"
    );
}

#[rstest]
fn init_twice_reinitializes(repository_dir: TempDir) {
    run_knot_command(repository_dir.path(), &["init"]).assert().success();

    run_knot_command(repository_dir.path(), &["init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reinitialized existing Knot repository"));
}

#[rstest]
fn bare_init_keeps_data_at_the_top(repository_dir: TempDir) {
    run_knot_command(repository_dir.path(), &["init", "--bare", "server.knot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty bare Knot repository"));

    let server = repository_dir.path().join("server.knot");
    assert!(server.join("HEAD").is_file());
    assert!(!server.join(".knot").exists());

    run_knot_command(&server, &["status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be run in a work tree"));
}

#[rstest]
fn hash_object_matches_the_blob_digest(repository_dir: TempDir) {
    write_file(repository_dir.path(), "hello.txt", "hello\n");

    // Digesting needs no repository
    run_knot_command(repository_dir.path(), &["hash-object", "hello.txt"])
        .assert()
        .success()
        .stdout("ce013625030ba8dba906f756967f9e9ca394464a\n");
}

#[rstest]
fn written_blob_can_be_read_back(repository_dir: TempDir) {
    run_knot_command(repository_dir.path(), &["init"]).assert().success();
    write_file(repository_dir.path(), "hello.txt", "hello\n");

    let oid = knot_output(repository_dir.path(), &["hash-object", "-w", "hello.txt"]);
    let oid = oid.trim();

    run_knot_command(repository_dir.path(), &["cat-file", "-t", oid])
        .assert()
        .success()
        .stdout("blob\n");
    run_knot_command(repository_dir.path(), &["cat-file", "-s", oid])
        .assert()
        .success()
        .stdout("6\n");
    run_knot_command(repository_dir.path(), &["cat-file", "-p", &oid[..7]])
        .assert()
        .success()
        .stdout("hello\n");
}

#[rstest]
fn empty_file_hashes_to_the_empty_blob(repository_dir: TempDir) {
    run_knot_command(repository_dir.path(), &["init"]).assert().success();
    write_file(repository_dir.path(), "empty", "");

    run_knot_command(repository_dir.path(), &["hash-object", "-w", "empty"])
        .assert()
        .success()
        .stdout("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\n");
    run_knot_command(
        repository_dir.path(),
        &["cat-file", "-s", "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"],
    )
    .assert()
    .success()
    .stdout("0\n");
}

#[rstest]
fn exists_check_reports_through_the_exit_status(init_repository_dir: TempDir) {
    let dir = init_repository_dir.path();

    run_knot_command(dir, &["cat-file", "-e", "HEAD"]).assert().success().stdout("");
    run_knot_command(dir, &["cat-file", "-e", "0123456789012345678901234567890123456789"])
        .assert()
        .failure();
}

#[rstest]
fn commit_is_printed_with_its_headers(init_repository_dir: TempDir) {
    let dir = init_repository_dir.path();

    run_knot_command(dir, &["cat-file", "-t", "HEAD"])
        .assert()
        .success()
        .stdout("commit\n");
    run_knot_command(dir, &["cat-file", "-p", "main"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("tree "))
        .stdout(predicate::str::contains("author fake_user <fake_email@email.com> 1672574400 +0000"))
        .stdout(predicate::str::contains("\nInitial commit"));
}

#[rstest]
fn unknown_object_names_fail(init_repository_dir: TempDir) {
    run_knot_command(init_repository_dir.path(), &["cat-file", "-p", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[rstest]
fn repack_keeps_objects_readable(init_repository_dir: TempDir) {
    let dir = init_repository_dir.path();

    run_knot_command(dir, &["repack"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Packed 7 objects into pack-"));

    let loose = std::fs::read_dir(dir.join(".knot").join("objects"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().len() == 2)
        .map(|entry| std::fs::read_dir(entry.path()).unwrap().count())
        .sum::<usize>();
    assert_eq!(loose, 0);

    run_knot_command(dir, &["cat-file", "-p", "43dd47ea691c90a5fa7827892c70241913351963"])
        .assert()
        .success()
        .stdout("one");
    run_knot_command(dir, &["cat-file", "-t", "HEAD"])
        .assert()
        .success()
        .stdout("commit\n");
    run_knot_command(dir, &["repack"])
        .assert()
        .success()
        .stdout("Nothing new to pack.\n");
}
