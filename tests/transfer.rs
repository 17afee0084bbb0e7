use assert_fs::TempDir;
use knot::areas::repository::Repository;
use knot::artifacts::branch::branch_name::RefName;
use knot::artifacts::merge::MergeOutcome;
use knot::artifacts::transfer::server::Daemon;
use knot::commands::porcelain::clone::CloneOptions;
use knot::errors::RepositoryError;
use pretty_assertions::assert_eq;
use std::path::Path;

mod common;
use common::file::noise;
use common::repository::{
    Output, commit_files, configure_author, head, init_bare_repository, init_repository, open_repository,
};

fn url(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn clone(url: &str, destination: &Path, options: &CloneOptions) -> (Repository, Output) {
    let output = Output::default();
    let repository = Repository::clone_repository(url, destination, options, Box::new(output.clone()))
        .await
        .expect("Failed to clone");
    configure_author(&repository);
    (repository, output)
}

/// A bare server plus a working repository that has pushed one commit to it
async fn published(dir: &Path) -> (String, Repository) {
    let server = dir.join("server.knot");
    init_bare_repository(&server).await;

    let (alice, _) = init_repository(&dir.join("alice")).await;
    alice.add_remote("origin", &url(&server)).await.unwrap();
    commit_files(&alice, &[("README", "v1\n"), ("src/lib.txt", "library\n")], "v1").await;
    alice.push("origin", &[], false).await.unwrap();

    (url(&server), alice)
}

#[tokio::test]
async fn history_travels_both_ways() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let v1 = head(&alice).unwrap();

    let (bob, output) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;
    assert!(output.contents().starts_with("Cloning into '"));
    assert_eq!(head(&bob), Some(v1.clone()));
    assert_eq!(std::fs::read_to_string(bob.path().join("src/lib.txt")).unwrap(), "library\n");
    assert_eq!(
        bob.refs().current_branch().unwrap().unwrap().as_ref(),
        "refs/heads/main"
    );

    let v2 = commit_files(&bob, &[("README", "v2\n")], "v2").await;
    let updates = bob.push("origin", &[], false).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].new, Some(v2.clone()));

    let outcome = alice.pull("origin", None).await.unwrap();
    assert_eq!(outcome, MergeOutcome::FastForward { from: v1.clone(), to: v2.clone() });
    assert_eq!(head(&alice), Some(v2.clone()));
    assert_eq!(std::fs::read_to_string(alice.path().join("README")).unwrap(), "v2\n");
    assert!(alice.history().unwrap().is_ancestor(&v1, &v2).unwrap());
    assert_eq!(
        alice.database().load_commit(&v2).unwrap().parents().to_vec(),
        vec![v1]
    );
}

#[tokio::test]
async fn diverged_pull_creates_a_merge_commit() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;

    let theirs = commit_files(&bob, &[("bob.txt", "bob\n")], "Bob's change").await;
    bob.push("origin", &[], false).await.unwrap();
    let ours = commit_files(&alice, &[("alice.txt", "alice\n")], "Alice's change").await;

    let outcome = alice.pull("origin", None).await.unwrap();

    let MergeOutcome::Resolved { commit } = outcome else {
        panic!("expected a merge commit, got {outcome:?}");
    };
    let merge = alice.database().load_commit(&commit).unwrap();
    assert_eq!(merge.parents().to_vec(), vec![ours, theirs]);
    assert_eq!(merge.message().trim(), format!("Merge branch 'main' of {url}"));
    assert!(alice.path().join("bob.txt").is_file());
    assert!(alice.path().join("alice.txt").is_file());
}

#[tokio::test]
async fn large_and_empty_files_arrive_intact() {
    let dir = TempDir::new().unwrap();
    let server = dir.path().join("server.knot");
    init_bare_repository(&server).await;
    let (alice, _) = init_repository(&dir.path().join("alice")).await;
    alice.add_remote("origin", &url(&server)).await.unwrap();

    let large = noise(1_500_000, 7);
    std::fs::write(alice.path().join("large.bin"), &large).unwrap();
    std::fs::write(alice.path().join("empty"), b"").unwrap();
    commit_files(&alice, &[], "Binary content").await;
    alice.push("origin", &[], false).await.unwrap();

    let (bob, _) = clone(&url(&server), &dir.path().join("bob"), &CloneOptions::default()).await;

    assert_eq!(std::fs::read(bob.path().join("large.bin")).unwrap(), large);
    assert_eq!(std::fs::read(bob.path().join("empty")).unwrap(), Vec::<u8>::new());
    assert_eq!(head(&bob), head(&alice));
}

#[tokio::test]
async fn bare_clone_copies_branches_without_a_work_tree() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    alice.create_branch("feature", None).await.unwrap();
    alice.push("origin", &["feature".to_string()], false).await.unwrap();

    let options = CloneOptions { bare: true, ..CloneOptions::default() };
    let (mirror, _) = clone(&url, &dir.path().join("mirror.knot"), &options).await;

    assert!(mirror.is_bare());
    assert!(!mirror.path().join("README").exists());
    let branches = mirror
        .refs()
        .list("refs/heads/")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name.as_ref().to_string())
        .collect::<Vec<_>>();
    assert_eq!(branches, vec!["refs/heads/feature", "refs/heads/main"]);
    assert_eq!(head(&mirror), head(&alice));
}

#[tokio::test]
async fn clone_checks_out_the_requested_branch() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    alice.checkout_new_branch("feature", None).await.unwrap();
    let feature = commit_files(&alice, &[("feature.txt", "feature\n")], "Feature").await;
    alice.push("origin", &["feature".to_string()], false).await.unwrap();

    let options = CloneOptions { branch: Some("feature".to_string()), ..CloneOptions::default() };
    let (bob, _) = clone(&url, &dir.path().join("bob"), &options).await;

    assert_eq!(head(&bob), Some(feature));
    assert_eq!(bob.refs().current_branch().unwrap().unwrap().as_ref(), "refs/heads/feature");
    assert!(bob.path().join("feature.txt").is_file());
}

#[tokio::test]
async fn clone_of_a_missing_branch_cleans_up() {
    let dir = TempDir::new().unwrap();
    let (url, _alice) = published(dir.path()).await;
    let destination = dir.path().join("bob");

    let options = CloneOptions { branch: Some("nope".to_string()), ..CloneOptions::default() };
    let Err(error) = Repository::clone_repository(&url, &destination, &options, Box::new(std::io::sink())).await
    else {
        panic!("clone of a missing branch succeeded");
    };

    assert!(error.to_string().contains("remote branch nope not found"));
    assert!(!destination.exists());
}

#[tokio::test]
async fn shallow_clone_stops_at_the_requested_depth() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let first = head(&alice).unwrap();
    commit_files(&alice, &[("README", "v2\n")], "v2").await;
    let tip = commit_files(&alice, &[("README", "v3\n")], "v3").await;
    alice.push("origin", &[], false).await.unwrap();

    let options = CloneOptions { depth: Some(1), ..CloneOptions::default() };
    let (bob, _) = clone(&url, &dir.path().join("bob"), &options).await;

    assert_eq!(head(&bob), Some(tip.clone()));
    assert_eq!(bob.refs().read_shallow().unwrap().into_iter().collect::<Vec<_>>(), vec![tip]);
    assert!(!bob.database().contains(&first));
    assert_eq!(std::fs::read_to_string(bob.path().join("README")).unwrap(), "v3\n");
}

#[tokio::test]
async fn cloning_an_empty_repository_warns() {
    let dir = TempDir::new().unwrap();
    let server = dir.path().join("server.knot");
    init_bare_repository(&server).await;

    let (bob, output) = clone(&url(&server), &dir.path().join("bob"), &CloneOptions::default()).await;

    assert!(output.contents().contains("You appear to have cloned an empty repository."));
    assert_eq!(head(&bob), None);
    assert!(bob.config().remotes.contains_key("origin"));
}

#[tokio::test]
async fn clone_creates_nested_destinations() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;

    let (bob, _) = clone(&url, &dir.path().join("deeply/nested/bob"), &CloneOptions::default()).await;

    assert_eq!(head(&bob), head(&alice));
}

#[tokio::test]
async fn clone_of_a_missing_repository_fails_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("bob");

    let result = Repository::clone_repository(
        &url(&dir.path().join("nowhere")),
        &destination,
        &CloneOptions::default(),
        Box::new(std::io::sink()),
    )
    .await;

    assert!(result.is_err());
    assert!(!destination.exists());
}

#[tokio::test]
async fn clone_refuses_a_non_empty_destination() {
    let dir = TempDir::new().unwrap();
    let (url, _alice) = published(dir.path()).await;
    let destination = dir.path().join("occupied");
    std::fs::create_dir_all(&destination).unwrap();
    std::fs::write(destination.join("keep.txt"), "mine").unwrap();

    let result = Repository::clone_repository(&url, &destination, &CloneOptions::default(), Box::new(std::io::sink())).await;

    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(destination.join("keep.txt")).unwrap(), "mine");
}

#[tokio::test]
async fn stale_push_is_rejected_unless_forced() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;

    let published_tip = commit_files(&alice, &[("README", "alice\n")], "Alice").await;
    alice.push("origin", &[], false).await.unwrap();
    commit_files(&bob, &[("README", "bob\n")], "Bob").await;

    let error = bob.push("origin", &[], false).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<RepositoryError>(),
        Some(RepositoryError::TransferRejected { .. })
    ));
    let (server, _) = open_repository(Path::new(&url));
    assert_eq!(head(&server), Some(published_tip));

    let updates = bob.push("origin", &[], true).await.unwrap();
    assert!(updates[0].forced);
    assert_eq!(head(&Repository::open(Path::new(&url), Box::new(std::io::sink())).unwrap()), head(&bob));
}

#[tokio::test]
async fn server_can_refuse_forced_rewrites() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;

    let (server, _) = open_repository(Path::new(&url));
    server
        .update_config(|config| {
            config.receive.deny_non_fast_forwards = true;
            Ok(())
        })
        .unwrap();

    let published_tip = commit_files(&alice, &[("README", "alice\n")], "Alice").await;
    alice.push("origin", &[], false).await.unwrap();
    commit_files(&bob, &[("README", "bob\n")], "Bob").await;

    let error = bob.push("origin", &[], true).await.unwrap_err();
    assert!(error.to_string().contains("non-fast-forward"));
    assert_eq!(head(&server), Some(published_tip));
}

#[tokio::test]
async fn concurrent_pushes_to_one_branch_admit_a_single_winner() {
    let dir = TempDir::new().unwrap();
    let (url, _alice) = published(dir.path()).await;
    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;
    let (carol, _) = clone(&url, &dir.path().join("carol"), &CloneOptions::default()).await;

    let bob_tip = commit_files(&bob, &[("bob.txt", "bob\n")], "Bob").await;
    let carol_tip = commit_files(&carol, &[("carol.txt", "carol\n")], "Carol").await;

    let (bob_result, carol_result) =
        futures::future::join(bob.push("origin", &[], false), carol.push("origin", &[], false)).await;

    let winner = match (bob_result.is_ok(), carol_result.is_ok()) {
        (true, false) => bob_tip,
        (false, true) => carol_tip,
        outcome => panic!("expected exactly one push to land, got {outcome:?}"),
    };
    let (server, _) = open_repository(Path::new(&url));
    assert_eq!(head(&server), Some(winner));
}

#[tokio::test]
async fn tags_and_deletions_are_pushed() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    alice.create_tag("v1.0", None, Some("First release"), false).await.unwrap();
    alice.create_branch("scratch", None).await.unwrap();

    alice
        .push("origin", &["v1.0".to_string(), "scratch".to_string()], false)
        .await
        .unwrap();
    let (server, _) = open_repository(Path::new(&url));
    let names = server
        .refs()
        .list("refs/")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name.as_ref().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["refs/heads/main", "refs/heads/scratch", "refs/tags/v1.0"]);

    alice.push("origin", &[":scratch".to_string()], false).await.unwrap();
    assert!(!server.refs().exists(&RefName::try_parse("refs/heads/scratch").unwrap()).unwrap());

    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;
    assert_eq!(bob.list_tags().await.unwrap(), vec!["v1.0".to_string()]);
}

#[tokio::test]
async fn fetch_updates_tracking_refs_only() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let (bob, output) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;
    let before = head(&bob);

    let tip = commit_files(&alice, &[("README", "v2\n")], "v2").await;
    alice.push("origin", &[], false).await.unwrap();

    let outcome = bob.fetch("origin", None).await.unwrap();

    assert_eq!(head(&bob), before);
    assert_eq!(
        bob.refs().read_oid(&RefName::try_parse("refs/remotes/origin/main").unwrap()).unwrap(),
        Some(tip)
    );
    assert!(outcome.updates.iter().any(|update| update.destination == "refs/remotes/origin/main"));
    assert!(output.contents().contains(&format!("From {url}")));

    let again = bob.fetch("origin", None).await.unwrap();
    assert!(again.updates.iter().all(|update| !update.is_rejected()));
}

#[tokio::test]
async fn remotes_are_added_renamed_and_removed() {
    let dir = TempDir::new().unwrap();
    let (url, _alice) = published(dir.path()).await;
    let (bob, output) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;

    let error = bob.add_remote("origin", "elsewhere").await.unwrap_err();
    assert!(error.to_string().contains("remote origin already exists"));

    bob.rename_remote("origin", "upstream").await.unwrap();
    assert!(bob.refs().exists(&RefName::try_parse("refs/remotes/upstream/main").unwrap()).unwrap());
    assert!(!bob.refs().exists(&RefName::try_parse("refs/remotes/origin/main").unwrap()).unwrap());
    assert_eq!(
        bob.config().remote("upstream").unwrap().fetch,
        vec!["+refs/heads/*:refs/remotes/upstream/*".to_string()]
    );

    bob.add_remote("mirror", "/srv/mirror").await.unwrap();
    assert_eq!(bob.list_remotes(false).await.unwrap(), vec!["mirror".to_string(), "upstream".to_string()]);
    bob.list_remotes(true).await.unwrap();
    assert!(output.contents().contains("mirror\t/srv/mirror (fetch)\nmirror\t/srv/mirror (push)\n"));

    bob.remove_remote("upstream").await.unwrap();
    assert!(bob.refs().list("refs/remotes/").unwrap().is_empty());
    assert_eq!(bob.list_remotes(false).await.unwrap(), vec!["mirror".to_string()]);
}

#[tokio::test]
async fn ls_remote_lists_advertised_refs() {
    let dir = TempDir::new().unwrap();
    let (url, alice) = published(dir.path()).await;
    let tip = head(&alice).unwrap();

    let refs = alice.ls_remote("origin").await.unwrap();

    assert!(refs.contains(&("refs/heads/main".to_string(), tip.clone())));
    assert!(refs.contains(&("HEAD".to_string(), tip)));
    assert!(!url.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_serves_clones_and_pushes_over_tcp() {
    let dir = TempDir::new().unwrap();
    let (_, alice) = published(dir.path()).await;

    let daemon = Daemon::bind("127.0.0.1:0", dir.path().canonicalize().unwrap())
        .await
        .unwrap();
    let address = daemon.local_addr().unwrap();
    let server = tokio::spawn(daemon.run());
    let url = format!("knot://{address}/server.knot");

    let (bob, _) = clone(&url, &dir.path().join("bob"), &CloneOptions::default()).await;
    assert_eq!(head(&bob), head(&alice));

    let tip = commit_files(&bob, &[("over-tcp.txt", "hello\n")], "Over TCP").await;
    bob.push("origin", &[], false).await.unwrap();

    let outcome = alice.pull("origin", None).await.unwrap();
    assert_eq!(head(&alice), Some(tip));
    assert!(matches!(outcome, MergeOutcome::FastForward { .. }));

    let Err(error) = Repository::clone_repository(
        &format!("knot://{address}/../escape"),
        &dir.path().join("escape"),
        &CloneOptions::default(),
        Box::new(std::io::sink()),
    )
    .await
    else {
        panic!("daemon served a path outside its base");
    };
    assert!(error.to_string().contains("access denied"));

    server.abort();
}
