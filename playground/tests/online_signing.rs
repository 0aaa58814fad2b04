// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end online signing: snapshot/timestamp production, expiry-driven bumps, the
//! publishable tree, and the offline bump branches.

mod test_utils;

use playground::clock::FixedClock;
use playground::error::ErrorKind;
use playground::git::{EphemeralGit, GitSurface};
use playground::key_source::SignerRegistry;
use playground::online::OnlineSigner;
use playground::repo::{RoleSet, WorkingTree, WriteContext};
use playground::schema::{Metadata, RoleName, Signed, Target};
use tempfile::TempDir;
use test_utils::{committed_repo, day0, days, install_testing_key, write_repo, Signer};
use tokio_util::sync::CancellationToken;

/// A committed baseline where targets.json lists `file1.txt`, with the file on disk.
async fn seeded_tree(dir: &std::path::Path) -> WorkingTree {
    let user1 = Signer::new("@user1", 1);
    let mut set = committed_repo(day0(), &user1);
    let mut targets = set
        .get(&RoleName::Targets)
        .unwrap()
        .as_targets()
        .unwrap()
        .signed
        .clone();
    targets.add_target("file1.txt", Target::from_bytes(b"hello world"));
    let mut metadata = Metadata::Targets(Signed {
        signed: targets,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    set.insert(RoleName::Targets, metadata);

    let tree = write_repo(dir, &set).await;
    std::fs::write(tree.targets_dir().join("file1.txt"), b"hello world").unwrap();
    tree
}

#[tokio::test]
async fn snapshot_then_noop_then_publish() {
    install_testing_key();
    let dir = TempDir::new().unwrap();
    let tree = seeded_tree(dir.path()).await;
    let registry = SignerRegistry::with_defaults();
    let clock = FixedClock(day0());
    let signer = OnlineSigner::new(&registry, &clock);

    let outcome = signer.snapshot(&tree).await.unwrap();
    assert_eq!(outcome.snapshot.map(|v| v.get()), Some(1));
    assert_eq!(outcome.timestamp.map(|v| v.get()), Some(1));

    // Running again without changes writes nothing.
    let again = signer.snapshot(&tree).await.unwrap();
    assert!(again.is_noop());

    // Same-day expiry bumps are a no-op too.
    let bumped = signer.bump_online(&tree).await.unwrap();
    assert!(bumped.is_noop());

    // The snapshot and timestamp verify against root's online rule.
    let set = RoleSet::load(&tree).await.unwrap();
    for role in [RoleName::Snapshot, RoleName::Timestamp] {
        let verification = set.verify_role(&role).unwrap();
        assert!(verification.invalid.is_empty());
        assert_eq!(verification.valid.len(), 1, "{role} must carry the online signature");
    }

    // The published tree: versioned offline roles, unversioned online roles, mirrored targets.
    let publish_dir = TempDir::new().unwrap();
    signer.publish(&tree, publish_dir.path()).await.unwrap();
    let metadata_dir = publish_dir.path().join("metadata");
    for expected in ["1.root.json", "1.targets.json", "snapshot.json", "timestamp.json"] {
        assert!(metadata_dir.join(expected).is_file(), "missing {expected}");
    }
    assert_eq!(
        std::fs::read(publish_dir.path().join("targets/file1.txt")).unwrap(),
        b"hello world",
        "published targets must be byte-identical"
    );
    assert_eq!(
        std::fs::read(metadata_dir.join("snapshot.json")).unwrap(),
        std::fs::read(tree.role_path(&RoleName::Snapshot)).unwrap()
    );
}

/// Snapshot has a 10 day expiry and 4 day signing period; timestamp 2 and 1. No bump on day
/// zero, snapshot v2 + timestamp v2 on day 11, timestamp v3 alone on day 13.
#[tokio::test]
async fn expiry_driven_online_bumps() {
    install_testing_key();
    let dir = TempDir::new().unwrap();
    let tree = seeded_tree(dir.path()).await;
    let registry = SignerRegistry::with_defaults();

    let clock = FixedClock(day0());
    let outcome = OnlineSigner::new(&registry, &clock).snapshot(&tree).await.unwrap();
    assert_eq!(outcome.snapshot.map(|v| v.get()), Some(1));

    let clock = FixedClock(day0() + days(11));
    let outcome = OnlineSigner::new(&registry, &clock)
        .bump_online(&tree)
        .await
        .unwrap();
    assert_eq!(outcome.snapshot.map(|v| v.get()), Some(2));
    assert_eq!(outcome.timestamp.map(|v| v.get()), Some(2));

    let clock = FixedClock(day0() + days(13));
    let outcome = OnlineSigner::new(&registry, &clock)
        .bump_online(&tree)
        .await
        .unwrap();
    assert_eq!(outcome.snapshot, None, "snapshot is fresh until day 17");
    assert_eq!(outcome.timestamp.map(|v| v.get()), Some(3));

    let set = RoleSet::load(&tree).await.unwrap();
    let snapshot = set.snapshot().unwrap();
    assert_eq!(snapshot.signed.version.get(), 2);
    assert_eq!(snapshot.signed.expires, day0() + days(11) + days(10));
}

#[tokio::test]
async fn offline_bumps_open_event_branches() {
    install_testing_key();
    let dir = TempDir::new().unwrap();
    let user1 = Signer::new("@user1", 1);
    let set = committed_repo(day0(), &user1);
    let tree = write_repo(dir.path(), &set).await;
    let registry = SignerRegistry::with_defaults();
    let git = EphemeralGit::new();

    // Root and targets expire at day 365 with a 60 day signing period: nothing to do at day
    // 200, both bumped at day 320.
    let clock = FixedClock(day0() + days(200));
    let branches = OnlineSigner::new(&registry, &clock)
        .bump_offline(&tree, &git)
        .await
        .unwrap();
    assert!(branches.is_empty());

    let clock = FixedClock(day0() + days(320));
    let branches = OnlineSigner::new(&registry, &clock)
        .bump_offline(&tree, &git)
        .await
        .unwrap();
    assert_eq!(branches, ["sign/root-bump-2", "sign/targets-bump-2"]);

    let bumped = git
        .read_file("sign/root-bump-2", "metadata/root.json")
        .await
        .unwrap()
        .expect("bumped root on the event branch");
    let metadata = Metadata::from_json(&RoleName::Root, &bumped).unwrap();
    assert_eq!(metadata.version().get(), 2);
    assert_eq!(metadata.expires(), day0() + days(320) + days(365));
    assert!(metadata.signatures().is_empty(), "a bump arrives unsigned");

    // The working tree itself is untouched; only the branches carry the bumps.
    let on_disk = RoleSet::load(&tree).await.unwrap();
    assert_eq!(on_disk.get(&RoleName::Root).unwrap().version().get(), 1);
}

#[tokio::test]
async fn committed_writes_enforce_thresholds() {
    let dir = TempDir::new().unwrap();
    let user1 = Signer::new("@user1", 1);
    let set = committed_repo(day0(), &user1);
    let tree = write_repo(dir.path(), &set).await;

    // Signed role: accepted in the committed context.
    let signed = set.get(&RoleName::Targets).unwrap().clone();
    tree.write_role(&RoleName::Targets, &signed, WriteContext::Committed(&set))
        .await
        .unwrap();

    // Unsigned role: refused in the committed context, accepted for a partial event.
    let mut unsigned = signed.clone();
    unsigned.signatures_mut().clear();
    let err = tree
        .write_role(&RoleName::Targets, &unsigned, WriteContext::Committed(&set))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    tree.write_role(&RoleName::Targets, &unsigned, WriteContext::PartialEvent)
        .await
        .unwrap();
}

#[tokio::test]
async fn bump_respects_expiry_period() {
    let user1 = Signer::new("@user1", 1);
    let mut set = committed_repo(day0(), &user1);
    let now = day0() + days(300);
    let version = set.bump_role(&RoleName::Targets, now).unwrap();
    assert_eq!(version.get(), 2);
    let expires = set.get(&RoleName::Targets).unwrap().expires();
    assert!(now < expires && expires <= now + days(365) + days(1));
}

#[tokio::test]
async fn publishing_an_expired_timestamp_is_refused() {
    install_testing_key();
    let dir = TempDir::new().unwrap();
    let tree = seeded_tree(dir.path()).await;
    let registry = SignerRegistry::with_defaults();
    let clock = FixedClock(day0());
    OnlineSigner::new(&registry, &clock)
        .snapshot(&tree)
        .await
        .unwrap();

    // The timestamp produced above expires after 2 days; publishing on day 3 must fail
    // with the expiry-policy kind, and nothing may land in the publish directory.
    let publish_dir = TempDir::new().unwrap();
    let late = FixedClock(day0() + days(3));
    let err = OnlineSigner::new(&registry, &late)
        .publish(&tree, publish_dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExpiryPolicyViolation);
    assert!(!publish_dir.path().join("metadata").exists());
}

#[tokio::test]
async fn cancellation_leaves_the_tree_untouched() {
    install_testing_key();
    let dir = TempDir::new().unwrap();
    let tree = seeded_tree(dir.path()).await;
    let registry = SignerRegistry::with_defaults();
    let clock = FixedClock(day0());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = OnlineSigner::with_cancel(&registry, &clock, cancel)
        .snapshot(&tree)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!tree.role_path(&RoleName::Snapshot).exists());
}

#[tokio::test]
async fn round_trip_load_save_load() {
    let dir = TempDir::new().unwrap();
    let user1 = Signer::new("@user1", 1);
    let set = committed_repo(day0(), &user1);
    let tree = write_repo(dir.path(), &set).await;
    let loaded = RoleSet::load(&tree).await.unwrap();
    assert_eq!(loaded, set);

    // Saving what was loaded and loading again is byte-stable.
    let dir2 = TempDir::new().unwrap();
    let tree2 = write_repo(dir2.path(), &loaded).await;
    assert_eq!(
        std::fs::read(tree.role_path(&RoleName::Root)).unwrap(),
        std::fs::read(tree2.role_path(&RoleName::Root)).unwrap()
    );
}
