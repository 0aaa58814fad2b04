// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end signing-event verdicts: initialization, multi-user signing, illegal edits,
//! version regressions, and target file consistency.

mod test_utils;

use playground::error::ErrorKind;
use playground::event::{InvalidReason, SigningEvent, Verdict};
use playground::key_source::SignerRegistry;
use playground::repo::{RoleSet, TargetFiles};
use playground::schema::{
    DelegatedRole, Metadata, PathSet, RoleName, RoleType, Signature, Signed, Snapshot, Target,
};
use test_utils::{base_targets, committed_repo, day0, days, nz, Signer};

fn evaluate(base: &RoleSet, event: &RoleSet, files: &TargetFiles) -> Verdict {
    SigningEvent {
        base,
        event,
        target_files: files,
        now: day0(),
    }
    .evaluate()
    .unwrap()
    .verdict
}

fn clone_root(set: &RoleSet) -> playground::schema::Root {
    set.get(&RoleName::Root)
        .unwrap()
        .as_root()
        .unwrap()
        .signed
        .clone()
}

fn clone_targets(set: &RoleSet) -> playground::schema::Targets {
    set.get(&RoleName::Targets)
        .unwrap()
        .as_targets()
        .unwrap()
        .signed
        .clone()
}

#[test]
fn initialization_event_is_publishable() {
    let user1 = Signer::new("@user1", 1);
    let base = RoleSet::default();
    let event = committed_repo(day0(), &user1);
    let verdict = evaluate(&base, &event, &TargetFiles::default());
    assert_eq!(verdict, Verdict::Publishable);
}

#[test]
fn identical_branches_are_empty() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);
    let event = base.clone();
    assert_eq!(evaluate(&base, &event, &TargetFiles::default()), Verdict::Empty);
}

#[test]
fn verdict_is_deterministic() {
    let user1 = Signer::new("@user1", 1);
    let base = RoleSet::default();
    let event = committed_repo(day0(), &user1);
    let files = TargetFiles::default();
    let first = SigningEvent {
        base: &base,
        event: &event,
        target_files: &files,
        now: day0(),
    }
    .evaluate()
    .unwrap();
    let second = SigningEvent {
        base: &base,
        event: &event,
        target_files: &files,
        now: day0(),
    }
    .evaluate()
    .unwrap();
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.report.to_string(), second.report.to_string());
}

/// The multi-user flow: invite, accept, re-sign.
#[test]
fn multi_user_root_signing() {
    let user1 = Signer::new("@user1", 1);
    let user2 = Signer::new("@user2", 2);
    let base = committed_repo(day0(), &user1);

    // user1 raises the root threshold to 2 and invites user2.
    let mut event = base.clone();
    let mut root = clone_root(&base);
    root.version = nz(2);
    root.expires = day0() + days(365);
    root.roles.get_mut(&RoleType::Root).unwrap().threshold = nz(2);
    root.invites
        .insert("root".to_string(), vec!["@user2".to_string()]);
    let mut metadata = Metadata::Root(Signed {
        signed: root,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    event.insert(RoleName::Root, metadata.clone());

    let verdict = evaluate(&base, &event, &TargetFiles::default());
    let Verdict::Incomplete(obligations) = verdict else {
        panic!("expected incomplete, got {verdict:?}");
    };
    assert_eq!(
        obligations.signatures[&RoleName::Root],
        vec!["@user1".to_string(), "@user2".to_string()],
        "an open invite forces everyone to (re-)sign"
    );
    assert_eq!(obligations.invites["root"], vec!["@user2".to_string()]);

    // user2 accepts the invite: binds a key, clears the invite, signs. user1's earlier
    // signature is now stale but must not make the event invalid.
    let stale_signatures = metadata.signatures().to_vec();
    let mut root = clone_root(&event);
    root.invites.clear();
    root.add_role_key(RoleType::Root, user2.key()).unwrap();
    let mut metadata = Metadata::Root(Signed {
        signed: root,
        signatures: stale_signatures,
    });
    user2.sign(&mut metadata);
    event.insert(RoleName::Root, metadata.clone());

    let verdict = evaluate(&base, &event, &TargetFiles::default());
    let Verdict::Incomplete(obligations) = verdict else {
        panic!("expected incomplete, got {verdict:?}");
    };
    assert_eq!(
        obligations.signatures[&RoleName::Root],
        vec!["@user1".to_string()]
    );
    assert!(obligations.invites.is_empty());

    // user1 re-signs the final content; thresholds now hold under both the baseline rule
    // and the new rule.
    user1.resign(&mut metadata);
    event.insert(RoleName::Root, metadata);
    assert_eq!(
        evaluate(&base, &event, &TargetFiles::default()),
        Verdict::Publishable
    );
}

#[test]
fn direct_snapshot_edit_is_illegal() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);
    let mut event = base.clone();
    event.insert(
        RoleName::Snapshot,
        Metadata::Snapshot(Signed {
            signed: Snapshot::new(playground::SPEC_VERSION.to_string(), nz(1), day0() + days(10)),
            signatures: Vec::new(),
        }),
    );

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert!(failures
        .iter()
        .any(|f| f.role == RoleName::Snapshot
            && matches!(f.reason, InvalidReason::IllegalOnlineChange)));
}

#[test]
fn root_version_regression_short_circuits() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);

    // Content changes but the version stays at 1; the broken threshold must not be reported
    // because regression stops further analysis of root.
    let mut event = base.clone();
    let mut root = clone_root(&base);
    root.roles.get_mut(&RoleType::Root).unwrap().threshold = nz(40);
    let mut metadata = Metadata::Root(Signed {
        signed: root,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    event.insert(RoleName::Root, metadata);

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].role, RoleName::Root);
    assert!(matches!(
        failures[0].reason,
        InvalidReason::VersionRegression { base: 1, event: 1 }
    ));
}

#[test]
fn expiry_beyond_policy_is_rejected() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);
    let mut event = base.clone();
    let mut targets = clone_targets(&base);
    targets.version = nz(2);
    targets.expires = day0() + days(500); // policy says 365
    let mut metadata = Metadata::Targets(Signed {
        signed: targets,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    event.insert(RoleName::Targets, metadata);

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert!(failures
        .iter()
        .any(|f| matches!(f.reason, InvalidReason::ExpiryOutOfRange { .. })));
}

#[test]
fn bad_signature_over_unchanged_content() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);
    let mut event = base.clone();
    let mut metadata = event.get(&RoleName::Targets).unwrap().clone();
    metadata.signatures_mut().push(Signature {
        keyid: user1.keyid(),
        sig: hex::encode([0u8; 64]),
    });
    event.insert(RoleName::Targets, metadata);

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert!(failures
        .iter()
        .any(|f| matches!(f.reason, InvalidReason::BadSignature { .. })));
}

fn with_delegation(set: &RoleSet, user2: &Signer) -> RoleSet {
    let user1 = Signer::new("@user1", 1);
    let mut out = set.clone();
    let mut targets = clone_targets(set);
    let delegations = targets.delegations.as_mut().unwrap();
    delegations.keys.insert(user2.keyid(), user2.key());
    delegations.roles.push(DelegatedRole {
        name: "projects".to_string(),
        keyids: vec![user2.keyid()],
        threshold: nz(1),
        paths: PathSet::Paths(vec!["projects/*".to_string()]),
        terminating: false,
        expiry_period: Some(365),
        signing_period: Some(60),
    });
    let mut metadata = Metadata::Targets(Signed {
        signed: targets,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    out.insert(RoleName::Targets, metadata);

    let mut projects = Metadata::Targets(Signed {
        signed: base_targets(day0()),
        signatures: Vec::new(),
    });
    user2.sign(&mut projects);
    out.insert(RoleName::Delegated("projects".to_string()), projects);
    out
}

#[test]
fn orphaned_removal_is_invalid() {
    let user1 = Signer::new("@user1", 1);
    let user2 = Signer::new("@user2", 2);
    let base = with_delegation(&committed_repo(day0(), &user1), &user2);

    // Deleting the role file while targets still delegates to it.
    let mut event = base.clone();
    event.roles.remove(&RoleName::Delegated("projects".to_string()));

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert!(failures
        .iter()
        .any(|f| matches!(f.reason, InvalidReason::OrphanedRemoval)));
}

#[test]
fn removal_with_delegation_edit_is_legal() {
    let user1 = Signer::new("@user1", 1);
    let user2 = Signer::new("@user2", 2);
    let base = with_delegation(&committed_repo(day0(), &user1), &user2);

    let mut event = base.clone();
    event.roles.remove(&RoleName::Delegated("projects".to_string()));
    let mut targets = clone_targets(&base);
    targets.version = nz(3);
    targets.expires = day0() + days(365);
    targets.delegations.as_mut().unwrap().roles.clear();
    let mut metadata = Metadata::Targets(Signed {
        signed: targets,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    event.insert(RoleName::Targets, metadata);

    assert_eq!(
        evaluate(&base, &event, &TargetFiles::default()),
        Verdict::Publishable
    );
}

#[test]
fn target_files_must_match_listings() {
    let user1 = Signer::new("@user1", 1);
    let base = committed_repo(day0(), &user1);

    // The role lists a file that is not on disk.
    let mut event = base.clone();
    let mut targets = clone_targets(&base);
    targets.version = nz(2);
    targets.add_target("file1.txt", Target::from_bytes(b"hello"));
    let mut metadata = Metadata::Targets(Signed {
        signed: targets,
        signatures: Vec::new(),
    });
    user1.sign(&mut metadata);
    event.insert(RoleName::Targets, metadata);

    let Verdict::Invalid(failures) = evaluate(&base, &event, &TargetFiles::default()) else {
        panic!("expected invalid");
    };
    assert!(failures.iter().any(|f| matches!(
        &f.reason,
        InvalidReason::UnmatchedTargets { detail } if detail.contains("missing on disk")
    )));

    // A file on disk that no role lists, next to the listed-but-missing one.
    let files = TargetFiles {
        files: maplit::btreemap! {
            "stray.bin".to_string() => Target::from_bytes(b"stray"),
        },
    };
    let Verdict::Invalid(failures) = evaluate(&base, &event, &files) else {
        panic!("expected invalid");
    };
    assert!(failures.iter().any(|f| matches!(
        &f.reason,
        InvalidReason::UnmatchedTargets { detail } if detail.contains("no role lists it")
    )));
}

#[test]
fn unregistered_online_scheme_is_unavailable() {
    // This test binary never sets LOCAL_TESTING_KEY, so resolution must fall through to the
    // registry and fail for an unregistered cloud scheme.
    let registry = SignerRegistry::with_defaults();
    let err = registry
        .resolve("azurekms:vault/playground/keys/online")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignerUnavailable);
}
