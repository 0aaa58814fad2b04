// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use playground::key_source::LOCAL_TESTING_KEY_VAR;
use playground::repo::{RoleSet, WorkingTree, WriteContext};
use playground::schema::key::{Key, KeyVal, SCHEME_ED25519};
use playground::schema::{
    Metadata, RoleKeys, RoleName, RoleType, Root, Signature, Signed, Targets,
};
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::BTreeMap;
use std::num::NonZeroU64;

/// The instant the scenarios start at.
pub fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}

pub fn nz(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
}

/// The fixed seed of the online signing key, also exported as `LOCAL_TESTING_KEY`.
pub const ONLINE_SEED: [u8; 32] = [9u8; 32];

/// Makes the test-only online backend available to the signer registry.
pub fn install_testing_key() {
    std::env::set_var(LOCAL_TESTING_KEY_VAR, hex::encode(ONLINE_SEED));
}

/// A human signer with a deterministic ed25519 key.
pub struct Signer {
    pub handle: String,
    pub keypair: Ed25519KeyPair,
}

impl Signer {
    pub fn new(handle: &str, seed_byte: u8) -> Signer {
        Signer {
            handle: handle.to_string(),
            keypair: Ed25519KeyPair::from_seed_unchecked(&[seed_byte; 32]).unwrap(),
        }
    }

    /// This signer's key as listed in metadata, with the owner handle bound.
    pub fn key(&self) -> Key {
        Key {
            keytype: "ed25519".to_string(),
            scheme: SCHEME_ED25519.to_string(),
            keyval: KeyVal {
                public: hex::encode(self.keypair.public_key().as_ref()),
                _extra: BTreeMap::new(),
            },
            online_uri: None,
            keyowner: Some(self.handle.clone()),
            _extra: BTreeMap::new(),
        }
    }

    pub fn keyid(&self) -> String {
        self.key().key_id().unwrap()
    }

    /// Appends this signer's signature over the current payload.
    pub fn sign(&self, metadata: &mut Metadata) {
        let canonical = metadata.canonical_form().unwrap();
        let sig = self.keypair.sign(&canonical);
        metadata.signatures_mut().push(Signature {
            keyid: self.keyid(),
            sig: hex::encode(sig.as_ref()),
        });
    }

    /// Replaces every signature by this signer with a fresh one over the current payload.
    pub fn resign(&self, metadata: &mut Metadata) {
        let keyid = self.keyid();
        metadata.signatures_mut().retain(|sig| sig.keyid != keyid);
        self.sign(metadata);
    }
}

/// The online key for snapshot and timestamp, resolvable through `LOCAL_TESTING_KEY`.
pub fn online_key() -> Key {
    let keypair = Ed25519KeyPair::from_seed_unchecked(&ONLINE_SEED).unwrap();
    Key {
        keytype: "ed25519".to_string(),
        scheme: SCHEME_ED25519.to_string(),
        keyval: KeyVal {
            public: hex::encode(keypair.public_key().as_ref()),
            _extra: BTreeMap::new(),
        },
        online_uri: Some("gcpkms:projects/playground/locations/global/keys/online".to_string()),
        keyowner: None,
        _extra: BTreeMap::new(),
    }
}

fn role_keys(keyids: Vec<String>, threshold: u64, expiry: u32, signing: u32) -> RoleKeys {
    RoleKeys {
        keyids,
        threshold: nz(threshold),
        expiry_period: Some(expiry),
        signing_period: Some(signing),
        _extra: BTreeMap::new(),
    }
}

/// A v1 root delegating every top-level role: `user` holds root and targets with threshold 1,
/// the online key holds snapshot (10/4 day periods) and timestamp (2/1 day periods).
pub fn base_root(now: DateTime<Utc>, user: &Signer) -> Root {
    let online = online_key();
    let online_id = online.key_id().unwrap();
    let mut keys = BTreeMap::new();
    keys.insert(user.keyid(), user.key());
    keys.insert(online_id.clone(), online);

    let mut roles = BTreeMap::new();
    roles.insert(RoleType::Root, role_keys(vec![user.keyid()], 1, 365, 60));
    roles.insert(RoleType::Targets, role_keys(vec![user.keyid()], 1, 365, 60));
    roles.insert(RoleType::Snapshot, role_keys(vec![online_id.clone()], 1, 10, 4));
    roles.insert(RoleType::Timestamp, role_keys(vec![online_id], 1, 2, 1));

    Root {
        spec_version: playground::SPEC_VERSION.to_string(),
        consistent_snapshot: true,
        version: nz(1),
        expires: now + days(365),
        keys,
        roles,
        invites: BTreeMap::new(),
        _extra: BTreeMap::new(),
    }
}

pub fn base_targets(now: DateTime<Utc>) -> Targets {
    Targets::new(playground::SPEC_VERSION.to_string(), nz(1), now + days(365))
}

/// A committed baseline: root and targets at v1, signed by `user`.
pub fn committed_repo(now: DateTime<Utc>, user: &Signer) -> RoleSet {
    let mut set = RoleSet::default();
    let mut root = Metadata::Root(Signed {
        signed: base_root(now, user),
        signatures: Vec::new(),
    });
    user.sign(&mut root);
    set.insert(RoleName::Root, root);

    let mut targets = Metadata::Targets(Signed {
        signed: base_targets(now),
        signatures: Vec::new(),
    });
    user.sign(&mut targets);
    set.insert(RoleName::Targets, targets);
    set
}

/// Writes every role of `set` into a working tree under `dir`.
pub async fn write_repo(dir: &std::path::Path, set: &RoleSet) -> WorkingTree {
    let tree = WorkingTree::create(dir).unwrap();
    for (name, metadata) in &set.roles {
        tree.write_role(name, metadata, WriteContext::PartialEvent)
            .await
            .unwrap();
    }
    tree
}
