// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The online-signing engine: produces fresh snapshot and timestamp versions, expiry-driven
//! version bumps, and the publishable tree.
//!
//! Every entry point reads the clock once, never partially publishes, and leaves the working
//! tree untouched on cancellation. Re-running with unchanged inputs is a no-op.

use crate::clock::Clock;
use crate::error::{self, Result};
use crate::git::GitSurface;
use crate::key_source::SignerRegistry;
use crate::repo::{persist_atomic, RoleSet, WorkingTree};
use crate::schema::{
    Hashes, Metadata, RoleName, Signature, Signed, Snapshot, SnapshotMeta, Timestamp,
    TimestampMeta, VerifyOutcome,
};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use ring::digest::{digest, SHA256};
use ring::rand::SystemRandom;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// What one snapshot or bump pass produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// The new snapshot version, when one was produced.
    pub snapshot: Option<NonZeroU64>,
    /// The new timestamp version, when one was produced.
    pub timestamp: Option<NonZeroU64>,
}

impl SnapshotOutcome {
    /// Whether the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.snapshot.is_none() && self.timestamp.is_none()
    }
}

/// The online-signing engine. Holds the signer registry and the injected clock for the
/// duration of one CI job.
#[derive(Debug)]
pub struct OnlineSigner<'a> {
    registry: &'a SignerRegistry,
    clock: &'a dyn Clock,
    cancel: CancellationToken,
}

impl<'a> OnlineSigner<'a> {
    /// Creates an engine that cannot be cancelled externally.
    pub fn new(registry: &'a SignerRegistry, clock: &'a dyn Clock) -> Self {
        OnlineSigner {
            registry,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an engine honoring `cancel`: once cancelled, no further file is written.
    pub fn with_cancel(
        registry: &'a SignerRegistry,
        clock: &'a dyn Clock,
        cancel: CancellationToken,
    ) -> Self {
        OnlineSigner {
            registry,
            clock,
            cancel,
        }
    }

    /// Re-derives snapshot (when the recorded targets versions differ from the working tree)
    /// and timestamp (when snapshot changed or its own signing period arrived).
    pub async fn snapshot(&self, tree: &WorkingTree) -> Result<SnapshotOutcome> {
        self.check_cancelled()?;
        let now = self.clock.now();
        let set = RoleSet::load(tree).await?;
        self.sync_online_roles(tree, &set, now, false).await
    }

    /// Expiry-driven bumps of the online roles, folded into a snapshot pass so the timestamp
    /// always covers the bytes that end up on disk.
    pub async fn bump_online(&self, tree: &WorkingTree) -> Result<SnapshotOutcome> {
        self.check_cancelled()?;
        let now = self.clock.now();
        let set = RoleSet::load(tree).await?;
        let force = set.get(&RoleName::Snapshot).is_some()
            && set.needs_bump(&RoleName::Snapshot, now)?;
        self.sync_online_roles(tree, &set, now, force).await
    }

    /// For each offline role inside its signing period, opens an event branch
    /// `sign/<role>-bump-<version>` holding a version-only bump for its owners to sign.
    /// Returns the opened branch names.
    pub async fn bump_offline(
        &self,
        tree: &WorkingTree,
        git: &dyn GitSurface,
    ) -> Result<Vec<String>> {
        self.check_cancelled()?;
        let now = self.clock.now();
        let set = RoleSet::load(tree).await?;
        let mut branches = Vec::new();
        for name in set.roles.keys().cloned().collect::<Vec<_>>() {
            if name.is_online() || !set.needs_bump(&name, now)? {
                continue;
            }
            let mut branch_set = set.clone();
            let version = branch_set.bump_role(&name, now)?;
            let metadata = branch_set.get(&name).context(error::MissingSnafu {
                field: format!("role {name}"),
            })?;
            let bytes = metadata
                .to_pretty_json()
                .map_err(|source| error::Error::Schema {
                    role: name.to_string(),
                    source,
                })?;
            let branch = format!("sign/{name}-bump-{version}");
            git.commit_branch(
                &branch,
                "HEAD",
                &[(format!("metadata/{}", name.file_name()), bytes)],
                &format!("Bump {name} to version {version}"),
            )
            .await?;
            info!("opened signing event {branch}");
            branches.push(branch);
        }
        Ok(branches)
    }

    /// Emits the publishable tree: version-prefixed metadata for the offline roles,
    /// unversioned snapshot and timestamp, and a byte-identical mirror of `targets/`.
    pub async fn publish(&self, tree: &WorkingTree, outdir: &Path) -> Result<()> {
        self.check_cancelled()?;
        let now = self.clock.now();
        let set = RoleSet::load(tree).await?;
        let timestamp = set.timestamp().context(error::MissingSnafu {
            field: "timestamp role",
        })?;
        ensure!(
            timestamp.signed.expires > now,
            error::ExpiryPolicySnafu {
                role: "timestamp",
                expires: timestamp.signed.expires,
                detail: "refusing to publish an expired timestamp",
            }
        );

        for (name, metadata) in &set.roles {
            let bytes = tree.read_role_bytes(name).await?;
            let file_name = if name.is_online() {
                name.file_name()
            } else {
                format!("{}.{}", metadata.version(), name.file_name())
            };
            persist_atomic(&outdir.join("metadata").join(file_name), &bytes)?;
        }

        let targets_dir = tree.targets_dir();
        if targets_dir.is_dir() {
            for entry in WalkDir::new(&targets_dir).follow_links(true) {
                let entry = entry.context(error::WalkDirSnafu {
                    directory: &targets_dir,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&targets_dir)
                    .unwrap_or(entry.path());
                let bytes = std::fs::read(entry.path()).context(error::FileReadSnafu {
                    path: entry.path(),
                })?;
                persist_atomic(&outdir.join("targets").join(relative), &bytes)?;
            }
        }
        info!("published {} roles to {}", set.roles.len(), outdir.display());
        Ok(())
    }

    /// The single reconciliation pass behind `snapshot` and `bump_online`.
    async fn sync_online_roles(
        &self,
        tree: &WorkingTree,
        set: &RoleSet,
        now: DateTime<Utc>,
        force_snapshot: bool,
    ) -> Result<SnapshotOutcome> {
        let mut outcome = SnapshotOutcome::default();
        if set.get(&RoleName::Targets).is_none() {
            // Nothing to snapshot until the repository has a targets role.
            return Ok(outcome);
        }

        // Targets metadata is read once, up front; a concurrent edit of the tree after this
        // point does not get re-read.
        let desired_meta = self.desired_snapshot_meta(tree, set).await?;
        let previous = set.snapshot();
        if let Some(previous) = previous {
            for (path, meta) in &previous.signed.meta {
                if let Some(desired) = desired_meta.get(path) {
                    ensure!(
                        desired.version >= meta.version,
                        error::VersionRegressionSnafu {
                            role: path.trim_end_matches(".json"),
                            current: meta.version.get(),
                            proposed: desired.version.get(),
                        }
                    );
                }
            }
        }

        let meta_changed = previous
            .map(|snapshot| snapshot.signed.meta != desired_meta)
            .unwrap_or(true);
        let (snapshot_bytes, snapshot_metadata) = if meta_changed || force_snapshot {
            let rule = set.delegation_for(&RoleName::Snapshot)?;
            let expiry_period = rule.expiry_period.context(error::MissingSnafu {
                field: "x-playground-expiry-period for role snapshot",
            })?;
            let version = previous
                .map(|snapshot| snapshot.signed.version)
                .unwrap_or(NonZeroU64::MIN)
                .checked_add(u64::from(previous.is_some()))
                .unwrap_or(NonZeroU64::MAX);
            let mut payload = Snapshot::new(
                crate::SPEC_VERSION.to_string(),
                version,
                now + Duration::days(i64::from(expiry_period)),
            );
            payload.meta = desired_meta;
            if let Some(previous) = previous {
                payload._extra = previous.signed._extra.clone();
            }
            let mut metadata = Metadata::Snapshot(Signed {
                signed: payload,
                signatures: Vec::new(),
            });
            self.sign_online(&RoleName::Snapshot, set, &mut metadata).await?;
            let bytes = metadata
                .to_pretty_json()
                .map_err(|source| error::Error::Schema {
                    role: "snapshot".to_string(),
                    source,
                })?;
            outcome.snapshot = Some(version);
            (bytes, Some(metadata))
        } else {
            (tree.read_role_bytes(&RoleName::Snapshot).await?, None)
        };

        // The timestamp covers the exact snapshot bytes that will be on disk.
        let desired_ts_meta = TimestampMeta {
            length: snapshot_bytes.len() as u64,
            hashes: Hashes {
                sha256: hex::encode(digest(&SHA256, &snapshot_bytes)),
                _extra: BTreeMap::new(),
            },
            version: outcome
                .snapshot
                .or_else(|| previous.map(|snapshot| snapshot.signed.version))
                .unwrap_or(NonZeroU64::MIN),
            _extra: BTreeMap::new(),
        };
        let previous_ts = set.timestamp();
        let ts_stale = previous_ts
            .map(|timestamp| {
                timestamp.signed.meta.get("snapshot.json") != Some(&desired_ts_meta)
            })
            .unwrap_or(true);
        let ts_needs_bump = previous_ts.is_some() && set.needs_bump(&RoleName::Timestamp, now)?;
        let timestamp_metadata = if ts_stale || ts_needs_bump {
            let rule = set.delegation_for(&RoleName::Timestamp)?;
            let expiry_period = rule.expiry_period.context(error::MissingSnafu {
                field: "x-playground-expiry-period for role timestamp",
            })?;
            let version = previous_ts
                .map(|timestamp| timestamp.signed.version)
                .unwrap_or(NonZeroU64::MIN)
                .checked_add(u64::from(previous_ts.is_some()))
                .unwrap_or(NonZeroU64::MAX);
            let mut payload = Timestamp::new(
                crate::SPEC_VERSION.to_string(),
                version,
                now + Duration::days(i64::from(expiry_period)),
            );
            payload
                .meta
                .insert("snapshot.json".to_string(), desired_ts_meta);
            if let Some(previous_ts) = previous_ts {
                payload._extra = previous_ts.signed._extra.clone();
            }
            let mut metadata = Metadata::Timestamp(Signed {
                signed: payload,
                signatures: Vec::new(),
            });
            self.sign_online(&RoleName::Timestamp, set, &mut metadata).await?;
            outcome.timestamp = Some(version);
            Some(metadata)
        } else {
            None
        };

        if outcome.is_noop() {
            debug!("snapshot pass is a no-op");
            return Ok(outcome);
        }

        // All staged, then written together; cancellation before this point leaves the tree
        // untouched.
        self.check_cancelled()?;
        if snapshot_metadata.is_some() {
            tree.write_role_bytes(&RoleName::Snapshot, &snapshot_bytes)?;
        }
        if let Some(timestamp_metadata) = timestamp_metadata {
            let bytes = timestamp_metadata
                .to_pretty_json()
                .map_err(|source| error::Error::Schema {
                    role: "timestamp".to_string(),
                    source,
                })?;
            tree.write_role_bytes(&RoleName::Timestamp, &bytes)?;
        }
        info!(
            "online signing produced snapshot {:?}, timestamp {:?}",
            outcome.snapshot.map(NonZeroU64::get),
            outcome.timestamp.map(NonZeroU64::get)
        );
        Ok(outcome)
    }

    /// The snapshot meta map matching the serialized targets metadata currently on disk.
    async fn desired_snapshot_meta(
        &self,
        tree: &WorkingTree,
        set: &RoleSet,
    ) -> Result<BTreeMap<String, SnapshotMeta>> {
        let mut meta = BTreeMap::new();
        for (name, metadata) in &set.roles {
            if !matches!(name, RoleName::Targets | RoleName::Delegated(_)) {
                continue;
            }
            let bytes = tree.read_role_bytes(name).await?;
            meta.insert(
                name.file_name(),
                SnapshotMeta {
                    length: Some(bytes.len() as u64),
                    hashes: Some(Hashes {
                        sha256: hex::encode(digest(&SHA256, &bytes)),
                        _extra: BTreeMap::new(),
                    }),
                    version: metadata.version(),
                    _extra: BTreeMap::new(),
                },
            );
        }
        Ok(meta)
    }

    /// Signs `metadata` with every online key its delegation rule lists, replacing the
    /// signature set, and verifies the result meets the threshold.
    async fn sign_online(
        &self,
        name: &RoleName,
        set: &RoleSet,
        metadata: &mut Metadata,
    ) -> Result<()> {
        let rule = set.delegation_for(name)?;
        let canonical = metadata
            .canonical_form()
            .map_err(|source| error::Error::Schema {
                role: name.to_string(),
                source,
            })?;
        let rng = SystemRandom::new();
        let mut signatures = Vec::new();
        for (keyid, key) in &rule.keys {
            let uri = key.online_uri.as_deref().context(error::InvariantViolationSnafu {
                role: name.to_string(),
                reason: format!("key {keyid} has no online URI"),
            })?;
            let source = self.registry.resolve(uri)?;
            let signer = source
                .as_sign()
                .await
                .map_err(|e| error::Error::SignerUnavailable {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                })?;
            let sig = signer
                .sign(&canonical, &rng)
                .await
                .map_err(|source| error::Error::Sign { source })?;
            let verified = key
                .verify(&canonical, &sig)
                .map_err(|source| error::Error::Schema {
                    role: name.to_string(),
                    source,
                })?;
            ensure!(
                verified,
                error::SignatureRejectedSnafu {
                    role: name.to_string(),
                    keyid: keyid.as_str(),
                }
            );
            signatures.push(Signature {
                keyid: keyid.clone(),
                sig: hex::encode(sig),
            });
        }
        *metadata.signatures_mut() = signatures;

        let verification = rule
            .verify(&canonical, metadata.signatures())
            .map_err(|source| error::Error::Schema {
                role: name.to_string(),
                source,
            })?;
        ensure!(
            verification.outcome() == VerifyOutcome::Ok,
            error::InvariantViolationSnafu {
                role: name.to_string(),
                reason: format!(
                    "online signing produced {} of {} required signatures",
                    verification.valid.len(),
                    rule.threshold
                ),
            }
        );
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        ensure!(!self.cancel.is_cancelled(), error::CancelledSnafu);
        Ok(())
    }
}
