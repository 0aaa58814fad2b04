// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The repository surface: a working tree holding `metadata/` and `targets/`, and the
//! `RoleSet` role graph loaded from it (or from a committed ref through the git surface).
//!
//! The working tree exclusively owns the persisted role files. A `RoleSet` is borrowed by the
//! engines for the duration of one operation and discarded; nothing here holds long-lived
//! shared mutable state.

use crate::error::{self, Error, Result};
use crate::git::GitSurface;
use crate::schema::{
    self, DelegationRule, Metadata, RoleName, RoleType, Root, SignatureVerification, Signed,
    Snapshot, Target, Targets, Timestamp,
};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::io::Write;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Declares whether a write happens to committed state or inside an open signing event.
#[derive(Debug, Clone, Copy)]
pub enum WriteContext<'a> {
    /// Writing committed state: the role must meet its delegating threshold. The role set is
    /// used to resolve the delegating rule.
    Committed(&'a RoleSet),
    /// Writing inside an open signing event, where thresholds may not be met yet.
    PartialEvent,
}

/// A checked-out repository: `metadata/` role files plus the `targets/` file tree.
#[derive(Debug, Clone)]
pub struct WorkingTree {
    dir: PathBuf,
}

impl WorkingTree {
    /// Opens an existing working tree. The `metadata/` directory must exist.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure!(
            dir.join("metadata").is_dir(),
            error::InvariantViolationSnafu {
                role: "repository",
                reason: format!("{} has no metadata directory", dir.display()),
            }
        );
        Ok(WorkingTree { dir })
    }

    /// Creates the `metadata/` and `targets/` directories and opens the tree.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        for sub in ["metadata", "targets"] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).context(error::DirCreateSnafu { path })?;
        }
        WorkingTree::open(dir)
    }

    /// The root of the working tree.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The directory holding role files.
    pub fn metadata_dir(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    /// The directory holding target files.
    pub fn targets_dir(&self) -> PathBuf {
        self.dir.join("targets")
    }

    /// The path of the file backing `name`.
    pub fn role_path(&self, name: &RoleName) -> PathBuf {
        self.metadata_dir().join(name.file_name())
    }

    /// The roles currently present in the tree.
    pub async fn list_roles(&self) -> Result<Vec<RoleName>> {
        let metadata_dir = self.metadata_dir();
        let mut entries = tokio::fs::read_dir(&metadata_dir)
            .await
            .context(error::FileReadSnafu {
                path: &metadata_dir,
            })?;
        let mut roles = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(error::FileReadSnafu {
            path: &metadata_dir,
        })? {
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(RoleName::from_file_name) {
                roles.push(name);
            }
        }
        roles.sort();
        Ok(roles)
    }

    /// Reads and parses the metadata for `name`.
    pub async fn read_role(&self, name: &RoleName) -> Result<Metadata> {
        let bytes = self.read_role_bytes(name).await?;
        Metadata::from_json(name, &bytes).context(error::SchemaSnafu {
            role: name.to_string(),
        })
    }

    /// Reads the raw serialized bytes for `name`. These bytes are what snapshot and timestamp
    /// digests must cover, so callers hashing metadata read them instead of re-serializing.
    pub async fn read_role_bytes(&self, name: &RoleName) -> Result<Vec<u8>> {
        let path = self.role_path(name);
        tokio::fs::read(&path)
            .await
            .context(error::FileReadSnafu { path })
    }

    /// Serializes and atomically persists `metadata` as `name`.
    ///
    /// In the `Committed` context the role is refused unless its signatures meet the
    /// delegating threshold; an open signing event declares `PartialEvent` instead.
    pub async fn write_role(
        &self,
        name: &RoleName,
        metadata: &Metadata,
        ctx: WriteContext<'_>,
    ) -> Result<()> {
        if let WriteContext::Committed(set) = ctx {
            let rule = set.delegation_for(name)?;
            let satisfied = rule.is_satisfied(metadata).context(error::SchemaSnafu {
                role: name.to_string(),
            })?;
            ensure!(
                satisfied,
                error::InvariantViolationSnafu {
                    role: name.to_string(),
                    reason: format!(
                        "signatures do not meet threshold {} outside a signing event",
                        rule.threshold
                    ),
                }
            );
        }
        let bytes = metadata.to_pretty_json().context(error::SchemaSnafu {
            role: name.to_string(),
        })?;
        self.write_role_bytes(name, &bytes)
    }

    /// Atomically persists pre-serialized role bytes.
    pub fn write_role_bytes(&self, name: &RoleName, bytes: &[u8]) -> Result<()> {
        let path = self.role_path(name);
        persist_atomic(&path, bytes)?;
        debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Removes the file backing `name`, if present.
    pub async fn remove_role(&self, name: &RoleName) -> Result<()> {
        let path = self.role_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(error::FileWriteSnafu { path }),
        }
    }
}

/// Atomic file write: write to a temporary file in the destination directory, then persist.
pub(crate) fn persist_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().context(error::MissingSnafu {
        field: format!("parent directory of {}", path.display()),
    })?;
    std::fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
    let mut file =
        NamedTempFile::new_in(parent).context(error::FileTempCreateSnafu { path: parent })?;
    file.write_all(bytes)
        .context(error::FileWriteSnafu { path })?;
    file.persist(path).context(error::FilePersistSnafu { path })?;
    Ok(())
}

/// The in-memory role graph of one repository state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleSet {
    /// All roles, keyed by name.
    pub roles: BTreeMap<RoleName, Metadata>,
}

impl RoleSet {
    /// Loads every role file in a working tree.
    pub async fn load(tree: &WorkingTree) -> Result<RoleSet> {
        let mut roles = BTreeMap::new();
        for name in tree.list_roles().await? {
            let metadata = tree.read_role(&name).await?;
            roles.insert(name, metadata);
        }
        Ok(RoleSet { roles })
    }

    /// Loads every role file of `reference` through the git surface. An unborn reference
    /// yields an empty set (the baseline of a fresh repository).
    pub async fn load_ref(git: &dyn GitSurface, reference: &str) -> Result<RoleSet> {
        let mut roles = BTreeMap::new();
        for path in git.list_files(reference, "metadata").await? {
            let file_name = path.rsplit('/').next().unwrap_or(&path);
            let Some(name) = RoleName::from_file_name(file_name) else {
                continue;
            };
            let bytes = git
                .read_file(reference, &path)
                .await?
                .context(error::MissingSnafu {
                    field: format!("{path} in {reference}"),
                })?;
            let metadata = Metadata::from_json(&name, &bytes).context(error::SchemaSnafu {
                role: name.to_string(),
            })?;
            roles.insert(name, metadata);
        }
        Ok(RoleSet { roles })
    }

    /// Whether this set has no roles at all.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The metadata for `name`, if present.
    pub fn get(&self, name: &RoleName) -> Option<&Metadata> {
        self.roles.get(name)
    }

    /// Mutable access to the metadata for `name`.
    pub fn get_mut(&mut self, name: &RoleName) -> Option<&mut Metadata> {
        self.roles.get_mut(name)
    }

    /// Inserts or replaces a role.
    pub fn insert(&mut self, name: RoleName, metadata: Metadata) {
        self.roles.insert(name, metadata);
    }

    /// The signed root role. Every non-empty repository state has one.
    pub fn root(&self) -> Result<&Signed<Root>> {
        self.roles
            .get(&RoleName::Root)
            .and_then(Metadata::as_root)
            .ok_or_else(|| Error::Schema {
                role: "root".to_string(),
                source: schema::Error::RoleNotFound {
                    name: "root".to_string(),
                },
            })
    }

    /// The signed top-level targets role, if present.
    pub fn targets(&self) -> Option<&Signed<Targets>> {
        self.roles
            .get(&RoleName::Targets)
            .and_then(Metadata::as_targets)
    }

    /// The signed snapshot role, if present.
    pub fn snapshot(&self) -> Option<&Signed<Snapshot>> {
        self.roles
            .get(&RoleName::Snapshot)
            .and_then(Metadata::as_snapshot)
    }

    /// The signed timestamp role, if present.
    pub fn timestamp(&self) -> Option<&Signed<Timestamp>> {
        self.roles
            .get(&RoleName::Timestamp)
            .and_then(Metadata::as_timestamp)
    }

    /// The delegated targets roles in this set, in name order.
    pub fn delegated_roles(&self) -> impl Iterator<Item = (&str, &Signed<Targets>)> {
        self.roles.iter().filter_map(|(name, metadata)| match name {
            RoleName::Delegated(delegated) => metadata
                .as_targets()
                .map(|targets| (delegated.as_str(), targets)),
            _ => None,
        })
    }

    /// Resolves the delegation rule governing `name` within this set: root for top-level
    /// roles, the top-level targets role for delegated roles.
    pub fn delegation_for(&self, name: &RoleName) -> Result<DelegationRule> {
        let rule = match name {
            RoleName::Root => self.root()?.signed.delegation(RoleType::Root),
            RoleName::Timestamp => self.root()?.signed.delegation(RoleType::Timestamp),
            RoleName::Snapshot => self.root()?.signed.delegation(RoleType::Snapshot),
            RoleName::Targets => self.root()?.signed.delegation(RoleType::Targets),
            RoleName::Delegated(delegated) => self
                .targets()
                .ok_or_else(|| schema::Error::RoleNotFound {
                    name: "targets".to_string(),
                })
                .and_then(|targets| targets.signed.delegation(delegated)),
        };
        rule.context(error::SchemaSnafu {
            role: name.to_string(),
        })
    }

    /// Verifies the signatures of `name` against its delegating rule in this set.
    pub fn verify_role(&self, name: &RoleName) -> Result<SignatureVerification> {
        let metadata = self.get(name).context(error::MissingSnafu {
            field: format!("role {name}"),
        })?;
        let rule = self.delegation_for(name)?;
        let canonical = metadata.canonical_form().context(error::SchemaSnafu {
            role: name.to_string(),
        })?;
        rule.verify(&canonical, metadata.signatures())
            .context(error::SchemaSnafu {
                role: name.to_string(),
            })
    }

    /// Whether `name` is inside its signing period: `now + signing_period >= expires`.
    /// Roles without a configured signing period never need a bump.
    pub fn needs_bump(&self, name: &RoleName, now: DateTime<Utc>) -> Result<bool> {
        let metadata = self.get(name).context(error::MissingSnafu {
            field: format!("role {name}"),
        })?;
        let rule = self.delegation_for(name)?;
        Ok(match rule.signing_period {
            Some(days) => now + Duration::days(i64::from(days)) >= metadata.expires(),
            None => false,
        })
    }

    /// Bumps `name`: version + 1, expiry moved to `now + expiry_period`, signatures cleared,
    /// all other signed content preserved. Returns the new version.
    pub fn bump_role(&mut self, name: &RoleName, now: DateTime<Utc>) -> Result<NonZeroU64> {
        let rule = self.delegation_for(name)?;
        let days = rule.expiry_period.context(error::MissingSnafu {
            field: format!("x-playground-expiry-period for role {name}"),
        })?;
        let metadata = self.get_mut(name).context(error::MissingSnafu {
            field: format!("role {name}"),
        })?;
        let version = metadata.bump(now + Duration::days(i64::from(days)));
        debug!("bumped {name} to version {version}");
        Ok(version)
    }
}

/// The target files of one repository state: path (relative to `targets/`) to hash and length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetFiles {
    /// The scanned files.
    pub files: BTreeMap<String, Target>,
}

impl TargetFiles {
    /// Hashes every file under the working tree's `targets/` directory.
    pub fn scan(tree: &WorkingTree) -> Result<Self> {
        let targets_dir = tree.targets_dir();
        let mut files = BTreeMap::new();
        if !targets_dir.is_dir() {
            return Ok(TargetFiles { files });
        }
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
                .unwrap_or(entry.path())
                .to_str()
                .context(error::MissingSnafu {
                    field: format!("UTF-8 path for {}", entry.path().display()),
                })?
                .replace(std::path::MAIN_SEPARATOR, "/");
            let target = Target::from_path(entry.path()).context(error::SchemaSnafu {
                role: "targets".to_string(),
            })?;
            files.insert(relative, target);
        }
        Ok(TargetFiles { files })
    }

    /// Hashes every file under `targets/` in `reference` through the git surface.
    pub async fn load_ref(git: &dyn GitSurface, reference: &str) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in git.list_files(reference, "targets").await? {
            let bytes = git
                .read_file(reference, &path)
                .await?
                .context(error::MissingSnafu {
                    field: format!("{path} in {reference}"),
                })?;
            let relative = path.strip_prefix("targets/").unwrap_or(&path).to_string();
            files.insert(relative, Target::from_bytes(&bytes));
        }
        Ok(TargetFiles { files })
    }

    /// Whether no target files exist.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Signature;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn timestamp_metadata(version: u64, expires: DateTime<Utc>) -> Metadata {
        Metadata::Timestamp(Signed {
            signed: Timestamp::new(
                crate::SPEC_VERSION.to_string(),
                NonZeroU64::new(version).unwrap(),
                expires,
            ),
            signatures: vec![Signature {
                keyid: "aa".to_string(),
                sig: "bb".to_string(),
            }],
        })
    }

    #[tokio::test]
    async fn working_tree_round_trip() {
        let dir = TempDir::new().unwrap();
        let tree = WorkingTree::create(dir.path()).unwrap();
        let name = RoleName::Timestamp;
        let metadata = timestamp_metadata(1, fixed_now());

        tree.write_role(&name, &metadata, WriteContext::PartialEvent)
            .await
            .unwrap();
        let read_back = tree.read_role(&name).await.unwrap();
        assert_eq!(read_back, metadata);
        assert_eq!(tree.list_roles().await.unwrap(), vec![name]);
    }

    #[tokio::test]
    async fn open_refuses_a_bare_directory() {
        let dir = TempDir::new().unwrap();
        assert!(WorkingTree::open(dir.path()).is_err());
    }

    #[tokio::test]
    async fn target_files_scan_hashes_nested_paths() {
        let dir = TempDir::new().unwrap();
        let tree = WorkingTree::create(dir.path()).unwrap();
        std::fs::create_dir_all(tree.targets_dir().join("nested")).unwrap();
        std::fs::write(tree.targets_dir().join("file1.txt"), b"hello").unwrap();
        std::fs::write(tree.targets_dir().join("nested/file2.txt"), b"world").unwrap();

        let files = TargetFiles::scan(&tree).unwrap();
        assert_eq!(
            files.files.keys().collect::<Vec<_>>(),
            vec!["file1.txt", "nested/file2.txt"]
        );
        assert_eq!(files.files["file1.txt"].length, 5);
        assert_eq!(
            files.files["file1.txt"].hashes.sha256,
            hex::encode(ring::digest::digest(&ring::digest::SHA256, b"hello"))
        );
    }
}
