// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::used_underscore_binding)]

//! Provides the schema objects for playground metadata: the TUF role payloads plus the
//! `x-playground-*` custom fields that drive signing events and online signing.

mod de;
pub mod error;
pub mod key;

pub use crate::schema::error::{Error, Result};

use crate::schema::key::{Key, SCHEME_ECDSA_NISTP256, SCHEME_ED25519, SCHEME_RSASSA_PSS_SHA256};
use chrono::{DateTime, Utc};
use globset::Glob;
use olpc_cjson::CanonicalFormatter;
use ring::digest::{digest, Context, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;
use std::str::FromStr;

/// The type of a top-level metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys for all other top-level roles, including
    /// the root role itself.
    Root,
    /// The snapshot role lists the version of every targets metadata file on the repository.
    Snapshot,
    /// The targets role lists which target files are trusted, and may delegate path namespaces
    /// to further targets roles.
    Targets,
    /// The timestamp role points at the current snapshot and is re-signed frequently.
    Timestamp,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// The name of a metadata role: a top-level role or a delegated targets role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoleName {
    /// The root role.
    Root,
    /// The timestamp role.
    Timestamp,
    /// The snapshot role.
    Snapshot,
    /// The top-level targets role.
    Targets,
    /// A delegated targets role.
    Delegated(String),
}

impl RoleName {
    /// The file this role is stored as inside `metadata/`.
    pub fn file_name(&self) -> String {
        format!("{self}.json")
    }

    /// Parses a `metadata/` file name. Returns `None` for files that are not role metadata
    /// (including version-prefixed published files).
    pub fn from_file_name(file_name: &str) -> Option<RoleName> {
        let stem = file_name.strip_suffix(".json")?;
        if stem.is_empty() || stem.contains('.') {
            return None;
        }
        Some(stem.parse().unwrap_or_else(|_| RoleName::Delegated(stem.to_string())))
    }

    /// Whether this role is signed by the online-signing engine.
    pub fn is_online(&self) -> bool {
        matches!(self, RoleName::Timestamp | RoleName::Snapshot)
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Root => f.write_str("root"),
            RoleName::Timestamp => f.write_str("timestamp"),
            RoleName::Snapshot => f.write_str("snapshot"),
            RoleName::Targets => f.write_str("targets"),
            RoleName::Delegated(name) => f.write_str(name),
        }
    }
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "root" => RoleName::Root,
            "timestamp" => RoleName::Timestamp,
            "snapshot" => RoleName::Snapshot,
            "targets" => RoleName::Targets,
            other => RoleName::Delegated(other.to_string()),
        })
    }
}

impl From<RoleType> for RoleName {
    fn from(t: RoleType) -> Self {
        match t {
            RoleType::Root => RoleName::Root,
            RoleType::Timestamp => RoleName::Timestamp,
            RoleType::Snapshot => RoleName::Snapshot,
            RoleType::Targets => RoleName::Targets,
        }
    }
}

/// Common trait implemented by all role payloads.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// When this metadata expires and is no longer trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// The version of this metadata. Strictly monotonic per role across commits on main.
    fn version(&self) -> NonZeroU64;

    /// A deterministic JSON serialization used when signing and verifying a role.
    /// [More info on canonical JSON](http://wiki.laptop.org/go/Canonical_JSON)
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The ID of the key that made this signature.
    pub keyid: String,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: String,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root role: indicates which keys are authorized for all top-level roles, including the
/// root role itself, together with the playground policy fields (signing periods, open
/// invites) that the signing-event engine reads.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version number of the TUF specification this metadata follows.
    pub spec_version: String,

    /// Whether the published tree uses version-prefixed metadata filenames. Always `true` for
    /// repositories this crate produces.
    pub consistent_snapshot: bool,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// All keys known to the root role, indexed by key ID. Key IDs are validated during
    /// deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: BTreeMap<String, Key>,

    /// The delegation rule for each top-level role.
    pub roles: BTreeMap<RoleType, RoleKeys>,

    /// Open invites: role name to the owner handles that have been asked to bind a key and
    /// sign, but have not yet done so.
    #[serde(
        rename = "x-playground-invites",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub invites: BTreeMap<String, Vec<String>>,

    /// Extra fields found during deserialization, preserved verbatim.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: BTreeMap<String, Value>,
}

/// The key IDs, threshold, and playground policy fields for one delegated role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs authorized for the role.
    pub keyids: Vec<String>,

    /// The number of distinct valid signatures required for the role.
    pub threshold: NonZeroU64,

    /// Days added to `now` when the role's expiry is bumped.
    #[serde(
        rename = "x-playground-expiry-period",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_period: Option<u32>,

    /// Days before expiry at which a bump (or a new signing event) is triggered.
    #[serde(
        rename = "x-playground-signing-period",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_period: Option<u32>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

impl Root {
    /// An iterator over the resolved keys for a given top-level role.
    pub fn keys_for(&self, role: RoleType) -> impl Iterator<Item = (&String, &Key)> {
        self.roles
            .get(&role)
            .map(|role_keys| role_keys.keyids.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|keyid| self.keys.get(keyid).map(|key| (keyid, key)))
    }

    /// Builds the delegation rule root imposes on `role`. Fails when a listed key ID does not
    /// resolve in the key map.
    pub fn delegation(&self, role: RoleType) -> Result<DelegationRule> {
        let role_keys = self.roles.get(&role).context(error::RoleNotFoundSnafu {
            name: role.to_string(),
        })?;
        let mut keys = BTreeMap::new();
        for keyid in &role_keys.keyids {
            let key = self.keys.get(keyid).context(error::KeyNotFoundSnafu {
                role: role.to_string(),
                keyid: keyid.as_str(),
            })?;
            keys.insert(keyid.clone(), key.clone());
        }
        Ok(DelegationRule {
            role: role.into(),
            keys,
            threshold: role_keys.threshold,
            expiry_period: role_keys.expiry_period,
            signing_period: role_keys.signing_period,
            invites: self
                .invites
                .get(&role.to_string())
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Adds `key` to the key map and to `role`'s key IDs, returning the key ID.
    pub fn add_role_key(&mut self, role: RoleType, key: Key) -> Result<String> {
        let keyid = key.key_id()?;
        let role_keys = self.roles.get_mut(&role).context(error::RoleNotFoundSnafu {
            name: role.to_string(),
        })?;
        if !role_keys.keyids.contains(&keyid) {
            role_keys.keyids.push(keyid.clone());
        }
        self.keys.entry(keyid.clone()).or_insert(key);
        Ok(keyid)
    }

    /// Removes `keyid` from `role`, dropping the key from the key map when no other role still
    /// references it.
    pub fn remove_role_key(&mut self, role: RoleType, keyid: &str) -> Result<()> {
        let role_keys = self.roles.get_mut(&role).context(error::RoleNotFoundSnafu {
            name: role.to_string(),
        })?;
        role_keys.keyids.retain(|id| id != keyid);
        let still_referenced = self
            .roles
            .values()
            .any(|role_keys| role_keys.keyids.iter().any(|id| id == keyid));
        if !still_referenced {
            self.keys.remove(keyid);
        }
        Ok(())
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot role: lists the version (and the hash and length of the serialized bytes) of
/// every targets metadata file on the repository.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version number of the TUF specification this metadata follows.
    pub spec_version: String,

    /// The version of this metadata.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// Metadata file name (e.g. `targets.json`) to its current version and digest.
    pub meta: BTreeMap<String, SnapshotMeta>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: BTreeMap<String, Value>,
}

/// Describes one metadata file in `snapshot.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The length in bytes of the metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Digests of the metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// The version of the metadata file.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

/// A digest dictionary for a metadata or target file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The hex-encoded SHA-256 digest.
    pub sha256: String,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Create a new `Snapshot` object.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Snapshot {
            spec_version,
            version,
            expires,
            meta: BTreeMap::new(),
            _extra: BTreeMap::new(),
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A targets role: the top-level `targets.json` or a delegated targets role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version number of the TUF specification this metadata follows.
    pub spec_version: String,

    /// The version of this metadata.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// Target path (relative to `targets/`) to the description of the target file.
    pub targets: BTreeMap<String, Target>,

    /// Delegations of target path namespaces to further roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Open invites for roles this metadata delegates to.
    #[serde(
        rename = "x-playground-invites",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub invites: BTreeMap<String, Vec<String>>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: BTreeMap<String, Value>,
}

/// Describes one target file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The length in bytes of the target file.
    pub length: u64,

    /// Digests of the target file.
    pub hashes: Hashes,

    /// Opaque application data describing the target.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

impl Target {
    /// Builds a `Target` from raw file contents.
    pub fn from_bytes(bytes: &[u8]) -> Target {
        Target {
            length: bytes.len() as u64,
            hashes: Hashes {
                sha256: hex::encode(digest(&SHA256, bytes)),
                _extra: BTreeMap::new(),
            },
            custom: BTreeMap::new(),
            _extra: BTreeMap::new(),
        }
    }

    /// Builds a `Target` by hashing the file at `path`.
    pub fn from_path<P>(path: P) -> Result<Target>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| Error::MalformedMetadata {
            role: "targets".to_string(),
            reason: format!("cannot open target {}: {e}", path.display()),
        })?;
        let mut context = Context::new(&SHA256);
        let mut buf = [0; 8 * 1024];
        let mut length = 0;
        loop {
            let n = file.read(&mut buf).map_err(|e| Error::MalformedMetadata {
                role: "targets".to_string(),
                reason: format!("cannot read target {}: {e}", path.display()),
            })?;
            if n == 0 {
                break;
            }
            context.update(&buf[..n]);
            length += n as u64;
        }
        Ok(Target {
            length,
            hashes: Hashes {
                sha256: hex::encode(context.finish()),
                _extra: BTreeMap::new(),
            },
            custom: BTreeMap::new(),
            _extra: BTreeMap::new(),
        })
    }
}

impl Targets {
    /// Create a new `Targets` object with an empty delegations table.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version,
            version,
            expires,
            targets: BTreeMap::new(),
            delegations: Some(Delegations::new()),
            invites: BTreeMap::new(),
            _extra: BTreeMap::new(),
        }
    }

    /// Add a target.
    pub fn add_target(&mut self, name: &str, target: Target) {
        self.targets.insert(name.to_string(), target);
    }

    /// Remove a target.
    pub fn remove_target(&mut self, name: &str) -> Option<Target> {
        self.targets.remove(name)
    }

    /// Returns the delegated role entry called `name`.
    pub fn delegated_role(&self, name: &str) -> Result<&DelegatedRole> {
        self.delegations
            .as_ref()
            .and_then(|delegations| delegations.role(name))
            .context(error::RoleNotFoundSnafu { name })
    }

    /// Returns the mutable delegated role entry called `name`.
    pub fn delegated_role_mut(&mut self, name: &str) -> Result<&mut DelegatedRole> {
        self.delegations
            .as_mut()
            .and_then(|delegations| delegations.roles.iter_mut().find(|role| role.name == name))
            .context(error::RoleNotFoundSnafu { name })
    }

    /// Builds the delegation rule this metadata imposes on the delegated role `name`.
    pub fn delegation(&self, name: &str) -> Result<DelegationRule> {
        let delegations = self
            .delegations
            .as_ref()
            .context(error::RoleNotFoundSnafu { name })?;
        let role = delegations.role(name).context(error::RoleNotFoundSnafu { name })?;
        let mut keys = BTreeMap::new();
        for keyid in &role.keyids {
            let key = delegations.keys.get(keyid).context(error::KeyNotFoundSnafu {
                role: name,
                keyid: keyid.as_str(),
            })?;
            keys.insert(keyid.clone(), key.clone());
        }
        Ok(DelegationRule {
            role: RoleName::Delegated(name.to_string()),
            keys,
            threshold: role.threshold,
            expiry_period: role.expiry_period,
            signing_period: role.signing_period,
            invites: self.invites.get(name).cloned().unwrap_or_default(),
        })
    }

    /// Adds `key` to the delegations key map and to the delegated role `name`, returning the
    /// key ID.
    pub fn add_delegated_key(&mut self, name: &str, key: Key) -> Result<String> {
        let keyid = key.key_id()?;
        let delegations = self
            .delegations
            .as_mut()
            .context(error::RoleNotFoundSnafu { name })?;
        let role = delegations
            .roles
            .iter_mut()
            .find(|role| role.name == name)
            .context(error::RoleNotFoundSnafu { name })?;
        if !role.keyids.contains(&keyid) {
            role.keyids.push(keyid.clone());
        }
        delegations.keys.entry(keyid.clone()).or_insert(key);
        Ok(keyid)
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Delegations of target path namespaces, found in a targets role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// The public keys used by delegated roles, indexed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: BTreeMap<String, Key>,

    /// The list of delegated roles.
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    /// Creates a new `Delegations` with no keys or roles.
    pub fn new() -> Self {
        Delegations {
            keys: BTreeMap::new(),
            roles: Vec::new(),
        }
    }

    /// Returns the delegated role entry called `role_name`, if present.
    pub fn role(&self, role_name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == role_name)
    }

    /// Whether any delegated role covers `target`.
    pub fn target_is_delegated(&self, target: &str) -> bool {
        self.roles.iter().any(|role| role.paths.matched_target(target))
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Delegations::new()
    }
}

/// One delegated targets role, as listed in the delegating role's metadata.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role, e.g. "projects".
    pub name: String,

    /// The key IDs authorized for this role.
    pub keyids: Vec<String>,

    /// The number of distinct valid signatures required for this role.
    pub threshold: NonZeroU64,

    /// The target paths governed by this role.
    #[serde(flatten)]
    pub paths: PathSet,

    /// Whether subsequent delegations should be considered for paths this role covers.
    pub terminating: bool,

    /// Days added to `now` when the role's expiry is bumped.
    #[serde(
        rename = "x-playground-expiry-period",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_period: Option<u32>,

    /// Days before expiry at which a bump is triggered.
    #[serde(
        rename = "x-playground-signing-period",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_period: Option<u32>,
}

/// Specifies the target paths that a delegated role controls.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum PathSet {
    /// Shell-style wildcard patterns the role is trusted to provide.
    #[serde(rename = "paths")]
    Paths(Vec<String>),

    /// SHA-256 path digest prefixes the role is trusted to provide.
    #[serde(rename = "path_hash_prefixes")]
    PathHashPrefixes(Vec<String>),
}

impl PathSet {
    /// Whether `target` is covered by this path set.
    pub fn matched_target(&self, target: &str) -> bool {
        match self {
            Self::Paths(paths) => paths.iter().any(|path| Self::matched_path(path, target)),
            Self::PathHashPrefixes(prefixes) => prefixes
                .iter()
                .any(|prefix| Self::matched_prefix(prefix, target)),
        }
    }

    fn matched_prefix(prefix: &str, target: &str) -> bool {
        hex::encode(digest(&SHA256, target.as_bytes())).starts_with(prefix)
    }

    fn matched_path(wildcard: &str, target: &str) -> bool {
        Glob::new(wildcard)
            .map(|glob| glob.compile_matcher().is_match(target))
            .unwrap_or(false)
    }

    /// Returns a Vec representation of the `PathSet`.
    pub fn vec(&self) -> &Vec<String> {
        match self {
            PathSet::Paths(x) | PathSet::PathHashPrefixes(x) => x,
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp role: points at the current snapshot and is re-signed frequently to bound the
/// window in which a client can be kept unaware of updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version number of the TUF specification this metadata follows.
    pub spec_version: String,

    /// The version of this metadata.
    pub version: NonZeroU64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// Must contain exactly one entry, for `snapshot.json`.
    pub meta: BTreeMap<String, TimestampMeta>,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: BTreeMap<String, Value>,
}

/// Describes the snapshot file in `timestamp.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimestampMeta {
    /// The length in bytes of `snapshot.json`.
    pub length: u64,

    /// Digests of `snapshot.json`.
    pub hashes: Hashes,

    /// The version of `snapshot.json`.
    pub version: NonZeroU64,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

impl Timestamp {
    /// Creates a new `Timestamp` object.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Timestamp {
            spec_version,
            version,
            expires,
            meta: BTreeMap::new(),
            _extra: BTreeMap::new(),
        }
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// One loaded metadata file of any role kind. Unifies top-level and delegated roles so the
/// delta analyzer and the engines can treat a repository as a uniform role graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    /// A signed root role.
    Root(Signed<Root>),
    /// A signed timestamp role.
    Timestamp(Signed<Timestamp>),
    /// A signed snapshot role.
    Snapshot(Signed<Snapshot>),
    /// A signed targets role (top-level or delegated).
    Targets(Signed<Targets>),
}

impl Metadata {
    /// Parses serialized metadata for the role `name`.
    pub fn from_json(name: &RoleName, bytes: &[u8]) -> Result<Metadata> {
        fn parse<T>(name: &RoleName, bytes: &[u8]) -> Result<Signed<T>>
        where
            for<'de> T: Deserialize<'de>,
        {
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedMetadata {
                role: name.to_string(),
                reason: e.to_string(),
            })
        }

        Ok(match name {
            RoleName::Root => Metadata::Root(parse(name, bytes)?),
            RoleName::Timestamp => Metadata::Timestamp(parse(name, bytes)?),
            RoleName::Snapshot => Metadata::Snapshot(parse(name, bytes)?),
            RoleName::Targets | RoleName::Delegated(_) => Metadata::Targets(parse(name, bytes)?),
        })
    }

    /// Serializes this metadata the way it is stored on disk: pretty-printed JSON with a
    /// trailing newline. These exact bytes are what snapshot and timestamp digests cover.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>> {
        fn pretty<T: Serialize>(signed: &Signed<T>) -> Result<Vec<u8>> {
            let mut buffer =
                serde_json::to_vec_pretty(signed).context(error::JsonSerializationSnafu {
                    what: "signed role",
                })?;
            buffer.push(b'\n');
            Ok(buffer)
        }

        match self {
            Metadata::Root(role) => pretty(role),
            Metadata::Timestamp(role) => pretty(role),
            Metadata::Snapshot(role) => pretty(role),
            Metadata::Targets(role) => pretty(role),
        }
    }

    /// The canonical form of the signed payload; the bytes that signatures cover.
    pub fn canonical_form(&self) -> Result<Vec<u8>> {
        match self {
            Metadata::Root(role) => role.signed.canonical_form(),
            Metadata::Timestamp(role) => role.signed.canonical_form(),
            Metadata::Snapshot(role) => role.signed.canonical_form(),
            Metadata::Targets(role) => role.signed.canonical_form(),
        }
    }

    /// The version of the signed payload.
    pub fn version(&self) -> NonZeroU64 {
        match self {
            Metadata::Root(role) => role.signed.version,
            Metadata::Timestamp(role) => role.signed.version,
            Metadata::Snapshot(role) => role.signed.version,
            Metadata::Targets(role) => role.signed.version,
        }
    }

    /// The expiry of the signed payload.
    pub fn expires(&self) -> DateTime<Utc> {
        match self {
            Metadata::Root(role) => role.signed.expires,
            Metadata::Timestamp(role) => role.signed.expires,
            Metadata::Snapshot(role) => role.signed.expires,
            Metadata::Targets(role) => role.signed.expires,
        }
    }

    /// The signatures attached to this metadata.
    pub fn signatures(&self) -> &[Signature] {
        match self {
            Metadata::Root(role) => &role.signatures,
            Metadata::Timestamp(role) => &role.signatures,
            Metadata::Snapshot(role) => &role.signatures,
            Metadata::Targets(role) => &role.signatures,
        }
    }

    /// Mutable access to the signatures attached to this metadata.
    pub fn signatures_mut(&mut self) -> &mut Vec<Signature> {
        match self {
            Metadata::Root(role) => &mut role.signatures,
            Metadata::Timestamp(role) => &mut role.signatures,
            Metadata::Snapshot(role) => &mut role.signatures,
            Metadata::Targets(role) => &mut role.signatures,
        }
    }

    /// Sets the version of the signed payload.
    pub fn set_version(&mut self, version: NonZeroU64) {
        match self {
            Metadata::Root(role) => role.signed.version = version,
            Metadata::Timestamp(role) => role.signed.version = version,
            Metadata::Snapshot(role) => role.signed.version = version,
            Metadata::Targets(role) => role.signed.version = version,
        }
    }

    /// Sets the expiry of the signed payload.
    pub fn set_expires(&mut self, expires: DateTime<Utc>) {
        match self {
            Metadata::Root(role) => role.signed.expires = expires,
            Metadata::Timestamp(role) => role.signed.expires = expires,
            Metadata::Snapshot(role) => role.signed.expires = expires,
            Metadata::Targets(role) => role.signed.expires = expires,
        }
    }

    /// Increments the version, moves the expiry to `expires`, and drops all signatures (the
    /// signed content changed, so they no longer verify). All other signed content is kept.
    pub fn bump(&mut self, expires: DateTime<Utc>) -> NonZeroU64 {
        fn bump_role(
            version: &mut NonZeroU64,
            role_expires: &mut DateTime<Utc>,
            expires: DateTime<Utc>,
        ) -> NonZeroU64 {
            *version = version.checked_add(1).unwrap_or(NonZeroU64::MAX);
            *role_expires = expires;
            *version
        }

        let new_version = match self {
            Metadata::Root(role) => {
                bump_role(&mut role.signed.version, &mut role.signed.expires, expires)
            }
            Metadata::Timestamp(role) => {
                bump_role(&mut role.signed.version, &mut role.signed.expires, expires)
            }
            Metadata::Snapshot(role) => {
                bump_role(&mut role.signed.version, &mut role.signed.expires, expires)
            }
            Metadata::Targets(role) => {
                bump_role(&mut role.signed.version, &mut role.signed.expires, expires)
            }
        };
        self.signatures_mut().clear();
        new_version
    }

    /// The signed root payload, when this is root metadata.
    pub fn as_root(&self) -> Option<&Signed<Root>> {
        match self {
            Metadata::Root(role) => Some(role),
            _ => None,
        }
    }

    /// Mutable access to the signed root payload, when this is root metadata.
    pub fn as_root_mut(&mut self) -> Option<&mut Signed<Root>> {
        match self {
            Metadata::Root(role) => Some(role),
            _ => None,
        }
    }

    /// The signed targets payload, when this is a targets role.
    pub fn as_targets(&self) -> Option<&Signed<Targets>> {
        match self {
            Metadata::Targets(role) => Some(role),
            _ => None,
        }
    }

    /// Mutable access to the signed targets payload, when this is a targets role.
    pub fn as_targets_mut(&mut self) -> Option<&mut Signed<Targets>> {
        match self {
            Metadata::Targets(role) => Some(role),
            _ => None,
        }
    }

    /// The signed snapshot payload, when this is snapshot metadata.
    pub fn as_snapshot(&self) -> Option<&Signed<Snapshot>> {
        match self {
            Metadata::Snapshot(role) => Some(role),
            _ => None,
        }
    }

    /// The signed timestamp payload, when this is timestamp metadata.
    pub fn as_timestamp(&self) -> Option<&Signed<Timestamp>> {
        match self {
            Metadata::Timestamp(role) => Some(role),
            _ => None,
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The rule a delegating role imposes on a delegated role: the authorized keys, the signature
/// threshold, the expiry policy, and any open invites.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationRule {
    /// The delegated role this rule governs.
    pub role: RoleName,

    /// The authorized keys, indexed by key ID.
    pub keys: BTreeMap<String, Key>,

    /// The number of distinct valid signatures required.
    pub threshold: NonZeroU64,

    /// Days added to `now` at each expiry bump.
    pub expiry_period: Option<u32>,

    /// Days before expiry at which a bump is triggered.
    pub signing_period: Option<u32>,

    /// Owner handles invited to this role that have not yet bound a key and signed.
    pub invites: Vec<String>,
}

/// The outcome of verifying a role's signatures against its delegation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The threshold is met and no present signature is bad.
    Ok,
    /// Too few valid signatures; carries how many verified and the required threshold.
    Insufficient {
        /// How many authorized keys produced a valid signature.
        valid: u64,
        /// The required threshold.
        threshold: u64,
    },
    /// One or more present signatures from authorized keys failed to verify.
    Invalid(Vec<String>),
}

/// The detailed result of signature verification for one role.
#[derive(Debug, Clone)]
pub struct SignatureVerification {
    /// Key IDs of authorized keys whose signature verified.
    pub valid: BTreeSet<String>,
    /// Key IDs of authorized keys whose signature failed to verify.
    pub invalid: Vec<String>,
    /// The required threshold.
    pub threshold: NonZeroU64,
}

impl SignatureVerification {
    /// Collapses the detail into the three-way outcome of the spec.
    pub fn outcome(&self) -> VerifyOutcome {
        if !self.invalid.is_empty() {
            VerifyOutcome::Invalid(self.invalid.clone())
        } else if (self.valid.len() as u64) >= self.threshold.get() {
            VerifyOutcome::Ok
        } else {
            VerifyOutcome::Insufficient {
                valid: self.valid.len() as u64,
                threshold: self.threshold.get(),
            }
        }
    }
}

impl DelegationRule {
    /// Verifies `signatures` over the canonical payload bytes against this rule.
    ///
    /// Signatures from key IDs outside the rule are ignored: during root rotation the same
    /// metadata legitimately carries signatures that only the other root version's rule can
    /// account for. A signature from an authorized key that fails cryptographic verification
    /// is reported as invalid.
    pub fn verify(&self, canonical: &[u8], signatures: &[Signature]) -> Result<SignatureVerification> {
        let mut valid = BTreeSet::new();
        let mut invalid = Vec::new();
        for signature in signatures {
            let Some(key) = self.keys.get(&signature.keyid) else {
                continue;
            };
            let sig_bytes = match hex::decode(&signature.sig) {
                Ok(bytes) => bytes,
                Err(_) => {
                    invalid.push(signature.keyid.clone());
                    continue;
                }
            };
            if key.verify(canonical, &sig_bytes)? {
                valid.insert(signature.keyid.clone());
            } else {
                invalid.push(signature.keyid.clone());
            }
        }
        Ok(SignatureVerification {
            valid,
            invalid,
            threshold: self.threshold,
        })
    }

    /// Structural problems with this rule, as human-readable findings. An empty list means the
    /// rule satisfies the delegation invariants.
    pub fn structural_problems(&self, online_role: bool) -> Vec<String> {
        let mut problems = Vec::new();
        if self.keys.is_empty() {
            problems.push(format!("role {} has an empty key set", self.role));
        }
        if self.threshold.get() > self.keys.len() as u64 {
            problems.push(format!(
                "role {} threshold {} exceeds its {} key(s)",
                self.role,
                self.threshold,
                self.keys.len()
            ));
        }
        for (keyid, key) in &self.keys {
            match key.scheme.as_str() {
                SCHEME_ED25519 | SCHEME_ECDSA_NISTP256 | SCHEME_RSASSA_PSS_SHA256 => {}
                other => problems.push(format!("key {keyid} has unknown scheme {other}")),
            }
            match (&key.online_uri, &key.keyowner) {
                (Some(_), Some(_)) => problems.push(format!(
                    "key {keyid} carries both an online URI and a key owner"
                )),
                (None, None) => problems.push(format!(
                    "key {keyid} carries neither an online URI nor a key owner"
                )),
                (Some(_), None) if !online_role => problems.push(format!(
                    "offline role {} lists online key {keyid}",
                    self.role
                )),
                (None, Some(_)) if online_role => problems.push(format!(
                    "online role {} lists offline key {keyid}",
                    self.role
                )),
                _ => {}
            }
        }
        problems
    }

    /// Verifies signatures and checks the threshold, as a single yes/no.
    pub fn is_satisfied(&self, metadata: &Metadata) -> Result<bool> {
        let canonical = metadata.canonical_form()?;
        Ok(self.verify(&canonical, metadata.signatures())?.outcome() == VerifyOutcome::Ok)
    }

    /// Maps a key ID to the handle responsible for it, when the key is offline.
    pub fn owner_of(&self, keyid: &str) -> Option<&str> {
        self.keys.get(keyid).and_then(|key| key.keyowner.as_deref())
    }

    /// The owner handles in this rule's key set that are not in `signed_by`.
    pub fn unsigned_owners(&self, signed_by: &BTreeSet<String>) -> Vec<String> {
        let mut owners: Vec<String> = self
            .keys
            .iter()
            .filter(|(keyid, _)| !signed_by.contains(*keyid))
            .filter_map(|(_, key)| key.keyowner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::KeyVal;

    fn test_key(owner: Option<&str>, online: Option<&str>) -> Key {
        Key {
            keytype: "ed25519".to_string(),
            scheme: SCHEME_ED25519.to_string(),
            keyval: KeyVal {
                public: "2af4a5fc1bc1419f81a4c5f251746231ba21f5a552a0cf11cf6c45c8ec1c5b32"
                    .to_string(),
                _extra: BTreeMap::new(),
            },
            online_uri: online.map(str::to_string),
            keyowner: owner.map(str::to_string),
            _extra: BTreeMap::new(),
        }
    }

    #[test]
    fn role_name_file_names() {
        assert_eq!(RoleName::Root.file_name(), "root.json");
        assert_eq!(
            RoleName::Delegated("projects".to_string()).file_name(),
            "projects.json"
        );
        assert_eq!(
            RoleName::from_file_name("snapshot.json"),
            Some(RoleName::Snapshot)
        );
        assert_eq!(
            RoleName::from_file_name("projects.json"),
            Some(RoleName::Delegated("projects".to_string()))
        );
        // Version-prefixed published files are not working-tree roles.
        assert_eq!(RoleName::from_file_name("1.root.json"), None);
        assert_eq!(RoleName::from_file_name("targets"), None);
    }

    #[test]
    fn structural_problems_flag_mixed_keys() {
        let mut keys = BTreeMap::new();
        keys.insert("aa".to_string(), test_key(Some("@user1"), None));
        keys.insert(
            "bb".to_string(),
            test_key(Some("@user2"), Some("gcpkms:projects/x/locations/global")),
        );
        let rule = DelegationRule {
            role: RoleName::Targets,
            keys,
            threshold: NonZeroU64::new(3).unwrap(),
            expiry_period: None,
            signing_period: None,
            invites: Vec::new(),
        };
        let problems = rule.structural_problems(false);
        assert!(problems.iter().any(|p| p.contains("threshold 3")));
        assert!(problems.iter().any(|p| p.contains("both an online URI")));
    }

    #[test]
    fn bump_increments_and_clears_signatures() {
        let timestamp = Timestamp::new(
            "1.0.0".to_string(),
            NonZeroU64::new(4).unwrap(),
            Utc::now(),
        );
        let mut metadata = Metadata::Timestamp(Signed {
            signed: timestamp,
            signatures: vec![Signature {
                keyid: "aa".to_string(),
                sig: "bb".to_string(),
            }],
        });
        let expires = Utc::now() + chrono::Duration::days(7);
        let version = metadata.bump(expires);
        assert_eq!(version.get(), 5);
        assert_eq!(metadata.expires(), expires);
        assert!(metadata.signatures().is_empty());
    }

    #[test]
    fn root_round_trips_with_invites() {
        let json = serde_json::json!({
            "_type": "root",
            "spec_version": "1.0.0",
            "consistent_snapshot": true,
            "version": 1,
            "expires": "2030-01-01T00:00:00Z",
            "keys": {},
            "roles": {
                "root": {"keyids": [], "threshold": 1, "x-playground-expiry-period": 365},
                "snapshot": {"keyids": [], "threshold": 1},
                "targets": {"keyids": [], "threshold": 1},
                "timestamp": {"keyids": [], "threshold": 1}
            },
            "x-playground-invites": {"root": ["@user2"]},
            "x-custom-unknown": 7
        });
        let root: Signed<Root> = Signed {
            signed: serde_json::from_value(json.clone()).unwrap(),
            signatures: Vec::new(),
        };
        assert_eq!(root.signed.invites["root"], vec!["@user2".to_string()]);
        assert_eq!(
            root.signed.roles[&RoleType::Root].expiry_period,
            Some(365)
        );
        assert_eq!(serde_json::to_value(&root.signed).unwrap(), json);
    }
}
