// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The delta analyzer: diffs a baseline repository state against a signing-event state into a
//! structured change set the signing-event engine consumes.

use crate::error::Result;
use crate::repo::RoleSet;
use crate::schema::{Metadata, RoleName, RoleType, Root, Targets};
use std::collections::{BTreeMap, BTreeSet};

/// How one role differs between the baseline and the event.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleChange {
    /// Payload and signatures are identical.
    Unchanged,
    /// The role exists only in the event.
    Added,
    /// The role exists only in the baseline. A removal is orphaned when the delegating role's
    /// new version still lists the delegation.
    Removed {
        /// Whether the delegation pointing at this role survived the removal.
        orphaned: bool,
    },
    /// The role exists in both states and differs.
    Changed(RoleDiff),
}

/// What changed inside one role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleDiff {
    /// The signed payload differs from the baseline (as opposed to the signature set alone).
    pub payload_changed: bool,
    /// The payload differs only in version and expiry.
    pub version_bump_only: bool,
    /// The expiry moved.
    pub expiry_bumped: bool,
    /// The signature set changed (possibly with an identical payload).
    pub signatures_changed: bool,
    /// Changes to the delegation rules this role carries, when it is a delegating role.
    pub delegation: Option<DelegationDiff>,
    /// Changes to the target list, when this is a targets role.
    pub targets: Option<TargetListDiff>,
}

/// Changes to the delegation rules carried by a delegating role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationDiff {
    /// Delegated rules present only in the event.
    pub added_roles: BTreeSet<String>,
    /// Delegated rules present only in the baseline.
    pub removed_roles: BTreeSet<String>,
    /// Key IDs newly authorized, per delegated rule.
    pub added_keyids: BTreeMap<String, BTreeSet<String>>,
    /// Key IDs no longer authorized, per delegated rule.
    pub removed_keyids: BTreeMap<String, BTreeSet<String>>,
    /// Threshold changes, per delegated rule: (baseline, event).
    pub threshold_changes: BTreeMap<String, (u64, u64)>,
    /// Delegated rules whose expiry or signing period changed.
    pub period_changes: BTreeSet<String>,
}

impl DelegationDiff {
    fn is_empty(&self) -> bool {
        self.added_roles.is_empty()
            && self.removed_roles.is_empty()
            && self.added_keyids.is_empty()
            && self.removed_keyids.is_empty()
            && self.threshold_changes.is_empty()
            && self.period_changes.is_empty()
    }
}

/// Changes to the target list of a targets role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetListDiff {
    /// Target paths present only in the event.
    pub added: BTreeSet<String>,
    /// Target paths present only in the baseline.
    pub removed: BTreeSet<String>,
    /// Target paths whose hash, length, or custom data changed.
    pub modified: BTreeSet<String>,
}

impl TargetListDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// The structured difference between two repository states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Per-role change classification, for every role present in either state.
    pub roles: BTreeMap<RoleName, RoleChange>,
    /// Invites present in the event and absent in the baseline: role name to handles.
    pub new_invites: BTreeMap<String, BTreeSet<String>>,
    /// For each changed offline role: the key IDs in its (event-side) delegating key set that
    /// have not produced a valid signature over the event's payload.
    pub obligations: BTreeMap<RoleName, BTreeSet<String>>,
}

impl ChangeSet {
    /// Diffs `base` against `event`.
    pub fn between(base: &RoleSet, event: &RoleSet) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();

        let names: BTreeSet<&RoleName> = base.roles.keys().chain(event.roles.keys()).collect();
        for name in names {
            let change = match (base.get(name), event.get(name)) {
                (None, Some(_)) => RoleChange::Added,
                (Some(_), None) => RoleChange::Removed {
                    orphaned: still_delegated(event, name),
                },
                (Some(before), Some(after)) => diff_role(name, before, after)?,
                (None, None) => continue,
            };
            changes.roles.insert(name.clone(), change);
        }

        changes.new_invites = invite_delta(base, event);
        changes.obligations = open_obligations(event, &changes.roles)?;
        Ok(changes)
    }

    /// Whether the two states are identical at the metadata level.
    pub fn is_empty(&self) -> bool {
        self.roles
            .values()
            .all(|change| matches!(change, RoleChange::Unchanged))
    }

    /// The roles that differ, with their change detail.
    pub fn changed_roles(&self) -> impl Iterator<Item = (&RoleName, &RoleChange)> {
        self.roles
            .iter()
            .filter(|(_, change)| !matches!(change, RoleChange::Unchanged))
    }
}

/// Whether the event-side delegating role still lists a delegation for `name`. Top-level roles
/// are always still delegated (root cannot drop them), so their removal is always orphaned.
fn still_delegated(event: &RoleSet, name: &RoleName) -> bool {
    match name {
        RoleName::Delegated(delegated) => event
            .targets()
            .and_then(|targets| targets.signed.delegations.as_ref())
            .map(|delegations| delegations.role(delegated).is_some())
            .unwrap_or(true),
        _ => true,
    }
}

fn diff_role(name: &RoleName, before: &Metadata, after: &Metadata) -> Result<RoleChange> {
    let canonical_before = before
        .canonical_form()
        .map_err(|source| crate::error::Error::Schema {
            role: name.to_string(),
            source,
        })?;
    let canonical_after = after
        .canonical_form()
        .map_err(|source| crate::error::Error::Schema {
            role: name.to_string(),
            source,
        })?;
    let signatures_changed = before.signatures() != after.signatures();

    if canonical_before == canonical_after {
        return Ok(if signatures_changed {
            RoleChange::Changed(RoleDiff {
                signatures_changed: true,
                ..RoleDiff::default()
            })
        } else {
            RoleChange::Unchanged
        });
    }

    // Re-canonicalize the event payload with the baseline's version and expiry to decide
    // whether anything else moved.
    let mut normalized = after.clone();
    normalized.set_version(before.version());
    normalized.set_expires(before.expires());
    let version_bump_only = normalized
        .canonical_form()
        .map_err(|source| crate::error::Error::Schema {
            role: name.to_string(),
            source,
        })?
        == canonical_before;

    let delegation = match (before, after) {
        (Metadata::Root(b), Metadata::Root(a)) => {
            Some(diff_root_delegations(&b.signed, &a.signed))
        }
        (Metadata::Targets(b), Metadata::Targets(a)) => {
            Some(diff_targets_delegations(&b.signed, &a.signed))
        }
        _ => None,
    }
    .filter(|diff: &DelegationDiff| !diff.is_empty());

    let targets = match (before, after) {
        (Metadata::Targets(b), Metadata::Targets(a)) => {
            Some(diff_target_list(&b.signed, &a.signed))
        }
        _ => None,
    }
    .filter(|diff: &TargetListDiff| !diff.is_empty());

    Ok(RoleChange::Changed(RoleDiff {
        payload_changed: true,
        version_bump_only,
        expiry_bumped: before.expires() != after.expires(),
        signatures_changed,
        delegation,
        targets,
    }))
}

fn diff_rule(
    diff: &mut DelegationDiff,
    rule_name: &str,
    before: (&[String], u64, Option<u32>, Option<u32>),
    after: (&[String], u64, Option<u32>, Option<u32>),
) {
    let (keyids_before, threshold_before, expiry_before, signing_before) = before;
    let (keyids_after, threshold_after, expiry_after, signing_after) = after;

    let before_set: BTreeSet<&String> = keyids_before.iter().collect();
    let after_set: BTreeSet<&String> = keyids_after.iter().collect();
    let added: BTreeSet<String> = after_set
        .difference(&before_set)
        .map(|id| (*id).clone())
        .collect();
    let removed: BTreeSet<String> = before_set
        .difference(&after_set)
        .map(|id| (*id).clone())
        .collect();
    if !added.is_empty() {
        diff.added_keyids.insert(rule_name.to_string(), added);
    }
    if !removed.is_empty() {
        diff.removed_keyids.insert(rule_name.to_string(), removed);
    }
    if threshold_before != threshold_after {
        diff.threshold_changes
            .insert(rule_name.to_string(), (threshold_before, threshold_after));
    }
    if expiry_before != expiry_after || signing_before != signing_after {
        diff.period_changes.insert(rule_name.to_string());
    }
}

fn diff_root_delegations(before: &Root, after: &Root) -> DelegationDiff {
    let mut diff = DelegationDiff::default();
    for role_type in [
        RoleType::Root,
        RoleType::Snapshot,
        RoleType::Targets,
        RoleType::Timestamp,
    ] {
        match (before.roles.get(&role_type), after.roles.get(&role_type)) {
            (Some(b), Some(a)) => diff_rule(
                &mut diff,
                &role_type.to_string(),
                (&b.keyids, b.threshold.get(), b.expiry_period, b.signing_period),
                (&a.keyids, a.threshold.get(), a.expiry_period, a.signing_period),
            ),
            (None, Some(_)) => {
                diff.added_roles.insert(role_type.to_string());
            }
            (Some(_), None) => {
                diff.removed_roles.insert(role_type.to_string());
            }
            (None, None) => {}
        }
    }
    diff
}

fn diff_targets_delegations(before: &Targets, after: &Targets) -> DelegationDiff {
    let mut diff = DelegationDiff::default();
    let empty = Vec::new();
    let roles_before = before
        .delegations
        .as_ref()
        .map(|d| &d.roles)
        .unwrap_or(&empty);
    let roles_after = after
        .delegations
        .as_ref()
        .map(|d| &d.roles)
        .unwrap_or(&empty);

    let names: BTreeSet<&str> = roles_before
        .iter()
        .chain(roles_after.iter())
        .map(|role| role.name.as_str())
        .collect();
    for name in names {
        let b = roles_before.iter().find(|role| role.name == name);
        let a = roles_after.iter().find(|role| role.name == name);
        match (b, a) {
            (Some(b), Some(a)) => diff_rule(
                &mut diff,
                name,
                (&b.keyids, b.threshold.get(), b.expiry_period, b.signing_period),
                (&a.keyids, a.threshold.get(), a.expiry_period, a.signing_period),
            ),
            (None, Some(_)) => {
                diff.added_roles.insert(name.to_string());
            }
            (Some(_), None) => {
                diff.removed_roles.insert(name.to_string());
            }
            (None, None) => {}
        }
    }
    diff
}

fn diff_target_list(before: &Targets, after: &Targets) -> TargetListDiff {
    let mut diff = TargetListDiff::default();
    let paths: BTreeSet<&String> = before.targets.keys().chain(after.targets.keys()).collect();
    for path in paths {
        match (before.targets.get(path), after.targets.get(path)) {
            (None, Some(_)) => {
                diff.added.insert(path.clone());
            }
            (Some(_), None) => {
                diff.removed.insert(path.clone());
            }
            (Some(b), Some(a)) if b != a => {
                diff.modified.insert(path.clone());
            }
            _ => {}
        }
    }
    diff
}

/// Invites present in `event` and absent in `base`, per role name.
fn invite_delta(base: &RoleSet, event: &RoleSet) -> BTreeMap<String, BTreeSet<String>> {
    fn invites_of(set: &RoleSet) -> BTreeMap<String, BTreeSet<String>> {
        let mut all: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        if let Ok(root) = set.root() {
            for (role, handles) in &root.signed.invites {
                all.entry(role.clone()).or_default().extend(handles.iter().cloned());
            }
        }
        if let Some(targets) = set.targets() {
            for (role, handles) in &targets.signed.invites {
                all.entry(role.clone()).or_default().extend(handles.iter().cloned());
            }
        }
        all
    }

    let base_invites = invites_of(base);
    let mut fresh = BTreeMap::new();
    for (role, handles) in invites_of(event) {
        let known = base_invites.get(&role);
        let new_handles: BTreeSet<String> = handles
            .into_iter()
            .filter(|handle| known.map_or(true, |set| !set.contains(handle)))
            .collect();
        if !new_handles.is_empty() {
            fresh.insert(role, new_handles);
        }
    }
    fresh
}

/// For each changed offline role, the authorized key IDs (event-side rule) that have not
/// produced a valid signature over the event payload.
fn open_obligations(
    event: &RoleSet,
    roles: &BTreeMap<RoleName, RoleChange>,
) -> Result<BTreeMap<RoleName, BTreeSet<String>>> {
    let mut obligations = BTreeMap::new();
    for (name, change) in roles {
        if name.is_online() || !matches!(change, RoleChange::Added | RoleChange::Changed(_)) {
            continue;
        }
        // A rule that does not resolve (broken delegation structure) is reported by the
        // signing-event engine, not here.
        let Ok(rule) = event.delegation_for(name) else {
            continue;
        };
        let Ok(verification) = event.verify_role(name) else {
            continue;
        };
        let unsigned: BTreeSet<String> = rule
            .keys
            .keys()
            .filter(|keyid| !verification.valid.contains(*keyid))
            .cloned()
            .collect();
        if !unsigned.is_empty() {
            obligations.insert(name.clone(), unsigned);
        }
    }
    Ok(obligations)
}
