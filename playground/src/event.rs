// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signing-event engine: given a baseline state and an event state, computes a verdict
//! (empty, invalid, incomplete, or publishable) together with per-signer obligations and a
//! rendered report.
//!
//! The engine never mutates the repository. The computation is a pure function of
//! `(base, event, target files, now)`, so re-running it is always safe.

use crate::delta::{ChangeSet, RoleChange, RoleDiff};
use crate::error::Result;
use crate::repo::{RoleSet, TargetFiles};
use crate::schema::{DelegationRule, Metadata, RoleName, RoleType, VerifyOutcome};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Tolerance applied when checking a proposed expiry against `now + expiry_period`.
fn expiry_tolerance() -> Duration {
    Duration::days(1)
}

/// The verdict of a signing event.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The branches are identical at the metadata level.
    Empty,
    /// One or more hard constraints are violated.
    Invalid(Vec<RoleFailure>),
    /// The shape is valid but signatures or invite acceptances are still pending.
    Incomplete(Obligations),
    /// Thresholds reached and every invariant holds.
    Publishable,
}

impl Verdict {
    /// Whether the event can be merged.
    pub fn is_publishable(&self) -> bool {
        matches!(self, Verdict::Publishable)
    }
}

/// A hard constraint violation, attached to the role it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleFailure {
    /// The role the failure was found on.
    pub role: RoleName,
    /// The violated constraint.
    pub reason: InvalidReason,
}

/// The closed set of hard invalidity reasons.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    /// The event mutates snapshot or timestamp keys or signatures directly.
    IllegalOnlineChange,
    /// Target files on disk do not match the targets role listings.
    UnmatchedTargets {
        /// Which file or entry mismatched, and how.
        detail: String,
    },
    /// A new expiry is in the past or outside the delegating expiry-period policy.
    ExpiryOutOfRange {
        /// The offending expiry.
        expires: DateTime<Utc>,
        /// What the policy expected.
        detail: String,
    },
    /// A new delegation violates the delegation invariants.
    DelegationStructure {
        /// The violated invariant.
        detail: String,
    },
    /// A role's version does not exceed the baseline's.
    VersionRegression {
        /// The baseline version.
        base: u64,
        /// The proposed version.
        event: u64,
    },
    /// A role was removed while its delegation still lists it.
    OrphanedRemoval,
    /// A present signature over unchanged content does not verify.
    BadSignature {
        /// The key IDs whose signatures failed.
        keyids: Vec<String>,
    },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::IllegalOnlineChange => {
                write!(f, "illegal change to an online role")
            }
            InvalidReason::UnmatchedTargets { detail } => {
                write!(f, "unmatched targets: {detail}")
            }
            InvalidReason::ExpiryOutOfRange { expires, detail } => {
                write!(f, "expiry {expires} out of range: {detail}")
            }
            InvalidReason::DelegationStructure { detail } => {
                write!(f, "delegation structure: {detail}")
            }
            InvalidReason::VersionRegression { base, event } => {
                write!(f, "version regression: {base} -> {event}")
            }
            InvalidReason::OrphanedRemoval => {
                write!(f, "role removed while still delegated")
            }
            InvalidReason::BadSignature { keyids } => {
                write!(f, "bad signature from key(s) {}", keyids.join(", "))
            }
        }
    }
}

/// What is still pending before an event becomes publishable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Obligations {
    /// Role to the owner handles that still need to sign (or re-sign) it.
    pub signatures: BTreeMap<RoleName, Vec<String>>,
    /// Role name to the invited handles that have not yet bound a key.
    pub invites: BTreeMap<String, Vec<String>>,
}

impl Obligations {
    fn is_empty(&self) -> bool {
        self.signatures.is_empty() && self.invites.is_empty()
    }
}

/// One row of the rendered report.
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// The role name.
    pub role: String,
    /// A short state word: unchanged, drafted, partially signed, signed, invalid, removed.
    pub state: String,
    /// Valid signature count over threshold, e.g. "1/2".
    pub signatures: String,
    /// The event-side version (baseline version for removed roles).
    pub version: u64,
    /// Failures and pending obligations for this role.
    pub notes: Vec<String>,
}

/// The rendered role-by-role report. Always produced, regardless of verdict.
#[derive(Debug, Clone)]
pub struct EventReport {
    /// One row per role, in evaluation order.
    pub rows: Vec<ReportRow>,
    /// The final verdict line.
    pub verdict_line: String,
}

impl fmt::Display for EventReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20} {:<18} {:>10} {:>9}", "role", "state", "signatures", "version")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<20} {:<18} {:>10} {:>9}",
                row.role, row.state, row.signatures, row.version
            )?;
            for note in &row.notes {
                writeln!(f, "    - {note}")?;
            }
        }
        writeln!(f, "verdict: {}", self.verdict_line)
    }
}

/// The outcome of evaluating a signing event.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// The machine-readable verdict.
    pub verdict: Verdict,
    /// The structured change set the verdict was derived from.
    pub changes: ChangeSet,
    /// The human-readable report.
    pub report: EventReport,
}

/// A signing event under evaluation: a baseline, a candidate state, and the candidate's
/// target file tree, frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct SigningEvent<'a> {
    /// The known-good state (main).
    pub base: &'a RoleSet,
    /// The candidate state (the event branch).
    pub event: &'a RoleSet,
    /// The target files present on the event branch.
    pub target_files: &'a TargetFiles,
    /// The evaluation instant. Read once by the caller.
    pub now: DateTime<Utc>,
}

/// Per-role scratch state accumulated during evaluation.
#[derive(Default)]
struct RoleEvaluation {
    failures: Vec<InvalidReason>,
    pending_owners: Vec<String>,
    valid_signatures: u64,
    threshold: u64,
}

impl<'a> SigningEvent<'a> {
    /// Evaluates the event. Errors are reserved for serialization failures on already-parsed
    /// metadata; every user-level problem lands in the verdict instead.
    pub fn evaluate(&self) -> Result<EventOutcome> {
        let changes = ChangeSet::between(self.base, self.event)?;
        if changes.is_empty() {
            let report = self.render(&changes, &BTreeMap::new(), &Verdict::Empty);
            return Ok(EventOutcome {
                verdict: Verdict::Empty,
                changes,
                report,
            });
        }

        let mut evaluations: BTreeMap<RoleName, RoleEvaluation> = BTreeMap::new();
        for name in self.evaluation_order(&changes) {
            let change = changes.roles.get(&name).cloned().unwrap_or(RoleChange::Unchanged);
            let evaluation = self.evaluate_role(&name, &change)?;
            let root_failed = name == RoleName::Root && !evaluation.failures.is_empty();
            evaluations.insert(name, evaluation);
            if root_failed {
                debug!("root failed; skipping evaluation of remaining roles");
                break;
            }
        }

        // The target file check runs over the whole event tree once the per-role shape holds.
        let root_failed = evaluations
            .get(&RoleName::Root)
            .is_some_and(|e| !e.failures.is_empty());
        if !root_failed {
            for (role, detail) in self.unmatched_targets() {
                evaluations
                    .entry(role)
                    .or_default()
                    .failures
                    .push(InvalidReason::UnmatchedTargets { detail });
            }
        }

        let mut failures = Vec::new();
        let mut obligations = Obligations::default();
        for (name, evaluation) in &evaluations {
            for reason in &evaluation.failures {
                failures.push(RoleFailure {
                    role: name.clone(),
                    reason: reason.clone(),
                });
            }
            if !evaluation.pending_owners.is_empty() {
                obligations
                    .signatures
                    .insert(name.clone(), evaluation.pending_owners.clone());
            }
        }
        obligations.invites = self.open_invites();

        let verdict = if !failures.is_empty() {
            Verdict::Invalid(failures)
        } else if !obligations.is_empty() {
            Verdict::Incomplete(obligations)
        } else {
            Verdict::Publishable
        };
        let report = self.render(&changes, &evaluations, &verdict);
        Ok(EventOutcome {
            verdict,
            changes,
            report,
        })
    }

    /// Root first, then targets, then delegated roles in name order. Online roles come last;
    /// they only matter here when an event touched them illegally.
    fn evaluation_order(&self, changes: &ChangeSet) -> Vec<RoleName> {
        let mut order = Vec::new();
        for name in [RoleName::Root, RoleName::Targets] {
            if changes.roles.contains_key(&name) {
                order.push(name);
            }
        }
        for name in changes.roles.keys() {
            if matches!(name, RoleName::Delegated(_)) {
                order.push(name.clone());
            }
        }
        for name in [RoleName::Snapshot, RoleName::Timestamp] {
            if changes.roles.contains_key(&name) {
                order.push(name);
            }
        }
        order
    }

    fn evaluate_role(&self, name: &RoleName, change: &RoleChange) -> Result<RoleEvaluation> {
        let mut evaluation = RoleEvaluation::default();

        match change {
            RoleChange::Unchanged => return Ok(evaluation),
            RoleChange::Removed { orphaned } => {
                if *orphaned {
                    evaluation.failures.push(InvalidReason::OrphanedRemoval);
                } else if name.is_online() {
                    evaluation.failures.push(InvalidReason::IllegalOnlineChange);
                }
                return Ok(evaluation);
            }
            RoleChange::Added | RoleChange::Changed(_) => {}
        }

        if name.is_online() {
            evaluation.failures.push(InvalidReason::IllegalOnlineChange);
            return Ok(evaluation);
        }

        let Some(metadata) = self.event.get(name) else {
            return Ok(evaluation);
        };
        let payload_changed = match change {
            RoleChange::Added => true,
            RoleChange::Changed(diff) => payload_changed(diff),
            _ => false,
        };

        // Version regression short-circuits the rest of this role's analysis.
        if let Some(base_metadata) = self.base.get(name) {
            if payload_changed && metadata.version() <= base_metadata.version() {
                evaluation.failures.push(InvalidReason::VersionRegression {
                    base: base_metadata.version().get(),
                    event: metadata.version().get(),
                });
                return Ok(evaluation);
            }
        }

        self.check_delegation_structure(name, &mut evaluation);
        if payload_changed {
            self.check_expiry(name, metadata, change, &mut evaluation);
        }
        self.check_signatures(name, metadata, payload_changed, &mut evaluation)?;
        Ok(evaluation)
    }

    /// Validates the delegation rules the event declares. A changed root is responsible for
    /// all four top-level rules; a changed targets role for the rules it delegates.
    fn check_delegation_structure(&self, name: &RoleName, evaluation: &mut RoleEvaluation) {
        let mut check = |rule: Result<DelegationRule>, online: bool| match rule {
            Ok(rule) => {
                let invites = rule.invites.len() as u64;
                for problem in rule.structural_problems(online) {
                    // An under-populated key set is tolerated while invites are open; the
                    // invited signers' keys are still to come.
                    if invites > 0
                        && (problem.contains("threshold") || problem.contains("empty key set"))
                        && rule.threshold.get() <= rule.keys.len() as u64 + invites
                    {
                        continue;
                    }
                    evaluation
                        .failures
                        .push(InvalidReason::DelegationStructure { detail: problem });
                }
            }
            Err(e) => evaluation.failures.push(InvalidReason::DelegationStructure {
                detail: e.to_string(),
            }),
        };

        match name {
            RoleName::Root => {
                for role_type in [
                    RoleType::Root,
                    RoleType::Targets,
                    RoleType::Snapshot,
                    RoleType::Timestamp,
                ] {
                    // Snapshot and timestamp may be absent in a bootstrapping event; their
                    // rules are only validated when declared.
                    let declared = self
                        .event
                        .root()
                        .map(|root| root.signed.roles.contains_key(&role_type))
                        .unwrap_or(false);
                    if declared {
                        check(
                            self.event.delegation_for(&role_type.into()),
                            matches!(role_type, RoleType::Snapshot | RoleType::Timestamp),
                        );
                    }
                }
            }
            RoleName::Targets => {
                let delegated: Vec<String> = self
                    .event
                    .targets()
                    .and_then(|targets| targets.signed.delegations.as_ref())
                    .map(|delegations| {
                        delegations.roles.iter().map(|role| role.name.clone()).collect()
                    })
                    .unwrap_or_default();
                for role in delegated {
                    check(
                        self.event.delegation_for(&RoleName::Delegated(role)),
                        false,
                    );
                }
            }
            _ => {}
        }
    }

    /// The expiry of a changed role must be in the future and must not overshoot the
    /// delegating policy. A version bump that did not re-derive its expiry is also flagged.
    fn check_expiry(
        &self,
        name: &RoleName,
        metadata: &Metadata,
        change: &RoleChange,
        evaluation: &mut RoleEvaluation,
    ) {
        let expires = metadata.expires();
        if expires <= self.now {
            evaluation.failures.push(InvalidReason::ExpiryOutOfRange {
                expires,
                detail: "already expired".to_string(),
            });
            return;
        }

        // The policy is the baseline's when the role already existed there.
        let policy = if self.base.get(name).is_some() {
            self.base.delegation_for(name).ok()
        } else {
            self.event.delegation_for(name).ok()
        };
        let Some(period) = policy.and_then(|rule| rule.expiry_period) else {
            return;
        };
        let ceiling = self.now + Duration::days(i64::from(period)) + expiry_tolerance();
        if expires > ceiling {
            evaluation.failures.push(InvalidReason::ExpiryOutOfRange {
                expires,
                detail: format!("beyond now + {period} day expiry period"),
            });
        }

        if let RoleChange::Changed(diff) = change {
            if diff.version_bump_only && !diff.expiry_bumped {
                evaluation.failures.push(InvalidReason::ExpiryOutOfRange {
                    expires,
                    detail: "version bumped without re-deriving expiry".to_string(),
                });
            }
        }
    }

    /// Verifies signatures under the event-side rule — and, for a changed root, under the
    /// baseline root's rule as well (key rotation must satisfy both thresholds).
    ///
    /// A failing signature over changed content is treated as stale (the signer saw an older
    /// draft) and becomes an obligation; over unchanged content it is a hard `bad_signature`.
    fn check_signatures(
        &self,
        name: &RoleName,
        metadata: &Metadata,
        payload_changed: bool,
        evaluation: &mut RoleEvaluation,
    ) -> Result<()> {
        let canonical = metadata
            .canonical_form()
            .map_err(|source| crate::error::Error::Schema {
                role: name.to_string(),
                source,
            })?;

        let mut rules: Vec<DelegationRule> = Vec::new();
        match self.event.delegation_for(name) {
            Ok(rule) => rules.push(rule),
            // Structure failures are already recorded; nothing to verify against.
            Err(_) => return Ok(()),
        }
        if *name == RoleName::Root && self.base.get(name).is_some() {
            if let Ok(rule) = self.base.delegation_for(name) {
                rules.push(rule);
            }
        }

        let mut pending: BTreeSet<String> = BTreeSet::new();
        for rule in &rules {
            let verification = rule
                .verify(&canonical, metadata.signatures())
                .map_err(|source| crate::error::Error::Schema {
                    role: name.to_string(),
                    source,
                })?;
            evaluation.threshold = evaluation.threshold.max(rule.threshold.get());
            evaluation.valid_signatures =
                evaluation.valid_signatures.max(verification.valid.len() as u64);

            if !verification.invalid.is_empty() && !payload_changed {
                evaluation.failures.push(InvalidReason::BadSignature {
                    keyids: verification.invalid.clone(),
                });
                continue;
            }

            match verification.outcome() {
                VerifyOutcome::Ok => {}
                _ => {
                    // Open invites mean the signed content will change again once the invitee
                    // binds a key, so every current holder re-signs: all owners are pending.
                    if rule.invites.is_empty() {
                        pending.extend(rule.unsigned_owners(&verification.valid));
                    } else {
                        pending.extend(
                            rule.keys.values().filter_map(|key| key.keyowner.clone()),
                        );
                        pending.extend(rule.invites.iter().cloned());
                    }
                }
            }
        }
        evaluation.pending_owners = pending.into_iter().collect();
        Ok(())
    }

    /// Cross-checks the event's target files against the union of its targets listings.
    fn unmatched_targets(&self) -> Vec<(RoleName, String)> {
        let mut failures = Vec::new();
        let mut listed: BTreeMap<&String, (RoleName, &crate::schema::Target)> = BTreeMap::new();

        if let Some(targets) = self.event.targets() {
            for (path, target) in &targets.signed.targets {
                listed.insert(path, (RoleName::Targets, target));
            }
        }
        for (delegated, targets) in self.event.delegated_roles() {
            for (path, target) in &targets.signed.targets {
                listed.insert(path, (RoleName::Delegated(delegated.to_string()), target));
            }
        }

        if listed.is_empty() && self.target_files.is_empty() {
            return failures;
        }

        for (path, (role, target)) in &listed {
            match self.target_files.files.get(*path) {
                None => failures.push((role.clone(), format!("{path} listed but missing on disk"))),
                Some(on_disk) => {
                    if on_disk.hashes.sha256 != target.hashes.sha256
                        || on_disk.length != target.length
                    {
                        failures.push((
                            role.clone(),
                            format!("{path} does not match its listed hash/length"),
                        ));
                    }
                }
            }
        }
        for path in self.target_files.files.keys() {
            if !listed.contains_key(path) {
                failures.push((
                    RoleName::Targets,
                    format!("{path} exists on disk but no role lists it"),
                ));
            }
        }
        failures
    }

    /// Every invite still open in the event.
    fn open_invites(&self) -> BTreeMap<String, Vec<String>> {
        let mut open: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Ok(root) = self.event.root() {
            for (role, handles) in &root.signed.invites {
                open.entry(role.clone()).or_default().extend(handles.iter().cloned());
            }
        }
        if let Some(targets) = self.event.targets() {
            for (role, handles) in &targets.signed.invites {
                open.entry(role.clone()).or_default().extend(handles.iter().cloned());
            }
        }
        for handles in open.values_mut() {
            handles.sort();
            handles.dedup();
        }
        open
    }

    fn render(
        &self,
        changes: &ChangeSet,
        evaluations: &BTreeMap<RoleName, RoleEvaluation>,
        verdict: &Verdict,
    ) -> EventReport {
        let mut rows = Vec::new();
        for (name, change) in &changes.roles {
            let evaluation = evaluations.get(name);
            let failures = evaluation.map(|e| e.failures.as_slice()).unwrap_or(&[]);
            let pending = evaluation.map(|e| !e.pending_owners.is_empty()).unwrap_or(false);
            let state = if !failures.is_empty() {
                "invalid"
            } else {
                match change {
                    RoleChange::Unchanged => "unchanged",
                    RoleChange::Removed { .. } => "removed",
                    RoleChange::Added | RoleChange::Changed(_) => {
                        if pending {
                            if evaluation.map(|e| e.valid_signatures > 0).unwrap_or(false) {
                                "partially signed"
                            } else {
                                "drafted"
                            }
                        } else {
                            "signed"
                        }
                    }
                }
            };
            let signatures = evaluation
                .map(|e| format!("{}/{}", e.valid_signatures, e.threshold))
                .unwrap_or_else(|| "-".to_string());
            let version = self
                .event
                .get(name)
                .or_else(|| self.base.get(name))
                .map(|m| m.version().get())
                .unwrap_or(0);
            let mut notes: Vec<String> = failures.iter().map(ToString::to_string).collect();
            if let Some(evaluation) = evaluation {
                if !evaluation.pending_owners.is_empty() {
                    notes.push(format!("waiting for {}", evaluation.pending_owners.join(", ")));
                }
            }
            rows.push(ReportRow {
                role: name.to_string(),
                state: state.to_string(),
                signatures,
                version,
                notes,
            });
        }

        let verdict_line = match verdict {
            Verdict::Empty => "empty (no metadata changes)".to_string(),
            Verdict::Publishable => "publishable".to_string(),
            Verdict::Incomplete(obligations) => {
                let mut parts = Vec::new();
                for (role, owners) in &obligations.signatures {
                    parts.push(format!("{role}: {}", owners.join(", ")));
                }
                for (role, handles) in &obligations.invites {
                    parts.push(format!("invites open for {role}: {}", handles.join(", ")));
                }
                format!("incomplete ({})", parts.join("; "))
            }
            Verdict::Invalid(failures) => {
                format!("invalid ({} hard failure(s))", failures.len())
            }
        };
        EventReport { rows, verdict_line }
    }
}

/// Whether the payload (not merely the signature set) differs from the baseline.
fn payload_changed(diff: &RoleDiff) -> bool {
    diff.payload_changed
}
