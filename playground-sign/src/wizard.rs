// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The guided delta builder: a deterministic state machine that turns signer intent (accept
//! an invitation, change signers, change expiry periods, sign) into a minimal, well-formed
//! metadata delta against the baseline.

use crate::config::SignConfig;
use crate::error::{self, Result};
use crate::prompt::InputSource;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use playground::key_source::KeySource;
use playground::repo::RoleSet;
use playground::schema::key::Key;
use playground::schema::{DelegationRule, Metadata, RoleName, RoleType};
use playground::sign::Sign;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use snafu::OptionExt;
use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::str::FromStr;

/// The workbench states. Transitions are driven purely by the input source, which makes the
/// whole interaction replayable.
#[derive(Debug, Clone, PartialEq)]
enum WizardState {
    AcceptInvites,
    SelectRole,
    RoleMenu(RoleName),
    Sign,
    Done,
}

/// One workbench session over an event checkout.
pub(crate) struct Workbench<'a> {
    config: &'a SignConfig,
    base: &'a RoleSet,
    event: RoleSet,
    now: DateTime<Utc>,
    /// Roles the signer became authorized for during this session and must sign even though
    /// their payload did not change.
    to_sign: BTreeSet<RoleName>,
}

impl<'a> Workbench<'a> {
    pub(crate) fn new(
        config: &'a SignConfig,
        base: &'a RoleSet,
        event: RoleSet,
        now: DateTime<Utc>,
    ) -> Self {
        Workbench {
            config,
            base,
            event,
            now,
            to_sign: BTreeSet::new(),
        }
    }

    /// Runs the state machine to completion and returns the resulting event state.
    pub(crate) async fn run(
        mut self,
        input: &mut dyn InputSource,
        source: &dyn KeySource,
    ) -> Result<RoleSet> {
        let mut state = WizardState::AcceptInvites;
        while state != WizardState::Done {
            state = match state {
                WizardState::AcceptInvites => {
                    self.accept_invites(input, source).await?;
                    WizardState::SelectRole
                }
                WizardState::SelectRole => {
                    let answer =
                        input.read_line("role to configure (or 'continue' to sign): ")?;
                    let answer = answer.trim();
                    if answer.is_empty() || answer == "continue" {
                        WizardState::Sign
                    } else {
                        match RoleName::from_str(answer) {
                            Ok(role) if self.event.delegation_for(&role).is_ok() => {
                                WizardState::RoleMenu(role)
                            }
                            _ => {
                                warn!("no delegation found for role {answer:?}");
                                WizardState::SelectRole
                            }
                        }
                    }
                }
                WizardState::RoleMenu(role) => {
                    let rule = self.event.delegation_for(&role)?;
                    self.show_rule(&rule);
                    let answer = input
                        .read_line("configure signers, configure expiry, or continue: ")?;
                    match answer.trim() {
                        "configure signers" | "signers" => {
                            self.configure_signers(input, &role)?;
                            WizardState::RoleMenu(role)
                        }
                        "configure expiry" | "expiry" => {
                            self.configure_expiry(input, &role)?;
                            WizardState::RoleMenu(role)
                        }
                        _ => WizardState::SelectRole,
                    }
                }
                WizardState::Sign => {
                    self.sign_changed(source).await?;
                    WizardState::Done
                }
                WizardState::Done => WizardState::Done,
            };
        }
        Ok(self.event)
    }

    fn show_rule(&self, rule: &DelegationRule) {
        let owners: Vec<String> = rule
            .keys
            .values()
            .filter_map(|key| key.keyowner.clone())
            .collect();
        info!(
            "role {}: signers [{}], threshold {}, expiry period {:?} days, signing period {:?} days, open invites [{}]",
            rule.role,
            owners.join(", "),
            rule.threshold,
            rule.expiry_period,
            rule.signing_period,
            rule.invites.join(", "),
        );
    }

    /// Offers every invite addressed to the configured handle: accepting binds a key to the
    /// delegating role, clears the invite, and queues the role for signing.
    async fn accept_invites(
        &mut self,
        input: &mut dyn InputSource,
        source: &dyn KeySource,
    ) -> Result<()> {
        let user = self.config.user_name.clone();
        let mut offered: Vec<RoleName> = Vec::new();
        if let Ok(root) = self.event.root() {
            for (role, handles) in &root.signed.invites {
                if handles.contains(&user) {
                    offered.push(RoleName::from_str(role).unwrap_or_else(|_| {
                        RoleName::Delegated(role.clone())
                    }));
                }
            }
        }
        if let Some(targets) = self.event.targets() {
            for (role, handles) in &targets.signed.invites {
                if handles.contains(&user) {
                    offered.push(RoleName::Delegated(role.clone()));
                }
            }
        }

        for role in offered {
            let answer =
                input.read_line(&format!("accept invitation to sign {role}? [y/N]: "))?;
            if !matches!(answer.trim(), "y" | "Y" | "yes") {
                continue;
            }
            let signer = self.ensure_key(source).await?;
            let mut key = signer.tuf_key();
            key.keyowner = Some(user.clone());
            self.bind_key(&role, key)?;
            self.to_sign.insert(role.clone());
            info!("accepted invitation to {role}");
        }
        Ok(())
    }

    /// Adds `key` to the role's delegating rule and clears the invite for this handle.
    fn bind_key(&mut self, role: &RoleName, key: Key) -> Result<()> {
        let user = self.config.user_name.clone();
        match role {
            RoleName::Delegated(name) => {
                let targets = self
                    .event
                    .get_mut(&RoleName::Targets)
                    .and_then(Metadata::as_targets_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no targets role to bind the key into",
                    })?;
                targets
                    .signed
                    .add_delegated_key(name, key)
                    .map_err(schema_error)?;
                clear_invite(&mut targets.signed.invites, name, &user);
                self.refresh_role(&RoleName::Targets)?;
            }
            top_level => {
                let role_type = role_type_of(top_level)?;
                let root = self
                    .event
                    .get_mut(&RoleName::Root)
                    .and_then(Metadata::as_root_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no root role to bind the key into",
                    })?;
                root.signed.add_role_key(role_type, key).map_err(schema_error)?;
                clear_invite(&mut root.signed.invites, &top_level.to_string(), &user);
                self.refresh_role(&RoleName::Root)?;
            }
        }
        Ok(())
    }

    /// Rewrites the signer list and threshold of a role: new handles become invites on the
    /// delegating role, absent handles lose their keys.
    fn configure_signers(&mut self, input: &mut dyn InputSource, role: &RoleName) -> Result<()> {
        let rule = self.event.delegation_for(role)?;
        let current: BTreeSet<String> = rule
            .keys
            .values()
            .filter_map(|key| key.keyowner.clone())
            .collect();

        let answer = input.read_line(&format!(
            "signers for {role}, comma-separated handles [{}]: ",
            current.iter().cloned().collect::<Vec<_>>().join(", ")
        ))?;
        let wanted: BTreeSet<String> = answer
            .split(',')
            .map(str::trim)
            .filter(|handle| !handle.is_empty())
            .map(str::to_string)
            .collect();
        if wanted.is_empty() {
            warn!("signer list unchanged");
            return Ok(());
        }
        let threshold_answer =
            input.read_line(&format!("threshold [{}]: ", rule.threshold))?;
        let threshold = if threshold_answer.trim().is_empty() {
            rule.threshold
        } else {
            threshold_answer
                .trim()
                .parse::<NonZeroU64>()
                .map_err(|e| error::Error::Signer {
                    reason: format!("threshold must be a positive integer: {e}"),
                })?
        };

        let added: Vec<String> = wanted.difference(&current).cloned().collect();
        let removed: Vec<String> = current.difference(&wanted).cloned().collect();
        let removed_keyids: Vec<String> = rule
            .keys
            .iter()
            .filter(|(_, key)| {
                key.keyowner
                    .as_ref()
                    .map(|owner| removed.contains(owner))
                    .unwrap_or(false)
            })
            .map(|(keyid, _)| keyid.clone())
            .collect();

        match role {
            RoleName::Delegated(name) => {
                let targets = self
                    .event
                    .get_mut(&RoleName::Targets)
                    .and_then(Metadata::as_targets_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no targets role",
                    })?;
                {
                    let entry = targets.signed.delegated_role_mut(name).map_err(schema_error)?;
                    entry.threshold = threshold;
                    entry.keyids.retain(|keyid| !removed_keyids.contains(keyid));
                }
                add_invites(&mut targets.signed.invites, name, &added);
                self.refresh_role(&RoleName::Targets)?;
            }
            top_level => {
                let role_type = role_type_of(top_level)?;
                let root = self
                    .event
                    .get_mut(&RoleName::Root)
                    .and_then(Metadata::as_root_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no root role",
                    })?;
                {
                    let entry = root
                        .signed
                        .roles
                        .get_mut(&role_type)
                        .context(error::SignerSnafu {
                            reason: format!("root does not delegate {top_level}"),
                        })?;
                    entry.threshold = threshold;
                    entry.keyids.retain(|keyid| !removed_keyids.contains(keyid));
                }
                for keyid in &removed_keyids {
                    root.signed.remove_role_key(role_type, keyid).map_err(schema_error)?;
                }
                add_invites(&mut root.signed.invites, &top_level.to_string(), &added);
                self.refresh_role(&RoleName::Root)?;
            }
        }
        if !added.is_empty() {
            info!("invited {}", added.join(", "));
        }
        Ok(())
    }

    /// Updates the expiry and signing periods the delegating role records for `role`.
    fn configure_expiry(&mut self, input: &mut dyn InputSource, role: &RoleName) -> Result<()> {
        let rule = self.event.delegation_for(role)?;
        let expiry = prompt_days(input, "expiry period in days", rule.expiry_period)?;
        let signing = prompt_days(input, "signing period in days", rule.signing_period)?;

        match role {
            RoleName::Delegated(name) => {
                let targets = self
                    .event
                    .get_mut(&RoleName::Targets)
                    .and_then(Metadata::as_targets_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no targets role",
                    })?;
                let entry = targets.signed.delegated_role_mut(name).map_err(schema_error)?;
                entry.expiry_period = expiry;
                entry.signing_period = signing;
                self.refresh_role(&RoleName::Targets)?;
            }
            top_level => {
                let role_type = role_type_of(top_level)?;
                let root = self
                    .event
                    .get_mut(&RoleName::Root)
                    .and_then(Metadata::as_root_mut)
                    .context(error::SignerSnafu {
                        reason: "event has no root role",
                    })?;
                let entry = root
                    .signed
                    .roles
                    .get_mut(&role_type)
                    .context(error::SignerSnafu {
                        reason: format!("root does not delegate {top_level}"),
                    })?;
                entry.expiry_period = expiry;
                entry.signing_period = signing;
                self.refresh_role(&RoleName::Root)?;
            }
        }
        Ok(())
    }

    /// After editing a delegating role's content: make sure its version exceeds the baseline
    /// and its expiry is re-derived from its own policy.
    fn refresh_role(&mut self, role: &RoleName) -> Result<()> {
        let base_version = self
            .base
            .get(role)
            .map(|metadata| metadata.version().get())
            .unwrap_or(0);
        let period = self
            .event
            .delegation_for(role)
            .ok()
            .and_then(|rule| rule.expiry_period)
            .unwrap_or(365);
        let expires = self.now + Duration::days(i64::from(period));
        let metadata = self.event.get_mut(role).context(error::SignerSnafu {
            reason: format!("role {role} missing from the event"),
        })?;
        if metadata.version().get() <= base_version {
            metadata.set_version(
                NonZeroU64::new(base_version + 1).unwrap_or(NonZeroU64::MIN),
            );
        }
        metadata.set_expires(expires);
        Ok(())
    }

    /// Signs every offline role this signer is authorized for whose payload differs from the
    /// baseline, plus the roles queued by invite acceptance. Stale signatures by this signer
    /// are replaced.
    async fn sign_changed(&mut self, source: &dyn KeySource) -> Result<()> {
        let signer = self.ensure_key(source).await?;
        let public = signer.tuf_key().keyval.public;
        let rng = SystemRandom::new();

        let names: Vec<RoleName> = self.event.roles.keys().cloned().collect();
        for name in names {
            if name.is_online() {
                continue;
            }
            let changed = match (self.base.get(&name), self.event.get(&name)) {
                (Some(before), Some(after)) => {
                    before.canonical_form().map_err(schema_error)?
                        != after.canonical_form().map_err(schema_error)?
                }
                _ => true,
            };
            if !changed && !self.to_sign.contains(&name) {
                continue;
            }
            let Ok(rule) = self.event.delegation_for(&name) else {
                warn!("cannot resolve the delegation for {name}; leaving it unsigned");
                continue;
            };
            // Keys that may legitimately sign this role: the event's rule, plus the
            // baseline's during a rotation.
            let mut known = rule.keys.clone();
            if let Ok(base_rule) = self.base.delegation_for(&name) {
                known.extend(base_rule.keys);
            }

            let metadata = self.event.get_mut(&name).context(error::SignerSnafu {
                reason: format!("role {name} missing from the event"),
            })?;
            let canonical = metadata.canonical_form().map_err(schema_error)?;

            // Drop signatures that no longer verify; they were made over an older draft of
            // this event and would otherwise linger in the file.
            metadata.signatures_mut().retain(|s| {
                known
                    .get(&s.keyid)
                    .zip(hex::decode(&s.sig).ok())
                    .map(|(key, sig)| key.verify(&canonical, &sig).unwrap_or(false))
                    .unwrap_or(false)
            });

            let Some(keyid) = rule
                .keys
                .iter()
                .find(|(_, key)| key.keyval.public == public)
                .map(|(keyid, _)| keyid.clone())
            else {
                continue;
            };
            let sig = signer
                .sign(&canonical, &rng)
                .await
                .map_err(|e| error::Error::Signer {
                    reason: e.to_string(),
                })?;
            metadata.signatures_mut().retain(|s| s.keyid != keyid);
            metadata
                .signatures_mut()
                .push(playground::schema::Signature {
                    keyid,
                    sig: hex::encode(sig),
                });
            info!("signed {name} as {}", self.config.user_name);
        }
        Ok(())
    }

    /// Resolves the signer's key, generating and storing a fresh ed25519 key on first use of
    /// a file-backed source. Hardware tokens are external adapters and must be plugged in by
    /// the embedding binary.
    async fn ensure_key(&self, source: &dyn KeySource) -> Result<Box<dyn Sign>> {
        match source.as_sign().await {
            Ok(signer) => Ok(signer),
            Err(original) => {
                if self.config.pykcs11lib.is_some() {
                    return error::SignerSnafu {
                        reason: format!(
                            "the PKCS#11 bridge is provided by an external adapter \
                             (pykcs11lib is configured): {original}"
                        ),
                    }
                    .fail();
                }
                let rng = SystemRandom::new();
                let document =
                    Ed25519KeyPair::generate_pkcs8(&rng).map_err(|e| error::Error::Signer {
                        reason: format!("cannot generate a signing key: {e}"),
                    })?;
                let pem = pem::encode_config(
                    &pem::Pem::new("PRIVATE KEY".to_owned(), document.as_ref().to_vec()),
                    pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
                );
                let keypair = Ed25519KeyPair::from_pkcs8(document.as_ref()).map_err(|e| {
                    error::Error::Signer {
                        reason: format!("generated key is unusable: {e}"),
                    }
                })?;
                let keyid = keypair.tuf_key().key_id().map_err(schema_error)?;
                source
                    .write(&pem, &keyid)
                    .await
                    .map_err(|e| error::Error::Signer {
                        reason: format!("cannot store the new signing key: {e}"),
                    })?;
                info!("generated a new signing key ({keyid})");
                source.as_sign().await.map_err(|e| error::Error::Signer {
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn schema_error(source: playground::schema::Error) -> error::Error {
    error::Error::Playground {
        source: playground::error::Error::Schema {
            role: "event".to_string(),
            source,
        },
    }
}

fn role_type_of(role: &RoleName) -> Result<RoleType> {
    match role {
        RoleName::Root => Ok(RoleType::Root),
        RoleName::Timestamp => Ok(RoleType::Timestamp),
        RoleName::Snapshot => Ok(RoleType::Snapshot),
        RoleName::Targets => Ok(RoleType::Targets),
        RoleName::Delegated(name) => error::SignerSnafu {
            reason: format!("{name} is not a top-level role"),
        }
        .fail(),
    }
}

fn clear_invite(
    invites: &mut std::collections::BTreeMap<String, Vec<String>>,
    role: &str,
    user: &str,
) {
    if let Some(handles) = invites.get_mut(role) {
        handles.retain(|handle| handle != user);
        if handles.is_empty() {
            invites.remove(role);
        }
    }
}

fn add_invites(
    invites: &mut std::collections::BTreeMap<String, Vec<String>>,
    role: &str,
    handles: &[String],
) {
    if handles.is_empty() {
        return;
    }
    let entry = invites.entry(role.to_string()).or_default();
    for handle in handles {
        if !entry.contains(handle) {
            entry.push(handle.clone());
        }
    }
    entry.sort();
}

fn prompt_days(
    input: &mut dyn InputSource,
    what: &str,
    current: Option<u32>,
) -> Result<Option<u32>> {
    let answer = input.read_line(&format!("{what} [{current:?}]: "))?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(current);
    }
    answer
        .parse::<u32>()
        .map(Some)
        .map_err(|e| error::Error::Signer {
            reason: format!("{what} must be a number of days: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedInput;
    use playground::key_source::LocalKeySource;
    use playground::repo::RoleSet;
    use playground::schema::key::KeyVal;
    use playground::schema::{
        Metadata, RoleKeys, Root, Signature, Signed, Targets, VerifyOutcome,
    };
    use ring::signature::KeyPair;
    use std::collections::BTreeMap;

    fn nz(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    fn day0() -> DateTime<Utc> {
        chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 1, 1, 0, 0, 0).unwrap()
    }

    struct TestUser {
        handle: String,
        keypair: Ed25519KeyPair,
    }

    impl TestUser {
        fn new(handle: &str, seed: u8) -> Self {
            TestUser {
                handle: handle.to_string(),
                keypair: Ed25519KeyPair::from_seed_unchecked(&[seed; 32]).unwrap(),
            }
        }

        fn key(&self) -> Key {
            Key {
                keytype: "ed25519".to_string(),
                scheme: "ed25519".to_string(),
                keyval: KeyVal {
                    public: hex::encode(self.keypair.public_key().as_ref()),
                    _extra: BTreeMap::new(),
                },
                online_uri: None,
                keyowner: Some(self.handle.clone()),
                _extra: BTreeMap::new(),
            }
        }

        fn sign(&self, metadata: &mut Metadata) {
            let canonical = metadata.canonical_form().unwrap();
            let sig = self.keypair.sign(&canonical);
            metadata.signatures_mut().push(Signature {
                keyid: self.key().key_id().unwrap(),
                sig: hex::encode(sig.as_ref()),
            });
        }
    }

    fn config_for(user: &str) -> SignConfig {
        SignConfig {
            pykcs11lib: None,
            user_name: user.to_string(),
            pull_remote: "origin".to_string(),
            push_remote: "origin".to_string(),
        }
    }

    fn role_keys(keyids: Vec<String>, threshold: u64) -> RoleKeys {
        RoleKeys {
            keyids,
            threshold: nz(threshold),
            expiry_period: Some(365),
            signing_period: Some(60),
            _extra: BTreeMap::new(),
        }
    }

    fn baseline(user1: &TestUser) -> RoleSet {
        let mut keys = BTreeMap::new();
        keys.insert(user1.key().key_id().unwrap(), user1.key());
        let mut roles = BTreeMap::new();
        for role_type in [
            RoleType::Root,
            RoleType::Targets,
            RoleType::Snapshot,
            RoleType::Timestamp,
        ] {
            roles.insert(
                role_type,
                role_keys(vec![user1.key().key_id().unwrap()], 1),
            );
        }
        let root = Root {
            spec_version: playground::SPEC_VERSION.to_string(),
            consistent_snapshot: true,
            version: nz(1),
            expires: day0() + Duration::days(365),
            keys,
            roles,
            invites: BTreeMap::new(),
            _extra: BTreeMap::new(),
        };
        let targets = Targets::new(
            playground::SPEC_VERSION.to_string(),
            nz(1),
            day0() + Duration::days(365),
        );

        let mut set = RoleSet::default();
        let mut root_metadata = Metadata::Root(Signed {
            signed: root,
            signatures: Vec::new(),
        });
        user1.sign(&mut root_metadata);
        set.insert(RoleName::Root, root_metadata);
        let mut targets_metadata = Metadata::Targets(Signed {
            signed: targets,
            signatures: Vec::new(),
        });
        user1.sign(&mut targets_metadata);
        set.insert(RoleName::Targets, targets_metadata);
        set
    }

    fn key_source(dir: &std::path::Path) -> LocalKeySource {
        LocalKeySource {
            path: dir.join("signing-key.pem"),
            password: None,
        }
    }

    #[tokio::test]
    async fn configure_signers_adds_an_invite_and_bumps_the_version() {
        let user1 = TestUser::new("@user1", 1);
        let base = baseline(&user1);
        let config = config_for("@user1");
        let dir = tempfile::TempDir::new().unwrap();

        // Raise the root threshold to 2 and add @user2.
        let mut input = ScriptedInput::new(&[
            "root",
            "configure signers",
            "@user1, @user2",
            "2",
            "continue",
            "continue",
        ]);
        let workbench = Workbench::new(&config, &base, base.clone(), day0());
        let event = workbench
            .run(&mut input, &key_source(dir.path()))
            .await
            .unwrap();

        let root = event.root().unwrap();
        assert_eq!(root.signed.version.get(), 2);
        assert_eq!(root.signed.invites["root"], vec!["@user2".to_string()]);
        assert_eq!(
            root.signed.roles[&RoleType::Root].threshold.get(),
            2
        );
        // user1's key set is untouched until @user2 accepts; the old signature over v1 was
        // pruned as stale.
        assert_eq!(event.delegation_for(&RoleName::Root).unwrap().keys.len(), 1);
        assert!(event
            .get(&RoleName::Root)
            .unwrap()
            .signatures()
            .is_empty());
    }

    #[tokio::test]
    async fn accepting_an_invitation_binds_a_key_and_signs() {
        let user1 = TestUser::new("@user1", 1);
        let mut base = baseline(&user1);

        // The baseline already carries the open invite for @user2 at threshold 2.
        {
            let root = base
                .get_mut(&RoleName::Root)
                .and_then(Metadata::as_root_mut)
                .unwrap();
            root.signed.roles.get_mut(&RoleType::Root).unwrap().threshold = nz(2);
            root.signed
                .invites
                .insert("root".to_string(), vec!["@user2".to_string()]);
        }

        let config = config_for("@user2");
        let dir = tempfile::TempDir::new().unwrap();
        let source = key_source(dir.path());

        let mut input = ScriptedInput::new(&["y", "continue"]);
        let workbench = Workbench::new(&config, &base, base.clone(), day0());
        let event = workbench.run(&mut input, &source).await.unwrap();

        let root = event.root().unwrap();
        assert!(root.signed.invites.is_empty(), "invite must be cleared");
        assert_eq!(root.signed.version.get(), 2);
        let rule = event.delegation_for(&RoleName::Root).unwrap();
        assert_eq!(rule.keys.len(), 2);
        let owners: Vec<_> = rule
            .keys
            .values()
            .filter_map(|key| key.keyowner.clone())
            .collect();
        assert!(owners.contains(&"@user2".to_string()));

        // The generated key signed the changed root; user2's signature verifies.
        let verification = event.verify_role(&RoleName::Root).unwrap();
        assert!(verification.invalid.is_empty());
        assert_eq!(verification.valid.len(), 1);
        assert!(matches!(
            verification.outcome(),
            VerifyOutcome::Insufficient { valid: 1, threshold: 2 }
        ));

        // The key file was created and is reusable.
        assert!(dir.path().join("signing-key.pem").is_file());
    }

    #[tokio::test]
    async fn configure_expiry_updates_the_delegation_policy() {
        let user1 = TestUser::new("@user1", 1);
        let base = baseline(&user1);
        let config = config_for("@user1");
        let dir = tempfile::TempDir::new().unwrap();

        let mut input = ScriptedInput::new(&[
            "snapshot",
            "configure expiry",
            "10",
            "4",
            "continue",
            "continue",
        ]);
        let workbench = Workbench::new(&config, &base, base.clone(), day0());
        let event = workbench
            .run(&mut input, &key_source(dir.path()))
            .await
            .unwrap();

        let rule = event.delegation_for(&RoleName::Snapshot).unwrap();
        assert_eq!(rule.expiry_period, Some(10));
        assert_eq!(rule.signing_period, Some(4));
        assert_eq!(event.root().unwrap().signed.version.get(), 2);
    }

    #[tokio::test]
    async fn unknown_roles_are_rejected_and_the_wizard_continues() {
        let user1 = TestUser::new("@user1", 1);
        let base = baseline(&user1);
        let config = config_for("@user1");
        let dir = tempfile::TempDir::new().unwrap();

        let mut input = ScriptedInput::new(&["no-such-role", "continue"]);
        let workbench = Workbench::new(&config, &base, base.clone(), day0());
        let event = workbench
            .run(&mut input, &key_source(dir.path()))
            .await
            .unwrap();
        assert_eq!(event, base);
    }
}
