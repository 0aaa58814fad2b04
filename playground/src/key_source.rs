// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides an abstraction over the source of a signing key, and the registry that resolves a
//! key's `x-playground-online-uri` to a backend by URI scheme.
//!
//! Hardware tokens and cloud KMS backends are external collaborators: an embedding binary
//! registers their factories here. This crate ships the local-file backend and the test-only
//! backend driven by the `LOCAL_TESTING_KEY` environment variable.

use crate::error::{self, Result};
use crate::sign::{parse_keypair, Sign};
use async_trait::async_trait;
use ring::signature::Ed25519KeyPair;
use snafu::{OptionExt as _, ResultExt};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::path::PathBuf;

/// The environment variable holding a hex-encoded ed25519 seed that enables the test-only
/// online signer backend, bypassing any cloud KMS.
pub const LOCAL_TESTING_KEY_VAR: &str = "LOCAL_TESTING_KEY";

/// This trait should be implemented for each source of signing keys. Examples
/// of sources include: files, hardware tokens, cloud key stores.
#[async_trait]
pub trait KeySource: Debug + Send + Sync {
    /// Returns an object that implements the `Sign` trait
    async fn as_sign(
        &self,
    ) -> std::result::Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>>;

    /// Writes a key back to the `KeySource`
    async fn write(
        &self,
        value: &str,
        key_id_hex: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// Points to a local key using a filesystem path.
#[derive(Debug)]
pub struct LocalKeySource {
    /// The path to a local key file in PEM pkcs8 or RSA format.
    pub path: PathBuf,
    /// Optional password for the key file.
    pub password: Option<String>,
}

/// Implements the `KeySource` trait for a `LocalKeySource` (file)
#[async_trait]
impl KeySource for LocalKeySource {
    async fn as_sign(
        &self,
    ) -> std::result::Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>>
    {
        let data = tokio::fs::read(&self.path)
            .await
            .context(error::FileReadSnafu { path: &self.path })?;
        let password: Option<&str> = self.password.as_deref();
        Ok(Box::new(parse_keypair(&data, password)?))
    }

    async fn write(
        &self,
        value: &str,
        _key_id_hex: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(tokio::fs::write(&self.path, value.as_bytes())
            .await
            .context(error::FileWriteSnafu { path: &self.path })?)
    }
}

/// The test-only signer backend: an ed25519 seed taken from `LOCAL_TESTING_KEY`.
#[derive(Debug, Clone, Copy)]
pub struct LocalTestingKeySource;

#[async_trait]
impl KeySource for LocalTestingKeySource {
    async fn as_sign(
        &self,
    ) -> std::result::Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>>
    {
        let hex_seed =
            std::env::var(LOCAL_TESTING_KEY_VAR).map_err(|_| error::Error::SignerUnavailable {
                uri: LOCAL_TESTING_KEY_VAR.to_string(),
                reason: "environment variable is not set".to_string(),
            })?;
        let seed = hex::decode(hex_seed.trim()).map_err(|e| error::Error::SignerUnavailable {
            uri: LOCAL_TESTING_KEY_VAR.to_string(),
            reason: format!("value is not hex: {e}"),
        })?;
        let pair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .context(error::KeyRejectedSnafu)?;
        Ok(Box::new(pair))
    }

    async fn write(
        &self,
        _value: &str,
        _key_id_hex: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Err(Box::new(error::Error::SignerUnavailable {
            uri: LOCAL_TESTING_KEY_VAR.to_string(),
            reason: "the test-only backend cannot store keys".to_string(),
        }))
    }
}

type KeySourceFactory = Box<dyn Fn(&str) -> Result<Box<dyn KeySource>> + Send + Sync>;

/// Resolves `x-playground-online-uri` values (and offline key URIs from local configuration)
/// to key sources, keyed on the URI scheme.
pub struct SignerRegistry {
    factories: HashMap<String, KeySourceFactory>,
}

impl Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SignerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        SignerRegistry {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with the backends this crate ships: `file:` keys on disk.
    ///
    /// Cloud KMS schemes (`gcpkms:`, `azurekms:`) and the ambient keyless backend are external
    /// adapters; register them with [`SignerRegistry::register`]. When `LOCAL_TESTING_KEY` is
    /// set, every URI resolves to the test-only backend instead.
    pub fn with_defaults() -> Self {
        let mut registry = SignerRegistry::new();
        registry.register("file", |uri| {
            let path = uri.trim_start_matches("file:").trim_start_matches("//");
            Ok(Box::new(LocalKeySource {
                path: PathBuf::from(path),
                password: None,
            }))
        });
        registry
    }

    /// Registers a backend factory for a URI scheme.
    pub fn register<F>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn KeySource>> + Send + Sync + 'static,
    {
        self.factories.insert(scheme.to_string(), Box::new(factory));
    }

    /// Resolves `uri` to a key source.
    pub fn resolve(&self, uri: &str) -> Result<Box<dyn KeySource>> {
        if std::env::var_os(LOCAL_TESTING_KEY_VAR).is_some() {
            return Ok(Box::new(LocalTestingKeySource));
        }
        let Some((scheme, _)) = uri.split_once(':') else {
            return error::SignerUnavailableSnafu {
                uri,
                reason: "URI has no scheme",
            }
            .fail();
        };
        let factory = self
            .factories
            .get(scheme)
            .context(error::SignerUnavailableSnafu {
                uri,
                reason: format!(
                    "no signer backend registered for scheme '{scheme}' \
                     (cloud credentials absent and LOCAL_TESTING_KEY unset)"
                ),
            })?;
        factory(uri)
    }
}

impl Default for SignerRegistry {
    fn default() -> Self {
        SignerRegistry::with_defaults()
    }
}
