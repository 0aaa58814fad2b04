// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keys as they appear in metadata key maps, plus signature verification.

use crate::schema::error::{self, Result};
use olpc_cjson::CanonicalFormatter;
use pkcs8::der::Decode;
use pkcs8::spki::SubjectPublicKeyInfoRef;
use ring::digest::{digest, SHA256};
use ring::signature::UnparsedPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::BTreeMap;

/// The ed25519 signature scheme.
pub const SCHEME_ED25519: &str = "ed25519";
/// The ECDSA P-256 / SHA-256 signature scheme, ASN.1 DER signatures.
pub const SCHEME_ECDSA_NISTP256: &str = "ecdsa-sha2-nistp256";
/// The RSASSA-PSS / SHA-256 signature scheme.
pub const SCHEME_RSASSA_PSS_SHA256: &str = "rsassa-pss-sha256";

/// A public key as stored in root metadata or a delegations key map.
///
/// The key type and scheme are kept as strings: a scheme this crate does not implement must
/// still load (and round-trip byte-for-byte), surfacing `UnknownScheme` only when the key is
/// actually used to sign or verify.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Key {
    /// Key type identifier, e.g. "ed25519".
    pub keytype: String,

    /// The signature scheme this key signs with.
    pub scheme: String,

    /// The public portion of the key.
    pub keyval: KeyVal,

    /// URI of the online signer holding this key. Present exactly when this is an online key.
    #[serde(
        rename = "x-playground-online-uri",
        skip_serializing_if = "Option::is_none"
    )]
    pub online_uri: Option<String>,

    /// Handle of the human responsible for this key. Present exactly when this is an offline key.
    #[serde(
        rename = "x-playground-keyowner",
        skip_serializing_if = "Option::is_none"
    )]
    pub keyowner: Option<String>,

    /// Extra fields found during deserialization, preserved verbatim through a round-trip.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

/// The value of a public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeyVal {
    /// The public key material: hex for ed25519 and ECDSA point encodings, PEM for RSA.
    pub public: String,

    /// Extra fields found during deserialization.
    #[serde(flatten)]
    pub _extra: BTreeMap<String, Value>,
}

impl Key {
    /// Calculates the key ID: the hex-encoded SHA-256 digest of this key's canonical form.
    pub fn key_id(&self) -> Result<String> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key" })?;
        Ok(hex::encode(digest(&SHA256, &buf)))
    }

    /// Whether this key is held by an online signer.
    pub fn is_online(&self) -> bool {
        self.online_uri.is_some()
    }

    /// Verifies `sig` over `msg` with this key.
    ///
    /// Returns `Ok(false)` for a signature that does not verify, and an error when the scheme
    /// is not implemented or the public key cannot be decoded.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<bool> {
        let (algorithm, public): (&dyn ring::signature::VerificationAlgorithm, Vec<u8>) =
            match self.scheme.as_str() {
                SCHEME_ED25519 => (
                    &ring::signature::ED25519,
                    hex::decode(&self.keyval.public).context(error::HexDecodeSnafu {
                        context: "ed25519 public key",
                    })?,
                ),
                SCHEME_ECDSA_NISTP256 => (
                    &ring::signature::ECDSA_P256_SHA256_ASN1,
                    self.decode_public()?,
                ),
                SCHEME_RSASSA_PSS_SHA256 => (
                    &ring::signature::RSA_PSS_2048_8192_SHA256,
                    self.decode_public()?,
                ),
                _ => {
                    return error::UnknownSchemeSnafu {
                        scheme: self.scheme.as_str(),
                    }
                    .fail()
                }
            };
        Ok(UnparsedPublicKey::new(algorithm, &public)
            .verify(msg, sig)
            .is_ok())
    }

    /// Decodes the public key material to the raw form ring expects: the inner bit string of a
    /// PEM SPKI document, the body of a PKCS#1 `RSA PUBLIC KEY` document, or hex-encoded bytes.
    fn decode_public(&self) -> Result<Vec<u8>> {
        let public = self.keyval.public.trim();
        if !public.starts_with("-----BEGIN") {
            return hex::decode(public).context(error::HexDecodeSnafu {
                context: "public key",
            });
        }
        let pem = pem::parse(public).map_err(|e| error::Error::UndecodableKey {
            scheme: self.scheme.clone(),
            reason: e.to_string(),
        })?;
        match pem.tag() {
            "PUBLIC KEY" => {
                let spki = SubjectPublicKeyInfoRef::from_der(pem.contents()).map_err(|e| {
                    error::Error::UndecodableKey {
                        scheme: self.scheme.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(spki.subject_public_key.raw_bytes().to_vec())
            }
            "RSA PUBLIC KEY" => Ok(pem.contents().to_vec()),
            tag => error::UndecodableKeySnafu {
                scheme: self.scheme.as_str(),
                reason: format!("unexpected PEM tag {tag}"),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_key(public: &str) -> Key {
        Key {
            keytype: "ed25519".to_string(),
            scheme: SCHEME_ED25519.to_string(),
            keyval: KeyVal {
                public: public.to_string(),
                _extra: BTreeMap::new(),
            },
            online_uri: None,
            keyowner: Some("@example".to_string()),
            _extra: BTreeMap::new(),
        }
    }

    #[test]
    fn key_id_is_stable() {
        let key = ed25519_key("2af4a5fc1bc1419f81a4c5f251746231ba21f5a552a0cf11cf6c45c8ec1c5b32");
        let a = key.key_id().unwrap();
        let b = key.key_id().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_id_depends_on_owner() {
        let a = ed25519_key("2af4a5fc1bc1419f81a4c5f251746231ba21f5a552a0cf11cf6c45c8ec1c5b32");
        let mut b = a.clone();
        b.keyowner = Some("@other".to_string());
        assert_ne!(a.key_id().unwrap(), b.key_id().unwrap());
    }

    #[test]
    fn unknown_scheme_is_surfaced_at_use() {
        let mut key = ed25519_key("00");
        key.scheme = "post-quantum-hash-tree".to_string();
        let err = key.verify(b"msg", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, error::Error::UnknownScheme { .. }));
    }

    #[test]
    fn custom_fields_round_trip() {
        let json = serde_json::json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": {"public": "aa"},
            "x-playground-keyowner": "@user1",
            "x-playground-unrecognized": {"nested": true},
        });
        let key: Key = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(key.keyowner.as_deref(), Some("@user1"));
        assert_eq!(
            serde_json::to_value(&key).unwrap(),
            json,
            "unrecognized fields must be preserved verbatim"
        );
    }
}
