// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the metadata schema.

use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the schema module.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A duplicate key ID was present in a key map.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId {
        /// The duplicate key ID.
        keyid: String,
    },

    /// A hex-encoded field could not be decoded.
    #[snafu(display("Invalid hex in {}: {}", context, source))]
    HexDecode {
        /// What was being decoded.
        context: String,
        /// The underlying error.
        source: hex::FromHexError,
    },

    /// A key ID in a key map did not match the key's computed ID.
    #[snafu(display("Key ID {} does not match calculated ID {}", keyid, calculated))]
    InvalidKeyId {
        /// The key ID stored in the metadata.
        keyid: String,
        /// The ID calculated from the key itself.
        calculated: String,
    },

    /// Failed to serialize a metadata object to canonical JSON.
    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        /// What was being serialized.
        what: String,
        /// The underlying error.
        source: serde_json::Error,
    },

    /// A key referenced by a delegation was absent from the key map.
    #[snafu(display("Key {} referenced by role {} is not in the key map", keyid, role))]
    KeyNotFound {
        /// The role holding the dangling reference.
        role: String,
        /// The missing key ID.
        keyid: String,
    },

    /// Metadata was structurally unusable.
    #[snafu(display("Malformed metadata for role {}: {}", role, reason))]
    MalformedMetadata {
        /// The role whose metadata is malformed.
        role: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A named role was not present in the role set.
    #[snafu(display("Role {} not found", name))]
    RoleNotFound {
        /// The missing role.
        name: String,
    },

    /// A public key could not be decoded into a usable form.
    #[snafu(display("Cannot decode public key with scheme {}: {}", scheme, reason))]
    UndecodableKey {
        /// The scheme of the offending key.
        scheme: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A signature scheme is not implemented by this crate.
    #[snafu(display("Signature scheme {} is not implemented", scheme))]
    UnknownScheme {
        /// The unimplemented scheme.
        scheme: String,
    },
}
