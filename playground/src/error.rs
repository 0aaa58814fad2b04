// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library, plus the closed set of error kinds the engines
//! surface at their boundaries.

#![allow(clippy::default_trait_access)]

use crate::schema;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The operation was cancelled before any file was written.
    #[snafu(display("Operation cancelled; working tree untouched"))]
    Cancelled,

    /// Failed to create a directory.
    #[snafu(display("Failed to create directory {}: {}", path.display(), source))]
    DirCreate {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// An expiry did not match the delegating role's expiry policy.
    #[snafu(display("Expiry {} for role {} violates policy: {}", expires, role, detail))]
    ExpiryPolicy {
        /// The role.
        role: String,
        /// The offending expiry.
        expires: DateTime<Utc>,
        /// What the policy expected.
        detail: String,
    },

    /// Failed to persist an atomically-written file.
    #[snafu(display("Failed to persist temporary file to {}: {}", path.display(), source))]
    FilePersist {
        /// The destination.
        path: PathBuf,
        /// The underlying error.
        source: tempfile::PersistError,
    },

    /// Failed to read a file.
    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    FileRead {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failed to create a temporary file.
    #[snafu(display("Failed to create temporary file in {}: {}", path.display(), source))]
    FileTempCreate {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    FileWrite {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failed to run git.
    #[snafu(display("Failed to run '{}': {}", command_str, source))]
    GitCommandExec {
        /// The command line.
        command_str: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Git exited unsuccessfully.
    #[snafu(display("Command '{}' failed: {}", command_str, stderr.trim()))]
    GitCommandStatus {
        /// The command line.
        command_str: String,
        /// What git printed to stderr.
        stderr: String,
    },

    /// Git produced output that was not UTF-8.
    #[snafu(display("Command '{}' output is not valid UTF-8: {}", command_str, source))]
    GitCommandUtf8 {
        /// The command line.
        command_str: String,
        /// The underlying error.
        source: std::string::FromUtf8Error,
    },

    /// A repository invariant would be violated by the requested operation.
    #[snafu(display("Invariant violated for role {}: {}", role, reason))]
    InvariantViolation {
        /// The role.
        role: String,
        /// The invariant.
        reason: String,
    },

    /// A private key was readable but rejected by the crypto layer.
    #[snafu(display("Unable to parse keypair: {}", source))]
    KeyRejected {
        /// The underlying error.
        source: ring::error::KeyRejected,
    },

    /// A private key was in no recognized format.
    #[snafu(display("Unable to match any supported key format"))]
    KeyUnrecognized,

    /// A required field was absent.
    #[snafu(display("Missing field: {}", field))]
    Missing {
        /// The absent field.
        field: String,
    },

    /// A schema-level failure: malformed metadata, unknown scheme, dangling key reference.
    #[snafu(display("Metadata error for role {}: {}", role, source))]
    Schema {
        /// The role being processed.
        role: String,
        /// The underlying error.
        source: schema::Error,
    },

    /// Signing failed in the signer backend.
    #[snafu(display("Failed to sign message: {}", source))]
    Sign {
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A signature made during this run did not verify against the signing key.
    #[snafu(display("Signature by key {} for role {} was rejected", keyid, role))]
    SignatureRejected {
        /// The role being signed.
        role: String,
        /// The signing key ID.
        keyid: String,
    },

    /// No signer backend could be resolved for an online URI.
    #[snafu(display("Signer unavailable for {}: {}", uri, reason))]
    SignerUnavailable {
        /// The key URI.
        uri: String,
        /// Why the backend could not be used.
        reason: String,
    },

    /// A version moved backwards.
    #[snafu(display("Version regression for role {}: {} -> {}", role, current, proposed))]
    VersionRegression {
        /// The role.
        role: String,
        /// The committed version.
        current: u64,
        /// The proposed version.
        proposed: u64,
    },

    /// Failed to walk a directory tree.
    #[snafu(display("Failed to walk directory {}: {}", directory.display(), source))]
    WalkDir {
        /// The directory.
        directory: PathBuf,
        /// The underlying error.
        source: walkdir::Error,
    },
}

/// The closed set of error kinds surfaced at engine boundaries. CI steps branch on these, not
/// on the detailed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Required fields absent or typed wrong.
    MalformedMetadata,
    /// A key scheme not implemented by the active signer backend.
    UnknownScheme,
    /// A signer backend could not be reached or produced no signer.
    SignerUnavailable,
    /// A signature failed verification, or signing was rejected.
    SignatureRejected,
    /// A repository invariant would be broken.
    InvariantViolation,
    /// A role version moved backwards.
    VersionRegression,
    /// An expiry fell outside the delegating role's policy.
    ExpiryPolicyViolation,
    /// The git surface (or the working tree behind it) failed.
    GitSurfaceError,
    /// The invocation was cancelled.
    Cancelled,
}

impl Error {
    /// Classifies this error into the closed kind set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Cancelled => ErrorKind::Cancelled,
            Error::DirCreate { .. }
            | Error::FilePersist { .. }
            | Error::FileRead { .. }
            | Error::FileTempCreate { .. }
            | Error::FileWrite { .. }
            | Error::GitCommandExec { .. }
            | Error::GitCommandStatus { .. }
            | Error::GitCommandUtf8 { .. }
            | Error::WalkDir { .. } => ErrorKind::GitSurfaceError,
            Error::ExpiryPolicy { .. } => ErrorKind::ExpiryPolicyViolation,
            Error::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Error::KeyRejected { .. } | Error::KeyUnrecognized | Error::SignerUnavailable { .. } => {
                ErrorKind::SignerUnavailable
            }
            Error::Missing { .. } => ErrorKind::MalformedMetadata,
            Error::Schema { source, .. } => match source {
                schema::Error::UnknownScheme { .. } => ErrorKind::UnknownScheme,
                _ => ErrorKind::MalformedMetadata,
            },
            Error::Sign { .. } | Error::SignatureRejected { .. } => ErrorKind::SignatureRejected,
            Error::VersionRegression { .. } => ErrorKind::VersionRegression,
        }
    }
}
