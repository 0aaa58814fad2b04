// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reads `.playground-sign.ini`. The format is a flat INI: optional `[section]` headers are
//! skipped, `key = value` lines are collected, `#` and `;` start comments. No INI crate is
//! pulled in for four keys.

use crate::error::{self, Result};
use snafu::ResultExt;
use std::path::{Path, PathBuf};

/// The signer's local configuration.
#[derive(Debug, Clone)]
pub(crate) struct SignConfig {
    /// Path to the PKCS#11 shared library for hardware signing, when the signer uses one.
    pub pykcs11lib: Option<PathBuf>,
    /// Handle used to match `x-playground-keyowner` fields, e.g. `@user1`.
    pub user_name: String,
    /// Remote used for fetching event state.
    pub pull_remote: String,
    /// Remote used for pushing event updates.
    pub push_remote: String,
}

impl SignConfig {
    pub(crate) fn load(path: &Path) -> Result<SignConfig> {
        let contents = std::fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        let mut pykcs11lib = None;
        let mut user_name = None;
        let mut pull_remote = None;
        let mut push_remote = None;

        for raw_line in contents.lines() {
            let line = raw_line
                .split_once(&['#', ';'][..])
                .map_or(raw_line, |(before, _)| before)
                .trim();
            if line.is_empty() || (line.starts_with('[') && line.ends_with(']')) {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return error::ConfigInvalidSnafu {
                    path,
                    reason: format!("line is not `key = value`: {raw_line:?}"),
                }
                .fail();
            };
            let value = value.trim().to_string();
            match key.trim() {
                "pykcs11lib" => pykcs11lib = Some(PathBuf::from(value)),
                "user-name" => user_name = Some(value),
                "pull-remote" => pull_remote = Some(value),
                "push-remote" => push_remote = Some(value),
                other => log::debug!("ignoring unrecognized configuration key {other:?}"),
            }
        }

        Ok(SignConfig {
            pykcs11lib,
            user_name: user_name.ok_or_else(|| error::Error::ConfigInvalid {
                path: path.to_path_buf(),
                reason: "user-name is required".to_string(),
            })?,
            pull_remote: pull_remote.unwrap_or_else(|| "origin".to_string()),
            push_remote: push_remote.unwrap_or_else(|| "origin".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_all_keys() {
        let file = write_config(
            "[settings]\n\
             # hardware token\n\
             pykcs11lib = /usr/lib/libykcs11.so\n\
             user-name = @user1  ; handle\n\
             pull-remote = upstream\n\
             push-remote = fork\n",
        );
        let config = SignConfig::load(file.path()).unwrap();
        assert_eq!(config.pykcs11lib.as_deref().unwrap().to_str().unwrap(), "/usr/lib/libykcs11.so");
        assert_eq!(config.user_name, "@user1");
        assert_eq!(config.pull_remote, "upstream");
        assert_eq!(config.push_remote, "fork");
    }

    #[test]
    fn remotes_default_to_origin() {
        let file = write_config("user-name = @user2\n");
        let config = SignConfig::load(file.path()).unwrap();
        assert_eq!(config.pull_remote, "origin");
        assert_eq!(config.push_remote, "origin");
        assert!(config.pykcs11lib.is_none());
    }

    #[test]
    fn user_name_is_required() {
        let file = write_config("pull-remote = origin\n");
        assert!(SignConfig::load(file.path()).is_err());
    }

    #[test]
    fn rejects_bare_words() {
        let file = write_config("not a key value line\n");
        assert!(SignConfig::load(file.path()).is_err());
    }
}
