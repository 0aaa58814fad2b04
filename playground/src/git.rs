// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The abstract git surface the engines read refs through, plus two implementations: a thin
//! wrapper over the `git` binary, and an in-memory surface for tests and replay.
//!
//! The engines never mutate a ref themselves; commits and pushes happen only at the explicit
//! calls here, driven by the CLI layer.

use crate::error::{self, Result};
use async_trait::async_trait;
use snafu::{ensure, ResultExt};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;

/// Read and write access to repository refs. `read_file` and `list_files` address committed
/// state; `commit`, `commit_branch`, and `push` are the only mutation points.
#[async_trait]
pub trait GitSurface: Debug + Send + Sync {
    /// Reads `path` from `reference`. Returns `Ok(None)` when the path does not exist there.
    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// Lists the files under `dir` in `reference`, as repository-relative paths.
    async fn list_files(&self, reference: &str, dir: &str) -> Result<Vec<String>>;

    /// Stages `paths` in the working tree and commits them to the current branch.
    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<()>;

    /// Creates `branch` from `base` containing `files` (repository-relative path to contents)
    /// as a single commit, without touching the current working tree.
    async fn commit_branch(
        &self,
        branch: &str,
        base: &str,
        files: &[(String, Vec<u8>)],
        message: &str,
    ) -> Result<()>;

    /// Pushes `refspec` to `remote`.
    async fn push(&self, remote: &str, refspec: &str) -> Result<()>;
}

/// A git surface backed by the `git` binary, operating on a local checkout.
#[derive(Debug)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    /// Creates a surface over the checkout at `workdir`.
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        GitCli {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let command_str = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .context(error::GitCommandExecSnafu {
                command_str: command_str.as_str(),
            })?;
        ensure!(
            output.status.success(),
            error::GitCommandStatusSnafu {
                command_str,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
        );
        Ok(output.stdout)
    }
}

#[async_trait]
impl GitSurface for GitCli {
    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let spec = format!("{reference}:{path}");
        match self.run(&["show", &spec]).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error::Error::GitCommandStatus { stderr, .. })
                if stderr.contains("does not exist")
                    || stderr.contains("exists on disk, but not in") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_files(&self, reference: &str, dir: &str) -> Result<Vec<String>> {
        let stdout = match self
            .run(&["ls-tree", "-r", "--name-only", reference, "--", dir])
            .await
        {
            Ok(stdout) => stdout,
            // An empty repository (unborn base ref) has no files.
            Err(error::Error::GitCommandStatus { stderr, .. })
                if stderr.contains("Not a valid object name") =>
            {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        let stdout =
            String::from_utf8(stdout).context(error::GitCommandUtf8Snafu {
                command_str: format!("git ls-tree -r --name-only {reference} -- {dir}"),
            })?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.display().to_string()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        self.run(&["commit", "-q", "-m", message]).await?;
        Ok(())
    }

    async fn commit_branch(
        &self,
        branch: &str,
        base: &str,
        files: &[(String, Vec<u8>)],
        message: &str,
    ) -> Result<()> {
        let scratch = tempfile::tempdir().context(error::FileTempCreateSnafu {
            path: &self.workdir,
        })?;
        let scratch_path = scratch.path().join("worktree");
        let scratch_str = scratch_path.display().to_string();
        self.run(&["worktree", "add", "--detach", &scratch_str, base])
            .await?;
        let result = async {
            for (path, contents) in files {
                let dest = scratch_path.join(path);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context(error::DirCreateSnafu { path: parent })?;
                }
                tokio::fs::write(&dest, contents)
                    .await
                    .context(error::FileWriteSnafu { path: &dest })?;
            }
            let scratch_git = GitCli::new(&scratch_path);
            scratch_git.run(&["add", "-A"]).await?;
            scratch_git.run(&["commit", "-q", "-m", message]).await?;
            scratch_git.run(&["branch", branch]).await?;
            Ok(())
        }
        .await;
        // Unregister the scratch worktree whether or not the commit landed.
        let _ = self
            .run(&["worktree", "remove", "--force", &scratch_str])
            .await;
        result
    }

    async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run(&["push", "-q", remote, refspec]).await?;
        Ok(())
    }
}

/// An in-memory git surface: refs are maps from path to contents. Commits and pushes are
/// recorded so tests can assert on them.
#[derive(Debug, Default)]
pub struct EphemeralGit {
    refs: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    pushed: Mutex<Vec<String>>,
}

impl EphemeralGit {
    /// Creates an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `contents` at `path` in `reference`.
    pub fn insert(&self, reference: &str, path: &str, contents: Vec<u8>) {
        self.refs
            .lock()
            .expect("poisoned")
            .entry(reference.to_string())
            .or_default()
            .insert(path.to_string(), contents);
    }

    /// The refspecs pushed so far.
    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().expect("poisoned").clone()
    }

    /// Every ref known to the surface, including branches created via `commit_branch`.
    pub fn branches(&self) -> Vec<String> {
        let refs = self.refs.lock().expect("poisoned");
        let mut branches: Vec<String> = refs.keys().cloned().collect();
        branches.sort();
        branches
    }
}

#[async_trait]
impl GitSurface for EphemeralGit {
    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .refs
            .lock()
            .expect("poisoned")
            .get(reference)
            .and_then(|files| files.get(path))
            .cloned())
    }

    async fn list_files(&self, reference: &str, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .refs
            .lock()
            .expect("poisoned")
            .get(reference)
            .map(|files| {
                files
                    .keys()
                    .filter(|path| path.starts_with(&prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, _paths: &[PathBuf], _message: &str) -> Result<()> {
        Ok(())
    }

    async fn commit_branch(
        &self,
        branch: &str,
        base: &str,
        files: &[(String, Vec<u8>)],
        _message: &str,
    ) -> Result<()> {
        let mut refs = self.refs.lock().expect("poisoned");
        let mut tree = refs.get(base).cloned().unwrap_or_default();
        for (path, contents) in files {
            tree.insert(path.clone(), contents.clone());
        }
        refs.insert(branch.to_string(), tree);
        Ok(())
    }

    async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.pushed
            .lock()
            .expect("poisoned")
            .push(format!("{remote} {refspec}"));
        Ok(())
    }
}
