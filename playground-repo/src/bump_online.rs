// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Result;
use crate::snapshot::commit_message;
use clap::Parser;
use log::info;
use playground::clock::SystemClock;
use playground::git::{GitCli, GitSurface};
use playground::key_source::SignerRegistry;
use playground::online::OnlineSigner;
use playground::repo::WorkingTree;
use playground::schema::RoleName;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
pub(crate) struct BumpOnlineArgs {
    /// Commit the updated metadata and push it to the remote
    #[clap(long)]
    push: bool,

    /// Remote to push to
    #[clap(long, default_value = "origin")]
    remote: String,

    /// Directory to write the publishable tree into
    publish_dir: PathBuf,
}

impl BumpOnlineArgs {
    pub(crate) async fn run(self, workdir: &Path, cancel: CancellationToken) -> Result<i32> {
        let tree = WorkingTree::open(workdir)?;
        let registry = SignerRegistry::with_defaults();
        let clock = SystemClock;
        let signer = OnlineSigner::with_cancel(&registry, &clock, cancel);

        let outcome = signer.bump_online(&tree).await?;
        if outcome.is_noop() {
            info!("no online role is inside its signing period");
            return Ok(1);
        }
        signer.publish(&tree, &self.publish_dir).await?;

        let git = GitCli::new(workdir);
        git.commit(
            &[
                tree.role_path(&RoleName::Snapshot),
                tree.role_path(&RoleName::Timestamp),
            ],
            &commit_message(outcome),
        )
        .await?;
        if self.push {
            git.push(&self.remote, "HEAD").await?;
        }
        Ok(0)
    }
}
