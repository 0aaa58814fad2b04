// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Result;
use clap::Parser;
use playground::clock::SystemClock;
use playground::git::{GitCli, GitSurface};
use playground::key_source::SignerRegistry;
use playground::online::OnlineSigner;
use playground::repo::WorkingTree;
use std::path::Path;

#[derive(Debug, Parser)]
pub(crate) struct BumpOfflineArgs {
    /// Push the opened event branches to the remote
    #[clap(long)]
    push: bool,

    /// Remote to push to
    #[clap(long, default_value = "origin")]
    remote: String,
}

impl BumpOfflineArgs {
    pub(crate) async fn run(self, workdir: &Path) -> Result<i32> {
        let tree = WorkingTree::open(workdir)?;
        let registry = SignerRegistry::with_defaults();
        let clock = SystemClock;
        let git = GitCli::new(workdir);

        let branches = OnlineSigner::new(&registry, &clock)
            .bump_offline(&tree, &git)
            .await?;
        for branch in &branches {
            // The workflow reads the opened branch names from stdout, one per line.
            println!("{branch}");
            if self.push {
                git.push(&self.remote, &format!("refs/heads/{branch}")).await?;
            }
        }
        Ok(0)
    }
}
