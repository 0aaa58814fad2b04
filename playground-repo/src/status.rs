// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Result;
use clap::Parser;
use playground::clock::{Clock, SystemClock};
use playground::event::SigningEvent;
use playground::git::GitCli;
use playground::repo::{RoleSet, TargetFiles, WorkingTree};
use std::path::Path;

#[derive(Debug, Parser)]
pub(crate) struct StatusArgs {
    /// The known-good baseline ref to compare the working tree against
    #[clap(long, default_value = "origin/main")]
    base: String,
}

impl StatusArgs {
    pub(crate) async fn run(self, workdir: &Path) -> Result<i32> {
        let git = GitCli::new(workdir);
        let base = RoleSet::load_ref(&git, &self.base).await?;
        let tree = WorkingTree::open(workdir)?;
        let event = RoleSet::load(&tree).await?;
        let target_files = TargetFiles::scan(&tree)?;
        let now = SystemClock.now();

        let outcome = SigningEvent {
            base: &base,
            event: &event,
            target_files: &target_files,
            now,
        }
        .evaluate()?;
        print!("{}", outcome.report);
        Ok(i32::from(!outcome.verdict.is_publishable()))
    }
}
