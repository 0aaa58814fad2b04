// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `playground-sign` is the signer's side of a playground TUF repository: run it from a
//! checkout of a signing-event branch to accept invitations, adjust signers and expiry
//! policies, and sign the changed roles. The resulting delta is committed and pushed to the
//! configured remote.

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::use_self)]

mod config;
mod error;
mod prompt;
mod wizard;

use crate::config::SignConfig;
use crate::error::Result;
use crate::prompt::StdinInput;
use crate::wizard::Workbench;
use clap::Parser;
use log::info;
use playground::clock::{Clock, SystemClock};
use playground::event::SigningEvent;
use playground::git::{GitCli, GitSurface};
use playground::key_source::SignerRegistry;
use playground::repo::{RoleSet, TargetFiles, WorkingTree, WriteContext};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::path::PathBuf;

/// This wrapper enables global options and initializes the logger before running.
#[derive(Parser)]
#[command(version)]
struct Program {
    /// Set logging verbosity [trace|debug|info|warn|error]
    #[clap(name = "log-level", short, long, default_value = "info")]
    log_level: LevelFilter,

    /// Path to the signer configuration file
    #[clap(short, long, default_value = ".playground-sign.ini")]
    config: PathBuf,

    /// Path to the repository checkout
    #[clap(short, long, default_value = ".")]
    workdir: PathBuf,

    /// URI of the offline signing key; the default keeps the key file out of the tree
    #[clap(long, default_value = "file:.git/playground-sign-key.pem")]
    key: String,

    /// Leave the updated event branch unpushed
    #[clap(long)]
    no_push: bool,
}

impl Program {
    async fn run(self) -> Result<i32> {
        TermLogger::init(
            self.log_level,
            ConfigBuilder::new()
                .add_filter_allow_str("playground")
                .add_filter_allow_str("playground_sign")
                .build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .context(error::LoggerSnafu)?;

        let config = SignConfig::load(&self.config)?;
        let tree = WorkingTree::open(&self.workdir)?;
        let git = GitCli::new(&self.workdir);
        let base_ref = format!("{}/main", config.pull_remote);
        let base = RoleSet::load_ref(&git, &base_ref).await?;
        let original = RoleSet::load(&tree).await?;
        let now = SystemClock.now();

        let registry = SignerRegistry::with_defaults();
        let source = registry.resolve(&self.key)?;
        let mut input = StdinInput;
        let updated = Workbench::new(&config, &base, original.clone(), now)
            .run(&mut input, source.as_ref())
            .await?;

        let mut written = Vec::new();
        for (name, metadata) in &updated.roles {
            if original.get(name) != Some(metadata) {
                tree.write_role(name, metadata, WriteContext::PartialEvent)
                    .await?;
                written.push(tree.role_path(name));
            }
        }

        let target_files = TargetFiles::scan(&tree)?;
        let outcome = SigningEvent {
            base: &base,
            event: &updated,
            target_files: &target_files,
            now,
        }
        .evaluate()?;
        print!("{}", outcome.report);

        if written.is_empty() {
            info!("nothing changed; nothing to push");
            return Ok(0);
        }
        git.commit(
            &written,
            &format!("Signing-event update by {}", config.user_name),
        )
        .await?;
        if !self.no_push {
            git.push(&config.push_remote, "HEAD").await?;
        }
        Ok(0)
    }
}

#[tokio::main]
async fn main() -> ! {
    std::process::exit(match Program::parse().run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    })
}
