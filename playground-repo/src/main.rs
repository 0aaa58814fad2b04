// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `playground-repo` is the CI side of a playground TUF repository: it renders signing-event
//! verdicts and runs the online-signing engine. It is designed to run from a checkout of the
//! repository, driven by workflow jobs; every command exits non-zero when there is nothing
//! for the workflow to act on.

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::use_self)]

mod bump_offline;
mod bump_online;
mod error;
mod snapshot;
mod status;

use crate::error::Result;
use clap::Parser;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// This wrapper enables global options and initializes the logger before running any
/// subcommands.
#[derive(Parser)]
#[command(version)]
struct Program {
    /// Set logging verbosity [trace|debug|info|warn|error]
    #[clap(name = "log-level", short, long, default_value = "info")]
    log_level: LevelFilter,
    /// Path to the repository checkout
    #[clap(short, long, default_value = ".")]
    workdir: PathBuf,
    #[clap(subcommand)]
    cmd: Command,
}

impl Program {
    async fn run(self) -> Result<i32> {
        TermLogger::init(
            self.log_level,
            ConfigBuilder::new()
                .add_filter_allow_str("playground")
                .add_filter_allow_str("playground_repo")
                .build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .context(error::LoggerSnafu)?;
        self.cmd.run(&self.workdir, watch_for_ctrl_c()).await
    }
}

#[derive(Debug, Parser)]
enum Command {
    /// Render the signing-event verdict of the working tree against the baseline ref
    Status(status::StatusArgs),
    /// Produce fresh snapshot and timestamp metadata and emit the publishable tree
    Snapshot(snapshot::SnapshotArgs),
    /// Run expiry-driven version bumps of the online roles
    BumpOnline(bump_online::BumpOnlineArgs),
    /// Open signing-event branches for offline roles inside their signing period
    BumpOffline(bump_offline::BumpOfflineArgs),
}

impl Command {
    async fn run(self, workdir: &std::path::Path, cancel: CancellationToken) -> Result<i32> {
        match self {
            Command::Status(args) => args.run(workdir).await,
            Command::Snapshot(args) => args.run(workdir, cancel).await,
            Command::BumpOnline(args) => args.run(workdir, cancel).await,
            Command::BumpOffline(args) => args.run(workdir).await,
        }
    }
}

/// Maps Ctrl-C onto the engines' cancellation token so an interrupted job never leaves a
/// half-written tree behind.
fn watch_for_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let watched = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watched.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> ! {
    std::process::exit(match Program::parse().run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            if let Some(kind) = err.kind() {
                eprintln!("error kind: {kind:?}");
            }
            1
        }
    })
}
