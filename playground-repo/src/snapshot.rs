// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Result;
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
pub(crate) struct SnapshotArgs {
    /// Commit the updated metadata and push it to the remote
    #[clap(long)]
    push: bool,

    /// Remote to push to
    #[clap(long, default_value = "origin")]
    remote: String,

    /// Directory to write the publishable tree into
    publish_dir: PathBuf,
}

impl SnapshotArgs {
    pub(crate) async fn run(self, workdir: &Path, cancel: CancellationToken) -> Result<i32> {
        let tree = WorkingTree::open(workdir)?;
        let registry = SignerRegistry::with_defaults();
        let clock = SystemClock;
        let signer = OnlineSigner::with_cancel(&registry, &clock, cancel);

        let outcome = signer.snapshot(&tree).await?;
        if outcome.is_noop() {
            info!("snapshot and timestamp are current; nothing to publish");
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

pub(crate) fn commit_message(outcome: playground::online::SnapshotOutcome) -> String {
    let mut parts = Vec::new();
    if let Some(version) = outcome.snapshot {
        parts.push(format!("snapshot v{version}"));
    }
    if let Some(version) = outcome.timestamp {
        parts.push(format!("timestamp v{version}"));
    }
    format!("Online signing: {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::commit_message;
    use playground::online::SnapshotOutcome;
    use std::num::NonZeroU64;

    #[test]
    fn commit_message_names_what_was_produced() {
        let outcome = SnapshotOutcome {
            snapshot: NonZeroU64::new(4),
            timestamp: NonZeroU64::new(7),
        };
        assert_eq!(
            commit_message(outcome),
            "Online signing: snapshot v4, timestamp v7"
        );

        let timestamp_only = SnapshotOutcome {
            snapshot: None,
            timestamp: NonZeroU64::new(8),
        };
        assert_eq!(commit_message(timestamp_only), "Online signing: timestamp v8");
    }
}
