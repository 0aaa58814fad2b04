// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::default_trait_access)]

use snafu::Snafu;
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Configuration file {} is unreadable: {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Configuration file {}: {}", path.display(), reason))]
    ConfigInvalid {
        path: PathBuf,
        reason: String,
    },

    #[snafu(display("Failed to read input: {}", source))]
    Input {
        source: std::io::Error,
    },

    #[snafu(display("Failed to initialize the logger: {}", source))]
    Logger {
        source: log::SetLoggerError,
    },

    #[snafu(display("{}", source))]
    Playground {
        source: playground::error::Error,
    },

    #[snafu(display("Signer backend failed: {}", reason))]
    Signer {
        reason: String,
    },
}

impl From<playground::error::Error> for Error {
    fn from(source: playground::error::Error) -> Self {
        Error::Playground { source }
    }
}
