// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::default_trait_access)]

use snafu::Snafu;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Failed to initialize the logger: {}", source))]
    Logger {
        source: log::SetLoggerError,
    },

    #[snafu(display("{}", source))]
    Playground {
        source: playground::error::Error,
    },
}

impl Error {
    /// The engine-level kind, when the failure came from the engines.
    pub(crate) fn kind(&self) -> Option<playground::error::ErrorKind> {
        match self {
            Error::Playground { source } => Some(source.kind()),
            Error::Logger { .. } => None,
        }
    }
}

impl From<playground::error::Error> for Error {
    fn from(source: playground::error::Error) -> Self {
        Error::Playground { source }
    }
}
