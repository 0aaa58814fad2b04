// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Playground is the engine room of a CI-orchestrated TUF repository: metadata lives in a git
//! tree, humans sign offline roles through signing events (branches carrying candidate
//! metadata plus accumulating signatures), and the CI platform produces snapshot and
//! timestamp with service-held keys.
//!
//! The two central pieces are:
//!
//! * [`event::SigningEvent`] — compares an event branch against the known-good baseline and
//!   decides whether the event is empty, invalid, incomplete, or publishable, recording
//!   per-signer obligations along the way.
//! * [`online::OnlineSigner`] — re-derives snapshot and timestamp from committed metadata,
//!   performs expiry-driven version bumps, and emits the publishable tree that downloader
//!   clients consume.
//!
//! Both are pure functions of a repository state, an injected clock, and a signer backend;
//! re-running either with unchanged inputs is a no-op, which is what makes them safe to drive
//! from an at-least-once CI queue.
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. The integration tests under
//! `tests/` exercise the end-to-end signing-event and online-signing flows against temporary
//! working trees.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod clock;
pub mod delta;
pub mod error;
pub mod event;
pub mod git;
pub mod key_source;
pub mod online;
pub mod repo;
pub mod schema;
pub mod sign;

pub use async_trait::async_trait;

/// The TUF specification version written into new metadata.
pub const SPEC_VERSION: &str = "1.0.0";
