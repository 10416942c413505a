// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `tavern-crawler` command-line interface.
//!
//! This crate is not meant to be used as a library: the engine lives in
//! [`tavern-index`](tavern_index).

mod dispatch;
mod errors;
mod output;
mod tree;

#[doc(hidden)]
pub use dispatch::TavernCrawlerApp;
#[doc(hidden)]
pub use errors::{ExpectedError, TavernCrawlerExitCode};
#[doc(hidden)]
pub use output::OutputContext;
