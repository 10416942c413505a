// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Test index and result reconciliation for [Tavern](https://taverntesting.github.io/) API
//! tests.
//!
//! The basic flow of operations is:
//!
//! 1. Test files are parsed by [`discovery`] into a tree of file, test and parameter variant
//!    entities, with node IDs generated relative to the common root of all files
//!    ([`node_id`]).
//! 2. The entities are stored in a [`TestIndex`](index::TestIndex), which keeps each parent's
//!    state the aggregate of its children's.
//! 3. Results come either from a JUnit [run report](run_report) written by pytest, or from the
//!    persisted [result cache](cache). The [reconciler](reconcile) merges them into the index,
//!    preferring fresh results.
//!
//! [`TestManager`](manager::TestManager) ties these together, along with invoking the test
//! [`runner`].

pub mod cache;
pub mod cache_dir;
pub mod config;
pub mod discovery;
pub mod entity;
pub mod errors;
pub mod index;
pub mod locator;
pub mod manager;
pub mod node_id;
pub mod params;
pub mod reconcile;
pub mod run_report;
pub mod runner;
pub mod variables;
