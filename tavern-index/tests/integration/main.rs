// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for indexing and reconciling a workspace of Tavern tests.

mod fixtures;
mod workflow;
