// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the tavern index.

use crate::node_id::NodeId;
use camino::Utf8PathBuf;
use std::{env::JoinPathsError, path::PathBuf};
use thiserror::Error;

/// An error that occurs while resolving a `{key}` placeholder inside a parameter value.
///
/// Resolution is eager: a failure aborts parameter expansion for the affected test.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VariableResolutionError {
    /// None of the candidate files defines the key.
    #[error(
        "variable `{key}` (from `{token}`) is not defined in any included file ({})",
        display_candidates(.candidates)
    )]
    Undefined {
        /// The key that was looked up.
        key: String,

        /// The full token the key was extracted from.
        token: String,

        /// The file names that were searched, in order.
        candidates: Vec<String>,
    },

    /// The token contains a `{` that is never closed.
    #[error("placeholder in `{token}` is not terminated by `}}` or `:`")]
    Unterminated {
        /// The token that failed to parse.
        token: String,
    },
}

fn display_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "no files included".to_owned()
    } else {
        candidates.join(", ")
    }
}

/// An error that occurs while loading a variables file.
#[derive(Debug, Error)]
pub enum VariableLoadError {
    /// The file could not be read.
    #[error("failed to read variables file `{path}`")]
    Read {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The file is not valid YAML.
    #[error("failed to parse variables file `{path}`")]
    Parse {
        /// The path that was parsed.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_yaml::Error,
    },
}

/// A problem with a single document inside a test file.
///
/// Document errors never abort indexing of the rest of the file: they are collected and
/// returned alongside the tests that could be parsed.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document (or the YAML stream from this point on) could not be parsed.
    #[error("document {index} in `{path}` is not valid YAML")]
    Malformed {
        /// The file containing the document.
        path: Utf8PathBuf,

        /// The 0-based index of the document within the file.
        index: usize,

        /// The underlying error.
        #[source]
        error: serde_yaml::Error,
    },

    /// The document has no `test_name`, or it is not a string.
    #[error("document {index} in `{path}` has no `test_name`")]
    MissingTestName {
        /// The file containing the document.
        path: Utf8PathBuf,

        /// The 0-based index of the document within the file.
        index: usize,
    },

    /// An included variables file could not be loaded.
    #[error("test `{test_name}` in `{path}` includes a file that could not be loaded")]
    Include {
        /// The file containing the test.
        path: Utf8PathBuf,

        /// The name of the test.
        test_name: String,

        /// The underlying error.
        #[source]
        error: VariableLoadError,
    },

    /// Parameters of a test could not be expanded because a variable failed to resolve. The test
    /// itself is still indexed, without variants.
    #[error("parameters of test `{test_name}` in `{path}` could not be expanded")]
    Parameters {
        /// The file containing the test.
        path: Utf8PathBuf,

        /// The name of the test.
        test_name: String,

        /// The underlying error.
        #[source]
        error: VariableResolutionError,
    },
}

/// An error that occurs while reading a test file as a whole.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The test file could not be read.
    #[error("failed to read test file `{path}`")]
    Read {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Walking a tests directory failed.
    #[error("failed to walk tests directory `{dir}`")]
    Walk {
        /// The directory being walked.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A discovered path is not valid UTF-8.
    #[error("test file path `{}` is not valid UTF-8", .path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },
}

/// An error returned by [`TestIndex`](crate::index::TestIndex) operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A parameter variant was added without its parent test.
    #[error("parameter variant `{node_id}` cannot be added without its parent test")]
    OrphanVariant {
        /// The variant's node ID.
        node_id: NodeId,
    },

    /// The node ID is not present in the index.
    #[error("node `{node_id}` is not in the index")]
    UnknownNode {
        /// The node ID that was looked up.
        node_id: NodeId,
    },
}

/// An error that occurs while persisting the result cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache file could not be read during an explicit reload.
    #[error("failed to read result cache `{path}`")]
    Read {
        /// The cache file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The cache file did not contain a valid result map during an explicit reload.
    #[error("failed to parse result cache `{path}`")]
    Parse {
        /// The cache file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The cache could not be serialized.
    #[error("failed to serialize result cache for `{path}`")]
    Serialize {
        /// The cache file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The directory holding the cache file could not be created.
    #[error("failed to create cache directory `{dir}`")]
    CreateDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The cache file could not be written.
    #[error("failed to write result cache `{path}`")]
    Write {
        /// The cache file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },

    /// The background write task did not complete.
    #[error("result cache write task for `{path}` failed")]
    WriteTask {
        /// The cache file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: tokio::task::JoinError,
    },
}

/// An error that occurs while reading a JUnit run report.
#[derive(Debug, Error)]
pub enum RunReportError {
    /// The report file could not be read.
    #[error("failed to read run report `{path}`")]
    Read {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The report is not well-formed XML.
    #[error("run report is malformed at byte {position}")]
    Xml {
        /// Byte offset at which the error was detected.
        position: u64,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// A `testcase` element is missing a required attribute.
    #[error("`testcase` element at byte {position} has no `{attribute}` attribute")]
    MissingAttribute {
        /// Byte offset of the element.
        position: u64,

        /// The missing attribute.
        attribute: &'static str,
    },
}

/// An error that occurs while invoking the external test runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No targets were supplied.
    #[error("no tests were selected to run")]
    NoTargets,

    /// No common root directory is known, so node IDs cannot be reproduced.
    #[error("cannot run tests before any test files are indexed")]
    NoCommonRoot,

    /// The runner process could not be started.
    #[error("failed to start `{program}` (is it installed and on PATH?)")]
    Spawn {
        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Waiting on or reading from the runner process failed.
    #[error("failed to wait for `{program}`")]
    Wait {
        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The runner finished without producing a JUnit report.
    #[error("`{program}` exited with {status} without writing a report to `{path}`")]
    ReportMissing {
        /// The program that was spawned.
        program: String,

        /// The exit status, as displayed.
        status: String,

        /// The expected report path.
        path: Utf8PathBuf,
    },

    /// The report directory could not be created.
    #[error("failed to create report directory `{dir}`")]
    CreateDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A report left over from an earlier run could not be removed.
    #[error("failed to remove stale report `{path}`")]
    RemoveStaleReport {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// `PYTHONPATH` could not be assembled.
    #[error("failed to build PYTHONPATH for the runner")]
    JoinPaths(#[from] JoinPathsError),
}

/// An error that occurred while reading the tavern-crawler config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file `{path}`")]
    Read {
        /// The config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The config file is not valid.
    #[error("failed to parse config file `{path}`")]
    Parse {
        /// The config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },
}

/// An error that occurs while determining the per-workspace cache directory.
#[derive(Debug, Error)]
pub enum CacheDirError {
    /// The platform base directories could not be determined.
    #[error("could not determine the platform cache directory")]
    BaseDirStrategy,

    /// The platform cache directory is not valid UTF-8.
    #[error("platform cache directory `{}` is not valid UTF-8", .path.display())]
    CacheDirNotUtf8 {
        /// The offending path.
        path: PathBuf,
    },

    /// The workspace root could not be canonicalized.
    #[error("failed to canonicalize workspace root `{workspace_root}`")]
    Canonicalize {
        /// The workspace root.
        workspace_root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error returned by [`TestManager`](crate::manager::TestManager) workflows.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Reading a test file failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Updating the index failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Persisting the result cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reading the run report failed.
    #[error(transparent)]
    RunReport(#[from] RunReportError),

    /// Invoking the test runner failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
