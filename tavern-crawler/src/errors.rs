// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use std::error::Error;
use tavern_index::errors::{CacheDirError, ConfigError, DiscoveryError, ManagerError};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Exit codes used by tavern-crawler.
pub enum TavernCrawlerExitCode {}

impl TavernCrawlerExitCode {
    /// An error occurred before or while running tests, for example a config or runner error.
    pub const SETUP_ERROR: i32 = 96;

    /// The test runner reported failures.
    pub const TEST_RUN_FAILED: i32 = 100;
}

// The #[error()] strings are placeholders: errors are printed with display_to_stderr, which
// colorizes them.

/// An error that tavern-crawler reports to the user rather than panicking on.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        error: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 { path: std::path::PathBuf },
    #[error("config error")]
    Config {
        #[from]
        error: ConfigError,
    },
    #[error("cache directory error")]
    CacheDir {
        #[from]
        error: CacheDirError,
    },
    #[error("test discovery error")]
    Discovery {
        #[from]
        error: DiscoveryError,
    },
    #[error("{error}")]
    Manager {
        #[from]
        error: ManagerError,
    },
    #[error("failed to create async runtime")]
    Runtime {
        #[source]
        error: std::io::Error,
    },
    #[error("failed to serialize output")]
    Serialize {
        #[source]
        error: serde_json::Error,
    },
    #[error("failed to write output")]
    WriteOutput {
        #[source]
        error: std::io::Error,
    },
    #[error("file `{path}` is not an indexed test file")]
    UnknownFile { path: Utf8PathBuf },
}

impl ExpectedError {
    /// The process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        TavernCrawlerExitCode::SETUP_ERROR
    }

    /// Logs this error and its causes.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::CurrentDir { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { path } => {
                error!("workspace root `{}` is not valid UTF-8", path.display());
                None
            }
            Self::Config { error } => {
                error!("failed to load config");
                Some(error as &dyn Error)
            }
            Self::CacheDir { error } => {
                error!("failed to determine the cache directory");
                Some(error as &dyn Error)
            }
            Self::Discovery { error } => {
                error!("failed to discover test files");
                Some(error as &dyn Error)
            }
            Self::Manager { error } => {
                // ManagerError is transparent, so start with its own message.
                error!("{error}");
                error.source()
            }
            Self::Runtime { error } => {
                error!("failed to create async runtime");
                Some(error as &dyn Error)
            }
            Self::Serialize { error } => {
                error!("failed to serialize output");
                Some(error as &dyn Error)
            }
            Self::WriteOutput { error } => {
                error!("failed to write output");
                Some(error as &dyn Error)
            }
            Self::UnknownFile { path } => {
                error!("`{path}` is not an indexed test file");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: "tavern_crawler::no_heading", "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
