// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform-specific cache directory discovery for a workspace's results and run reports.

use crate::errors::CacheDirError;
use camino::{Utf8Path, Utf8PathBuf};
use etcetera::{BaseStrategy, choose_base_strategy};
use xxhash_rust::xxh3::xxh3_64;

/// Environment variable to override the tavern-crawler cache directory.
///
/// When set, the cache directory of a workspace is
/// `$TAVERN_CRAWLER_CACHE_DIR/projects/<workspace-id>/`.
pub const TAVERN_CRAWLER_CACHE_DIR_ENV: &str = "TAVERN_CRAWLER_CACHE_DIR";

/// Returns the cache directory for a workspace.
///
/// If the `TAVERN_CRAWLER_CACHE_DIR` environment variable is set, it is used as the base
/// directory. Otherwise the platform default is used:
///
/// - Linux: `$XDG_CACHE_HOME/tavern-crawler/projects/<workspace-id>/`
///   or `~/.cache/tavern-crawler/projects/<workspace-id>/`
/// - macOS: `~/Library/Caches/tavern-crawler/projects/<workspace-id>/`
/// - Windows: `%LOCALAPPDATA%\tavern-crawler\projects\<workspace-id>\`
///
/// The workspace root is canonicalized first, so a workspace reached through a symlink shares
/// its cache with the real path.
pub fn workspace_cache_dir(workspace_root: &Utf8Path) -> Result<Utf8PathBuf, CacheDirError> {
    let base_cache_dir = if let Ok(cache_dir) = std::env::var(TAVERN_CRAWLER_CACHE_DIR_ENV) {
        Utf8PathBuf::from(cache_dir)
    } else {
        let strategy = choose_base_strategy().map_err(|_| CacheDirError::BaseDirStrategy)?;
        let cache_dir = strategy.cache_dir().join("tavern-crawler");
        Utf8PathBuf::from_path_buf(cache_dir)
            .map_err(|path| CacheDirError::CacheDirNotUtf8 { path })?
    };

    let canonical_workspace =
        workspace_root
            .canonicalize_utf8()
            .map_err(|error| CacheDirError::Canonicalize {
                workspace_root: workspace_root.to_owned(),
                error,
            })?;

    Ok(base_cache_dir
        .join("projects")
        .join(encode_workspace_id(&canonical_workspace)))
}

/// Encodes a workspace path into a short, directory-safe identifier.
///
/// The identifier is the last path component (for readability) followed by a hash of the full
/// path (for uniqueness), for example `/home/user/api-tests` → `api-tests-1d2c3b4a5f6e7d8c`.
pub fn encode_workspace_id(path: &Utf8Path) -> String {
    let hash = xxh3_64(path.as_str().as_bytes());
    let name: String = path
        .file_name()
        .unwrap_or("workspace")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!("{name}-{hash:016x}")
}
