// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for tavern-crawler, and the engine context built from it.
//!
//! Configuration is read from `.config/tavern-crawler.toml` under the workspace root, if it
//! exists:
//!
//! ```toml
//! tests-folder = "tests"
//!
//! [runner]
//! program = "pytest"
//! extra-args = ["-W", "ignore::DeprecationWarning", "--disable-warnings"]
//!
//! [cache]
//! dir = "target/tavern-cache"
//! ```

use crate::{
    cache_dir::workspace_cache_dir,
    errors::{CacheDirError, ConfigError},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{
    ffi::{OsStr, OsString},
    io,
};
use tracing::debug;

/// The location of the config file, relative to the workspace root.
pub const CONFIG_PATH: &str = ".config/tavern-crawler.toml";

/// The name of the result cache file within the cache directory.
pub const CACHE_FILE_NAME: &str = "results.json";

/// The name of the run report directory within the cache directory.
pub const REPORTS_DIR_NAME: &str = "reports";

/// tavern-crawler configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TavernConfig {
    /// The directory holding the tests, relative to the workspace root. Defaults to the
    /// workspace root itself.
    #[serde(default)]
    pub tests_folder: Option<Utf8PathBuf>,

    /// How the test runner is invoked.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Where results are cached.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl TavernConfig {
    /// Reads the config at `path`. Returns `Ok(None)` if the file does not exist.
    pub fn from_path(path: &Utf8Path) -> Result<Option<Self>, ConfigError> {
        debug!("config: attempting to load from {path}");
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("config: file does not exist at {path}");
                return Ok(None);
            }
            Err(error) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    error,
                });
            }
        };

        let config = Self::from_toml(&contents).map_err(|error| ConfigError::Parse {
            path: path.to_owned(),
            error,
        })?;
        debug!("config: loaded successfully from {path}");
        Ok(Some(config))
    }

    /// Parses a config from TOML.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reads the config from its default location in `workspace_root`, falling back to the
    /// defaults if there is none.
    pub fn discover(workspace_root: &Utf8Path) -> Result<Self, ConfigError> {
        Ok(Self::from_path(&workspace_root.join(CONFIG_PATH))?.unwrap_or_default())
    }
}

/// Runner settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunnerConfig {
    /// The program to run. Looked up on `PATH` if not a path.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments passed before the targets.
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: default_extra_args(),
        }
    }
}

fn default_program() -> String {
    "pytest".to_owned()
}

fn default_extra_args() -> Vec<String> {
    ["-W", "ignore::DeprecationWarning", "--disable-warnings"]
        .map(str::to_owned)
        .to_vec()
}

/// Cache settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheConfig {
    /// The cache directory, relative to the workspace root. Defaults to a per-workspace directory
    /// in the platform cache directory.
    #[serde(default)]
    pub dir: Option<Utf8PathBuf>,
}

/// Everything the engine needs to know about its environment, resolved once up front.
#[derive(Clone, Debug)]
pub struct EngineContext {
    workspace_root: Utf8PathBuf,
    tests_dir: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    pythonpath: OsString,
    runner: RunnerConfig,
}

impl EngineContext {
    /// Resolves the context for `workspace_root`.
    ///
    /// `PYTHONPATH` is captured from the environment now; if unset, the tests directory is used.
    pub fn new(workspace_root: &Utf8Path, config: TavernConfig) -> Result<Self, CacheDirError> {
        let tests_dir = match &config.tests_folder {
            Some(folder) => workspace_root.join(folder),
            None => workspace_root.to_owned(),
        };
        let cache_dir = match &config.cache.dir {
            Some(dir) => workspace_root.join(dir),
            None => workspace_cache_dir(workspace_root)?,
        };
        let pythonpath =
            std::env::var_os("PYTHONPATH").unwrap_or_else(|| OsString::from(tests_dir.as_str()));

        debug!(
            workspace_root = %workspace_root,
            tests_dir = %tests_dir,
            cache_dir = %cache_dir,
            "resolved engine context"
        );
        Ok(Self {
            workspace_root: workspace_root.to_owned(),
            tests_dir,
            cache_dir,
            pythonpath,
            runner: config.runner,
        })
    }

    /// Builds a context from explicit values, without consulting the environment.
    pub fn from_parts(
        workspace_root: impl Into<Utf8PathBuf>,
        tests_dir: impl Into<Utf8PathBuf>,
        cache_dir: impl Into<Utf8PathBuf>,
        pythonpath: impl Into<OsString>,
        runner: RunnerConfig,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            tests_dir: tests_dir.into(),
            cache_dir: cache_dir.into(),
            pythonpath: pythonpath.into(),
            runner,
        }
    }

    /// The workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// The directory holding the tests.
    pub fn tests_dir(&self) -> &Utf8Path {
        &self.tests_dir
    }

    /// The per-workspace cache directory.
    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// The result cache file.
    pub fn cache_file(&self) -> Utf8PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    /// The directory run reports are written to.
    pub fn reports_dir(&self) -> Utf8PathBuf {
        self.cache_dir.join(REPORTS_DIR_NAME)
    }

    /// The base `PYTHONPATH` for runner invocations.
    pub fn pythonpath(&self) -> &OsStr {
        &self.pythonpath
    }

    /// Runner settings.
    pub fn runner(&self) -> &RunnerConfig {
        &self.runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_full_config() {
        let config = TavernConfig::from_toml(indoc! {r#"
            tests-folder = "tests"

            [runner]
            program = "/opt/venv/bin/pytest"
            extra-args = ["-n", "auto"]

            [cache]
            dir = "target/tavern"
        "#})
        .unwrap();

        assert_eq!(
            config,
            TavernConfig {
                tests_folder: Some("tests".into()),
                runner: RunnerConfig {
                    program: "/opt/venv/bin/pytest".to_owned(),
                    extra_args: vec!["-n".to_owned(), "auto".to_owned()],
                },
                cache: CacheConfig {
                    dir: Some("target/tavern".into()),
                },
            }
        );
    }

    #[test]
    fn defaults_apply() {
        let config = TavernConfig::from_toml("[runner]\n").unwrap();
        assert_eq!(config, TavernConfig::default());
        assert_eq!(config.runner.program, "pytest");
        assert_eq!(
            config.runner.extra_args,
            ["-W", "ignore::DeprecationWarning", "--disable-warnings"]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = TavernConfig::from_toml("[runner]\nprogramme = \"pytest\"\n").unwrap_err();
        assert!(error.to_string().contains("programme"), "{error}");
    }

    #[test]
    fn discover_reads_default_location() {
        let dir = camino_tempfile::tempdir().unwrap();
        assert_eq!(
            TavernConfig::discover(dir.path()).unwrap(),
            TavernConfig::default()
        );

        std::fs::create_dir_all(dir.path().join(".config")).unwrap();
        std::fs::write(dir.path().join(CONFIG_PATH), "tests-folder = \"api\"\n").unwrap();
        let config = TavernConfig::discover(dir.path()).unwrap();
        assert_eq!(config.tests_folder.as_deref(), Some(Utf8Path::new("api")));

        std::fs::write(dir.path().join(CONFIG_PATH), "tests-folder = 1\n").unwrap();
        let error = TavernConfig::discover(dir.path()).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }), "{error:?}");
    }

    #[test]
    fn context_uses_configured_directories() {
        let dir = camino_tempfile::tempdir().unwrap();
        let config = TavernConfig {
            tests_folder: Some("tests".into()),
            cache: CacheConfig {
                dir: Some(".cache".into()),
            },
            ..TavernConfig::default()
        };

        let context = EngineContext::new(dir.path(), config).unwrap();
        assert_eq!(context.tests_dir(), dir.path().join("tests"));
        assert_eq!(context.cache_dir(), dir.path().join(".cache"));
        assert_eq!(context.cache_file(), dir.path().join(".cache").join(CACHE_FILE_NAME));
        assert_eq!(context.reports_dir(), dir.path().join(".cache").join(REPORTS_DIR_NAME));
        assert_eq!(context.runner().program, "pytest");
    }
}
