// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result, TavernCrawlerExitCode},
    output::{OutputContext, OutputOpts},
    tree,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use tavern_index::{
    config::{EngineContext, TavernConfig},
    discovery::discover_test_files,
    errors::{ConfigError, ManagerError},
    manager::TestManager,
    run_report::RunReport,
};
use tracing::{info, warn};

/// Index, run and track the results of Tavern API tests.
///
/// Test files (`*.tavern.yaml`) are discovered under the configured tests folder. Results are
/// cached per workspace, so the state of every test is known between runs.
#[derive(Debug, Parser)]
#[command(version)]
pub struct TavernCrawlerApp {
    /// Workspace root [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<Utf8PathBuf>,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: workspace-root/.config/tavern-crawler.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<TavernConfig, ConfigError> {
        match &self.config_file {
            Some(path) => TavernConfig::from_path(path)?.ok_or_else(|| ConfigError::Read {
                path: path.clone(),
                error: io::ErrorKind::NotFound.into(),
            }),
            None => TavernConfig::discover(workspace_root),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tests in the workspace, with their last known results
    List {
        #[command(flatten)]
        format: FormatOpts,
    },
    /// Show test results, optionally applying a JUnit report first
    ///
    /// Results in the report take priority over cached results, and are saved to the cache.
    Results {
        /// JUnit report to apply, as written by `pytest --junit-xml`
        #[arg(long, value_name = "PATH")]
        junit: Option<Utf8PathBuf>,

        #[command(flatten)]
        format: FormatOpts,
    },
    /// Run tests and record their results
    ///
    /// Exits with 100 if any test failed.
    Run {
        /// Node IDs of the files, tests or parameter variants to run [default: all files]
        #[arg(value_name = "NODE_ID")]
        node_ids: Vec<String>,

        #[command(flatten)]
        format: FormatOpts,
    },
    /// Forget the cached results of test files
    Forget {
        /// Test files to forget [default: all files]
        #[arg(value_name = "FILE")]
        files: Vec<Utf8PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, Args)]
struct FormatOpts {
    /// Output format
    #[arg(short = 'T', long, value_enum, default_value_t, value_name = "FMT")]
    message_format: MessageFormat,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// A tree of files, tests and parameter variants
    #[default]
    Human,
    /// A JSON array of every entity
    Json,
}

impl TavernCrawlerApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| ExpectedError::Runtime { error })?;
        runtime.block_on(self.exec_impl(output))
    }

    async fn exec_impl(self, output: OutputContext) -> Result<i32> {
        let workspace_root = match self.workspace {
            Some(workspace) => absolute(workspace)?,
            None => current_dir()?,
        };
        let config = self.config_opts.make_config(&workspace_root)?;
        let context = EngineContext::new(&workspace_root, config)?;

        let mut manager = TestManager::new(context);
        let files = discover_test_files(manager.context().tests_dir())?;
        let summary = manager.load_test_files(&files).await?;
        if !summary.errors.is_empty() {
            warn!(
                "{} problems found while indexing {} files",
                summary.errors.len(),
                summary.files.len()
            );
        }
        manager.load_test_results(None).await?;

        match self.command {
            Command::List { format } => {
                write_index(&manager, format.message_format, output)?;
                Ok(0)
            }
            Command::Results { junit, format } => {
                if let Some(junit) = junit {
                    let report = RunReport::from_path(&junit)
                        .await
                        .map_err(ManagerError::from)?;
                    let reconciled = manager.apply_run_report(&report).await?;
                    info!(
                        "applied {} results from {junit}",
                        reconciled.from_report
                    );
                }
                write_index(&manager, format.message_format, output)?;
                Ok(0)
            }
            Command::Run { node_ids, format } => {
                let node_ids: Vec<&str> = node_ids.iter().map(String::as_str).collect();
                let summary = manager.run_tests(&node_ids).await?;
                write_index(&manager, format.message_format, output)?;
                if summary.status.success() {
                    Ok(0)
                } else {
                    info!("test runner exited with {}", summary.status);
                    Ok(TavernCrawlerExitCode::TEST_RUN_FAILED)
                }
            }
            Command::Forget { files } => {
                let files = if files.is_empty() {
                    None
                } else {
                    Some(resolve_files(&manager, files)?)
                };
                let removed = manager.delete_test_files(files.as_deref(), true).await?;
                manager.save_cache().await?;
                info!("forgot {} entries", removed.len());
                Ok(0)
            }
        }
    }
}

fn write_index(manager: &TestManager, format: MessageFormat, output: OutputContext) -> Result<()> {
    let stdout = io::stdout().lock();
    match format {
        MessageFormat::Human => tree::write_human(manager.index(), &output.stdout_styles(), stdout)
            .map_err(|error| ExpectedError::WriteOutput { error }),
        MessageFormat::Json => {
            let mut stdout = stdout;
            serde_json::to_writer_pretty(&mut stdout, &tree::to_json(manager.index()))
                .map_err(|error| ExpectedError::Serialize { error })?;
            writeln!(stdout).map_err(|error| ExpectedError::WriteOutput { error })
        }
    }
}

fn resolve_files(manager: &TestManager, files: Vec<Utf8PathBuf>) -> Result<Vec<Utf8PathBuf>> {
    files
        .into_iter()
        .map(|file| {
            let file = absolute(file)?;
            if manager.index().files().any(|known| known == file.as_path()) {
                Ok(file)
            } else {
                Err(ExpectedError::UnknownFile { path: file })
            }
        })
        .collect()
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|error| ExpectedError::CurrentDir { error })?;
    Utf8PathBuf::try_from(dir).map_err(|error| ExpectedError::WorkspaceRootInvalidUtf8 {
        path: error.into_path_buf(),
    })
}

fn absolute(path: Utf8PathBuf) -> Result<Utf8PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(current_dir()?.join(path))
    }
}
