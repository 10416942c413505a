// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invoking the external test runner.
//!
//! Tests are run by pytest (with the Tavern plugin), which writes a JUnit report that is then
//! read back with [`RunReport`](crate::run_report::RunReport). pytest derives node IDs from
//! paths relative to `--rootdir`, so the runner is always invoked with the common root of the
//! indexed files to keep its IDs identical to the index's.
//!
//! There is no timeout: a runner that never exits blocks the caller.

use crate::{
    config::RunnerConfig,
    entity::{TestEntity, TestKind},
    errors::RunnerError,
    index::TestIndex,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    ffi::{OsStr, OsString},
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// The tracing target the runner's output lines are logged under.
pub const RUNNER_OUTPUT_TARGET: &str = "tavern_index::runner::output";

/// Something the runner can be asked to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunTarget {
    /// Every test in a file.
    File {
        /// The test file.
        file: Utf8PathBuf,
    },

    /// One test, with all of its variants.
    Test {
        /// The test file.
        file: Utf8PathBuf,

        /// The test name.
        test: String,
    },

    /// One parameter variant of a test.
    Variant {
        /// The test file.
        file: Utf8PathBuf,

        /// The name of the parent test.
        test: String,

        /// The variant name.
        variant: String,
    },
}

impl RunTarget {
    /// Returns the target running `entity`. Returns `None` for a variant whose parent isn't in
    /// `index`.
    pub fn for_entity(index: &TestIndex, entity: &TestEntity) -> Option<Self> {
        let file = entity.file_location().to_owned();
        match entity.kind() {
            TestKind::File => Some(Self::File { file }),
            TestKind::Test => Some(Self::Test {
                file,
                test: entity.name().to_owned(),
            }),
            TestKind::ParameterVariant => {
                let parent = index.get(entity.parent()?.as_str())?;
                Some(Self::Variant {
                    file,
                    test: parent.name().to_owned(),
                    variant: entity.name().to_owned(),
                })
            }
        }
    }

    /// The file containing the target.
    pub fn file(&self) -> &Utf8Path {
        match self {
            Self::File { file } | Self::Test { file, .. } | Self::Variant { file, .. } => file,
        }
    }

    /// The command-line argument selecting this target.
    pub fn to_arg(&self) -> String {
        match self {
            Self::File { file } => file.to_string(),
            Self::Test { file, test } => format!("{file}::{test}"),
            Self::Variant {
                file,
                test,
                variant,
            } => format!("{file}::{test}[{variant}]"),
        }
    }
}

/// A fully resolved runner command.
#[derive(Clone, Debug)]
pub struct RunnerInvocation {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    pythonpath: OsString,
    junit_path: Utf8PathBuf,
}

/// The outcome of a runner invocation that produced a report.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The runner's exit status. pytest exits non-zero when tests fail, which isn't an error here.
    pub status: ExitStatus,

    /// The JUnit report that was written.
    pub report_path: Utf8PathBuf,
}

impl RunnerInvocation {
    /// Builds the invocation running `targets`.
    ///
    /// The arguments are the configured extra arguments, the targets, then `--junit-xml` and
    /// `--rootdir`. The working directory is `common_root`. `PYTHONPATH` is `base_pythonpath`
    /// extended with the directory of every target, so helper modules next to test files can be
    /// imported.
    pub fn new(
        config: &RunnerConfig,
        targets: &[RunTarget],
        common_root: &Utf8Path,
        junit_path: Utf8PathBuf,
        base_pythonpath: &OsStr,
    ) -> Result<Self, RunnerError> {
        if targets.is_empty() {
            return Err(RunnerError::NoTargets);
        }

        let mut args = config.extra_args.clone();
        args.extend(targets.iter().map(RunTarget::to_arg));
        args.push(format!("--junit-xml={junit_path}"));
        args.push(format!("--rootdir={common_root}"));

        let mut paths: Vec<PathBuf> = std::env::split_paths(base_pythonpath)
            .filter(|path| !path.as_os_str().is_empty())
            .collect();
        for target in targets {
            let Some(dir) = target.file().parent() else {
                continue;
            };
            if !paths.iter().any(|path| path == dir.as_std_path()) {
                paths.push(dir.as_std_path().to_owned());
            }
        }
        let pythonpath = std::env::join_paths(paths)?;

        Ok(Self {
            program: config.program.clone(),
            args,
            cwd: common_root.to_owned(),
            pythonpath,
            junit_path,
        })
    }

    /// The program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The working directory.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// The `PYTHONPATH` the runner is given.
    pub fn pythonpath(&self) -> &OsStr {
        &self.pythonpath
    }

    /// Where the JUnit report is written.
    pub fn junit_path(&self) -> &Utf8Path {
        &self.junit_path
    }

    /// Runs the command to completion, forwarding its output to the log.
    pub async fn execute(&self) -> Result<RunOutcome, RunnerError> {
        if let Some(dir) = self.junit_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|error| RunnerError::CreateDir {
                    dir: dir.to_owned(),
                    error,
                })?;
        }
        match tokio::fs::remove_file(&self.junit_path).await {
            Ok(()) => debug!(path = %self.junit_path, "removed stale report"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(RunnerError::RemoveStaleReport {
                    path: self.junit_path.clone(),
                    error,
                });
            }
        }

        info!("running {} {}", self.program, self.args.join(" "));
        debug!(cwd = %self.cwd, pythonpath = ?self.pythonpath, "runner environment");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .env("PYTHONPATH", &self.pythonpath)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| RunnerError::Spawn {
                program: self.program.clone(),
                error,
            })?;

        let (stdout, stderr) = tokio::join!(
            forward_output(child.stdout.take(), "stdout"),
            forward_output(child.stderr.take(), "stderr"),
        );
        let status = stdout
            .and(stderr)
            .and(child.wait().await)
            .map_err(|error| RunnerError::Wait {
                program: self.program.clone(),
                error,
            })?;
        debug!(%status, "runner exited");

        if !tokio::fs::try_exists(&self.junit_path)
            .await
            .unwrap_or(false)
        {
            return Err(RunnerError::ReportMissing {
                program: self.program.clone(),
                status: status.to_string(),
                path: self.junit_path.clone(),
            });
        }

        Ok(RunOutcome {
            status,
            report_path: self.junit_path.clone(),
        })
    }
}

async fn forward_output<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: &'static str,
) -> io::Result<()> {
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Some(segment) = segments.next_segment().await? {
        let line = String::from_utf8_lossy(&segment);
        info!(target: RUNNER_OUTPUT_TARGET, stream, "{}", line.trim_end());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn targets() -> Vec<RunTarget> {
        vec![
            RunTarget::File {
                file: "/ws/tests/a.tavern.yaml".into(),
            },
            RunTarget::Test {
                file: "/ws/tests/api/b.tavern.yaml".into(),
                test: "get users".to_owned(),
            },
            RunTarget::Variant {
                file: "/ws/tests/api/b.tavern.yaml".into(),
                test: "create user".to_owned(),
                variant: "alice-1".to_owned(),
            },
        ]
    }

    #[test]
    fn target_args() {
        let args: Vec<_> = targets().iter().map(RunTarget::to_arg).collect();
        assert_eq!(
            args,
            [
                "/ws/tests/a.tavern.yaml",
                "/ws/tests/api/b.tavern.yaml::get users",
                "/ws/tests/api/b.tavern.yaml::create user[alice-1]",
            ]
        );
    }

    #[test]
    fn targets_for_entities() {
        use crate::{entity::EntityTree, node_id::NodeId};

        let file = Utf8Path::new("/ws/t.tavern.yaml");
        let mut index = TestIndex::new();
        index
            .add(EntityTree::with_leaves(
                TestEntity::new(TestKind::Test, "T", NodeId::from("t::T"), file),
                [TestEntity::new(
                    TestKind::ParameterVariant,
                    "a",
                    NodeId::from("t::T[a]"),
                    file,
                )],
            ))
            .unwrap();

        let variant = index.get("t::T[a]").unwrap();
        assert_eq!(
            RunTarget::for_entity(&index, variant),
            Some(RunTarget::Variant {
                file: file.to_owned(),
                test: "T".to_owned(),
                variant: "a".to_owned(),
            })
        );
        let file_entity = index.get(file.as_str()).unwrap();
        assert_eq!(
            RunTarget::for_entity(&index, file_entity),
            Some(RunTarget::File {
                file: file.to_owned(),
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn invocation_arguments_and_pythonpath() {
        let config = RunnerConfig::default();
        let invocation = RunnerInvocation::new(
            &config,
            &targets(),
            Utf8Path::new("/ws/tests"),
            "/cache/reports/run.xml".into(),
            OsStr::new("/usr/lib/py:/ws/tests"),
        )
        .unwrap();

        assert_eq!(invocation.program(), "pytest");
        assert_eq!(
            invocation.args(),
            [
                "-W",
                "ignore::DeprecationWarning",
                "--disable-warnings",
                "/ws/tests/a.tavern.yaml",
                "/ws/tests/api/b.tavern.yaml::get users",
                "/ws/tests/api/b.tavern.yaml::create user[alice-1]",
                "--junit-xml=/cache/reports/run.xml",
                "--rootdir=/ws/tests",
            ]
        );
        assert_eq!(invocation.cwd().as_str(), "/ws/tests");
        assert_eq!(
            invocation.pythonpath(),
            OsStr::new("/usr/lib/py:/ws/tests:/ws/tests/api")
        );
    }

    #[test]
    fn no_targets_is_an_error() {
        let error = RunnerInvocation::new(
            &RunnerConfig::default(),
            &[],
            Utf8Path::new("/ws"),
            "/cache/run.xml".into(),
            OsStr::new(""),
        )
        .unwrap_err();
        assert!(matches!(error, RunnerError::NoTargets), "{error:?}");
    }

    fn shell_config(script: &str) -> RunnerConfig {
        RunnerConfig {
            program: "sh".to_owned(),
            extra_args: vec!["-c".to_owned(), script.to_owned(), "sh".to_owned()],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_writes_report() {
        let dir = camino_tempfile::tempdir().unwrap();
        let config = shell_config(
            r#"for arg in "$@"; do
                case "$arg" in
                    --junit-xml=*) printf '<testsuite><testcase classname="a" name="T"/></testsuite>' > "${arg#--junit-xml=}" ;;
                esac
            done
            echo "1 passed"
            echo "PYTHONPATH=$PYTHONPATH" >&2"#,
        );
        let junit_path = dir.path().join("reports").join("run.xml");
        std::fs::create_dir_all(dir.path().join("reports")).unwrap();
        std::fs::write(&junit_path, "stale").unwrap();

        let invocation = RunnerInvocation::new(
            &config,
            &[RunTarget::File {
                file: dir.path().join("a.tavern.yaml"),
            }],
            dir.path(),
            junit_path.clone(),
            OsStr::new(""),
        )
        .unwrap();
        let outcome = invocation.execute().await.unwrap();

        assert!(outcome.status.success());
        assert_eq!(outcome.report_path, junit_path);
        let report = crate::run_report::RunReport::from_path(&junit_path)
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_without_report_is_an_error() {
        let dir = camino_tempfile::tempdir().unwrap();
        let junit_path = dir.path().join("run.xml");
        // A report from an earlier run must not be picked up.
        std::fs::write(&junit_path, "<testsuite/>").unwrap();

        let invocation = RunnerInvocation::new(
            &shell_config("exit 3"),
            &[RunTarget::File {
                file: dir.path().join("a.tavern.yaml"),
            }],
            dir.path(),
            junit_path,
            OsStr::new(""),
        )
        .unwrap();
        let error = invocation.execute().await.unwrap_err();
        assert!(matches!(error, RunnerError::ReportMissing { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = camino_tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            program: "tavern-crawler-nonexistent-runner".to_owned(),
            extra_args: Vec::new(),
        };
        let invocation = RunnerInvocation::new(
            &config,
            &[RunTarget::File {
                file: dir.path().join("a.tavern.yaml"),
            }],
            dir.path(),
            dir.path().join("run.xml"),
            OsStr::new(""),
        )
        .unwrap();
        let error = invocation.execute().await.unwrap_err();
        assert!(matches!(error, RunnerError::Spawn { .. }), "{error:?}");
    }
}
