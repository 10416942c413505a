// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use indoc::indoc;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use tavern_index::config::{EngineContext, RunnerConfig};

pub(crate) static USERS: &str = indoc! {r#"
    test_name: get users
    includes:
      - !include common.yaml
    marks:
      - parametrize:
          key: env
          vals: ["{env}", prod]
    stages:
      - name: list
        request:
          url: http://localhost/users
    ---
    test_name: delete user
    stages: []
"#};

pub(crate) static COMMON: &str = indoc! {"
    variables:
      env: staging
"};

pub(crate) static HEALTH: &str = indoc! {"
    test_name: ping
    stages:
      - name: ping
        request:
          url: http://localhost/ping
"};

/// A workspace with `tests/api/users.tavern.yaml` and `tests/health.tavern.yaml`.
pub(crate) struct Workspace {
    pub(crate) dir: Utf8TempDir,
    pub(crate) users: Utf8PathBuf,
    pub(crate) health: Utf8PathBuf,
}

impl Workspace {
    pub(crate) fn new() -> Result<Self> {
        let dir = camino_tempfile::tempdir()?;
        let api = dir.path().join("tests").join("api");
        std::fs::create_dir_all(&api)?;
        std::fs::write(api.join("common.yaml"), COMMON)?;

        let users = api.join("users.tavern.yaml");
        std::fs::write(&users, USERS)?;
        let health = dir.path().join("tests").join("health.tavern.yaml");
        std::fs::write(&health, HEALTH)?;

        Ok(Self { dir, users, health })
    }

    pub(crate) fn context(&self) -> EngineContext {
        EngineContext::from_parts(
            self.dir.path(),
            self.dir.path().join("tests"),
            self.dir.path().join(".cache"),
            "",
            RunnerConfig::default(),
        )
    }
}

/// A report for the workspace, as pytest would write it with `--rootdir=tests`.
pub(crate) fn junit_report() -> Result<String> {
    let mut suite = TestSuite::new("pytest");

    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
    status.set_message("expected 200, got 500");
    let mut prod = TestCase::new("get users[prod]", status);
    prod.set_classname("api.users.tavern.yaml");

    let mut staging = TestCase::new("get users[staging]", TestCaseStatus::success());
    staging.set_classname("api.users.tavern.yaml");

    let mut ping = TestCase::new("ping", TestCaseStatus::skipped());
    ping.set_classname("health.tavern.yaml");

    suite.add_test_cases([staging, prod, ping]);

    let mut report = Report::new("pytest");
    report.add_test_suite(suite);
    Ok(report.to_string()?)
}
