// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{OptionExt, Result};
use pretty_assertions::assert_eq;
use tavern_index::{
    discovery::discover_test_files,
    entity::{TestKind, TestState},
    manager::TestManager,
    run_report::RunReport,
};

fn state(manager: &TestManager, node_id: &str) -> Result<TestState> {
    let entity = manager
        .index()
        .get(node_id)
        .ok_or_eyre(format!("{node_id} is not indexed"))?;
    Ok(entity.result().state)
}

#[tokio::test]
async fn discover_and_index() -> Result<()> {
    let workspace = Workspace::new()?;
    let files = discover_test_files(&workspace.dir.path().join("tests"))?;
    assert_eq!(files, [workspace.users.clone(), workspace.health.clone()]);

    let mut manager = TestManager::new(workspace.context());
    let summary = manager.load_test_files(&files).await?;
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);

    let tests: Vec<_> = manager
        .index()
        .filter(TestKind::Test)
        .into_iter()
        .map(|entity| entity.node_id().as_str())
        .collect();
    assert_eq!(
        tests,
        [
            "api.users.tavern.yaml::get users",
            "api.users.tavern.yaml::delete user",
            "health.tavern.yaml::ping",
        ]
    );

    let get_users = manager
        .index()
        .get("api.users.tavern.yaml::get users")
        .ok_or_eyre("get users is not indexed")?;
    let variants: Vec<_> = manager
        .index()
        .children(get_users)
        .map(|entity| entity.name())
        .collect();
    assert_eq!(variants, ["staging", "prod"]);
    assert_eq!(
        get_users.relative_file_location().as_str(),
        "tests/api/users.tavern.yaml"
    );
    assert_eq!(manager.index().filter(TestKind::File).len(), 2);

    Ok(())
}

#[tokio::test]
async fn report_results_then_cached_results() -> Result<()> {
    let workspace = Workspace::new()?;
    let files = [workspace.users.clone(), workspace.health.clone()];

    let mut manager = TestManager::new(workspace.context());
    manager.load_test_files(&files).await?;
    let report = RunReport::parse(&junit_report()?)?;
    let summary = manager.apply_run_report(&report).await?;
    assert_eq!(summary.from_report, 3);

    assert_eq!(
        state(&manager, "api.users.tavern.yaml::get users[staging]")?,
        TestState::Pass
    );
    assert_eq!(
        state(&manager, "api.users.tavern.yaml::get users[prod]")?,
        TestState::Fail
    );
    assert_eq!(
        state(&manager, "api.users.tavern.yaml::get users")?,
        TestState::Fail
    );
    assert_eq!(
        state(&manager, "api.users.tavern.yaml::delete user")?,
        TestState::Unset
    );
    assert_eq!(state(&manager, workspace.users.as_str())?, TestState::Fail);
    assert_eq!(state(&manager, "health.tavern.yaml::ping")?, TestState::Skipped);
    assert_eq!(state(&manager, workspace.health.as_str())?, TestState::Skipped);

    let prod = manager
        .index()
        .get("api.users.tavern.yaml::get users[prod]")
        .ok_or_eyre("prod variant is not indexed")?;
    assert_eq!(
        prod.result().failure.as_deref(),
        Some("expected 200, got 500")
    );

    // A fresh manager only has the cache to go on.
    let mut fresh = TestManager::new(workspace.context());
    let summary = fresh.load_test_results(Some(&files[..])).await?;
    assert_eq!(summary.from_report, 0);
    assert_eq!(summary.from_cache, 3);

    assert_eq!(
        state(&fresh, "api.users.tavern.yaml::get users[staging]")?,
        TestState::PassCached
    );
    assert_eq!(
        state(&fresh, "api.users.tavern.yaml::get users")?,
        TestState::FailCached
    );
    // `delete user` has never run, which outranks any cached state.
    assert_eq!(state(&fresh, workspace.users.as_str())?, TestState::Unset);
    assert_eq!(
        state(&fresh, workspace.health.as_str())?,
        TestState::SkippedCached
    );

    Ok(())
}

#[tokio::test]
async fn deleted_files_are_dropped_from_the_cache() -> Result<()> {
    let workspace = Workspace::new()?;
    let files = [workspace.users.clone(), workspace.health.clone()];

    let mut manager = TestManager::new(workspace.context());
    manager.load_test_files(&files).await?;
    manager
        .apply_run_report(&RunReport::parse(&junit_report()?)?)
        .await?;
    assert_eq!(manager.cache().len(), 3);

    let removed = manager
        .delete_test_files(Some(std::slice::from_ref(&workspace.users)), true)
        .await?;
    assert_eq!(removed.len(), 5);
    assert_eq!(manager.cache().len(), 1);
    manager.save_cache().await?;

    let mut fresh = TestManager::new(workspace.context());
    fresh
        .load_test_results(Some(std::slice::from_ref(&workspace.health)))
        .await?;
    assert_eq!(fresh.cache().len(), 1);
    assert_eq!(
        state(&fresh, "health.tavern.yaml::ping")?,
        TestState::SkippedCached
    );

    Ok(())
}
