// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging run report and cache results into the index.

use crate::{
    cache::ResultCache,
    entity::{TestKind, TestResult},
    index::TestIndex,
    node_id::NodeId,
    run_report::RunReport,
};
use tracing::debug;

/// Counts of where the results applied by [`reconcile`] came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entities whose result came from the run report.
    pub from_report: usize,

    /// Entities whose result came from the cache.
    pub from_cache: usize,

    /// Entities for which neither source had a result.
    pub untouched: usize,
}

/// Applies results to every entity in `index`.
///
/// For each entity, the run report's result takes priority over the cache's. A parameter variant
/// without a report entry of its own is also looked up as the case `<test>[<variant>]` under its
/// parent test's class name, before falling back to the cache. Variant results are never inferred
/// from the parent test, and never taken from a case reported for another file.
///
/// Applied results go through [`TestIndex::set_result`], so ancestors are re-aggregated. Once all
/// entities are processed, the final results of the entities that were touched are written back
/// to the cache.
pub fn reconcile(
    index: &mut TestIndex,
    cache: &mut ResultCache,
    report: Option<&RunReport>,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();
    let node_ids: Vec<NodeId> = index.node_ids().cloned().collect();
    let mut touched = Vec::new();

    for node_id in node_ids {
        let from_report = report.and_then(|report| report_result(index, report, &node_id));
        let result = match from_report {
            Some(result) => {
                summary.from_report += 1;
                result
            }
            None => match cache.get_result(node_id.as_str()) {
                Some(result) => {
                    summary.from_cache += 1;
                    result
                }
                None => {
                    summary.untouched += 1;
                    continue;
                }
            },
        };

        // The node ID comes from the index itself, so this can't fail.
        if index.set_result(node_id.as_str(), result).is_ok() {
            touched.push(node_id);
        }
    }

    cache.set_results(
        touched
            .iter()
            .filter_map(|node_id| index.get(node_id.as_str())),
    );

    debug!(
        from_report = summary.from_report,
        from_cache = summary.from_cache,
        untouched = summary.untouched,
        "reconciled results"
    );
    summary
}

fn report_result(index: &TestIndex, report: &RunReport, node_id: &NodeId) -> Option<TestResult> {
    if let Some(result) = report.get(node_id.as_str()) {
        return Some(result.clone());
    }

    let entity = index.get(node_id.as_str())?;
    if entity.kind() != TestKind::ParameterVariant {
        return None;
    }
    let parent = index.get(entity.parent()?.as_str())?;
    let case_name = format!("{}[{}]", parent.name(), entity.name());
    report
        .get_case(parent.node_id().class_part(), &case_name)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{EntityTree, TestEntity, TestState},
        node_id::NodeIdGenerator,
    };
    use camino::Utf8Path;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const FILE: &str = "/ws/tests/users.tavern.yaml";

    fn index() -> TestIndex {
        let path = Utf8Path::new(FILE);
        let ids = NodeIdGenerator::new(Some("/ws".into()));
        let test_id = ids.test_id(path, "get users");
        let variants = ["a", "b"].map(|name| {
            TestEntity::new(
                TestKind::ParameterVariant,
                name,
                ids.variant_id(&test_id, name),
                path,
            )
        });
        let plain_id = ids.test_id(path, "create user");

        let mut index = TestIndex::new();
        index
            .add_all([
                EntityTree::with_leaves(
                    TestEntity::new(TestKind::Test, "get users", test_id, path),
                    variants,
                ),
                EntityTree::leaf(TestEntity::new(TestKind::Test, "create user", plain_id, path)),
            ])
            .unwrap();
        index
    }

    fn state_of(index: &TestIndex, node_id: &str) -> TestState {
        index.get(node_id).unwrap().result().state
    }

    fn cache_with(results: &[(&str, TestState)]) -> ResultCache {
        let mut cache = ResultCache::new("/nonexistent/.cache");
        for (node_id, state) in results {
            let mut entity = TestEntity::new(
                TestKind::Test,
                "x",
                NodeId::from(*node_id),
                Utf8Path::new(FILE),
            );
            *entity.result_mut() = TestResult::with_state(*state);
            cache.set_result(&entity);
        }
        cache
    }

    #[test]
    fn report_takes_priority_over_cache() {
        let mut index = index();
        let mut cache = cache_with(&[("tests.users.tavern.yaml::create user", TestState::Fail)]);
        let report = RunReport::parse(indoc! {r#"
            <testsuite>
                <testcase classname="tests.users.tavern.yaml" name="create user"/>
            </testsuite>
        "#})
        .unwrap();

        let summary = reconcile(&mut index, &mut cache, Some(&report));
        assert_eq!(summary.from_report, 1);
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::create user"),
            TestState::Pass
        );
        // Written back, uncompressed.
        let stored = cache
            .iter()
            .find(|(id, _)| id.as_str() == "tests.users.tavern.yaml::create user")
            .map(|(_, result)| result.state);
        assert_eq!(stored, Some(TestState::Pass));
    }

    #[test]
    fn cache_only_yields_cached_states() {
        let mut index = index();
        let mut cache = cache_with(&[("tests.users.tavern.yaml::create user", TestState::Fail)]);

        let summary = reconcile(&mut index, &mut cache, None);
        assert_eq!(summary.from_cache, 1);
        assert_eq!(summary.from_report, 0);
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::create user"),
            TestState::FailCached
        );
    }

    #[test]
    fn variants_are_reconciled_individually() {
        let mut index = index();
        let mut cache = cache_with(&[("tests.users.tavern.yaml::get users[b]", TestState::Pass)]);
        let report = RunReport::parse(indoc! {r#"
            <testsuite>
                <testcase classname="tests.users.tavern.yaml" name="get users[a]">
                    <failure>boom</failure>
                </testcase>
            </testsuite>
        "#})
        .unwrap();

        let summary = reconcile(&mut index, &mut cache, Some(&report));
        assert_eq!(summary.from_report, 1);
        assert_eq!(summary.from_cache, 1);

        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users[a]"),
            TestState::Fail
        );
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users[b]"),
            TestState::PassCached
        );
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users"),
            TestState::Fail
        );
        assert_eq!(state_of(&index, FILE), TestState::Fail);
    }

    #[test]
    fn variant_found_by_parent_case_name() {
        let mut index = index();
        let mut cache = cache_with(&[]);
        let report = RunReport::parse(indoc! {r#"
            <testsuite>
                <testcase classname="tests.users.tavern.yaml" name="get users[b]"><skipped/></testcase>
            </testsuite>
        "#})
        .unwrap();

        reconcile(&mut index, &mut cache, Some(&report));
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users[b]"),
            TestState::Skipped
        );
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users[a]"),
            TestState::Unset
        );
        // Skipped outranks Unset.
        assert_eq!(
            state_of(&index, "tests.users.tavern.yaml::get users"),
            TestState::Skipped
        );
    }

    #[test]
    fn same_named_variant_in_another_file_is_untouched() {
        let ids = NodeIdGenerator::new(Some("/ws".into()));
        let mut index = TestIndex::new();
        for file in ["/ws/a.tavern.yaml", "/ws/b.tavern.yaml"] {
            let path = Utf8Path::new(file);
            let test_id = ids.test_id(path, "T");
            let variant = TestEntity::new(
                TestKind::ParameterVariant,
                "x",
                ids.variant_id(&test_id, "x"),
                path,
            );
            index
                .add(EntityTree::with_leaves(
                    TestEntity::new(TestKind::Test, "T", test_id, path),
                    [variant],
                ))
                .unwrap();
        }
        let mut cache = cache_with(&[]);
        let report = RunReport::parse(indoc! {r#"
            <testsuite>
                <testcase classname="b.tavern.yaml" name="T[x]"><failure>boom</failure></testcase>
            </testsuite>
        "#})
        .unwrap();

        let summary = reconcile(&mut index, &mut cache, Some(&report));
        assert_eq!(summary.from_report, 1);
        assert_eq!(state_of(&index, "b.tavern.yaml::T[x]"), TestState::Fail);
        assert_eq!(state_of(&index, "a.tavern.yaml::T[x]"), TestState::Unset);
        assert!(
            cache.iter().all(|(id, _)| !id.as_str().starts_with("a.tavern.yaml")),
            "nothing is cached for the file that wasn't run"
        );
    }

    #[test]
    fn nothing_to_apply() {
        let mut index = index();
        let mut cache = cache_with(&[]);
        let summary = reconcile(&mut index, &mut cache, None);
        assert_eq!(
            summary,
            ReconcileSummary {
                from_report: 0,
                from_cache: 0,
                untouched: index.len(),
            }
        );
        assert!(cache.is_empty());
    }
}
