// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The entity model: files, tests and parameter variants, and their results.

use crate::node_id::NodeId;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a [`TestEntity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestKind {
    /// A test file. Files are the roots of the hierarchy.
    File,

    /// A test declared in a file.
    Test,

    /// One concrete combination of a test's parameters.
    ParameterVariant,
}

impl TestKind {
    /// Returns a short lowercase name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Test => "test",
            Self::ParameterVariant => "parameter-variant",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of a test result.
///
/// The `*Cached` states are presentation variants meaning "last known, not from a fresh run".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestState {
    /// Transient: the test is currently executing. Never persisted.
    Running,

    /// A pass carried over from a previous run.
    PassCached,

    /// A skip carried over from a previous run.
    SkippedCached,

    /// A failure carried over from a previous run.
    FailCached,

    /// The test passed.
    Pass,

    /// No result is known.
    #[default]
    Unset,

    /// The test was skipped (`skip`, `skipif` or `xfail` marks).
    Skipped,

    /// The test failed.
    Fail,
}

impl TestState {
    /// All states, in increasing order of severity.
    pub const ALL: [TestState; 8] = [
        Self::Running,
        Self::PassCached,
        Self::SkippedCached,
        Self::FailCached,
        Self::Pass,
        Self::Unset,
        Self::Skipped,
        Self::Fail,
    ];

    /// The aggregation severity of this state. Higher wins.
    ///
    /// `Unset` ranks above `Pass`, so a parent with any unrun child is reported as unrun rather
    /// than passing.
    pub fn severity(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::PassCached => 1,
            Self::SkippedCached => 2,
            Self::FailCached => 3,
            Self::Pass => 4,
            Self::Unset => 5,
            Self::Skipped => 6,
            Self::Fail => 7,
        }
    }

    /// Returns the more severe of the two states.
    pub fn max_severity(self, other: Self) -> Self {
        if other.severity() >= self.severity() {
            other
        } else {
            self
        }
    }

    /// Maps a terminal state to its cached presentation variant. Other states are unchanged.
    pub fn cached(self) -> Self {
        match self {
            Self::Fail => Self::FailCached,
            Self::Skipped => Self::SkippedCached,
            Self::Pass => Self::PassCached,
            other => other,
        }
    }

    /// Returns true for the states produced by a fresh run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Skipped | Self::Fail)
    }

    /// Returns a short lowercase name for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::PassCached => "pass-cached",
            Self::SkippedCached => "skipped-cached",
            Self::FailCached => "fail-cached",
            Self::Pass => "pass",
            Self::Unset => "unset",
            Self::Skipped => "skipped",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a test, as stored in the cache file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// The name of the result. For run report results this is the report's node ID.
    #[serde(default)]
    pub name: String,

    /// The failure or skip message, if any.
    #[serde(default)]
    pub failure: Option<String>,

    /// The state.
    #[serde(default)]
    pub state: TestState,
}

impl TestResult {
    /// Creates a result with the given state and no message.
    pub fn with_state(state: TestState) -> Self {
        Self {
            name: String::new(),
            failure: None,
            state,
        }
    }

    /// Returns a copy with the state mapped to its cached presentation variant.
    pub fn to_cached(&self) -> Self {
        Self {
            state: self.state.cached(),
            ..self.clone()
        }
    }
}

/// The protocol a stage talks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// `request`/`response` stages.
    Http,

    /// `mqtt_publish`/`mqtt_response` stages.
    Mqtt,
}

/// One stage of a test. The raw definition is passed through unmodified.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    raw: serde_yaml::Value,
}

impl Stage {
    /// Wraps a raw stage definition.
    pub fn new(raw: serde_yaml::Value) -> Self {
        Self { raw }
    }

    /// The stage's `name`, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.raw.get("name").and_then(serde_yaml::Value::as_str)
    }

    /// Whether this is an MQTT or an HTTP stage.
    pub fn kind(&self) -> StageKind {
        if self.raw.get("mqtt_publish").is_some() || self.raw.get("mqtt_response").is_some() {
            StageKind::Mqtt
        } else {
            StageKind::Http
        }
    }

    /// The raw stage definition.
    pub fn raw(&self) -> &serde_yaml::Value {
        &self.raw
    }
}

/// A file, test or parameter variant.
///
/// Entities refer to their parent and children by [`NodeId`]; the owning
/// [`TestIndex`](crate::index::TestIndex) resolves those references.
#[derive(Clone, Debug, PartialEq)]
pub struct TestEntity {
    name: String,
    kind: TestKind,
    node_id: NodeId,
    file_location: Utf8PathBuf,
    relative_file_location: Utf8PathBuf,
    file_line: usize,
    stages: Vec<Stage>,
    result: TestResult,
    children_pass_count: usize,
    pub(crate) children: IndexSet<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl TestEntity {
    /// Creates a new entity with an unset result, at line 1.
    pub fn new(
        kind: TestKind,
        name: impl Into<String>,
        node_id: NodeId,
        file_location: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            node_id,
            file_location: file_location.into(),
            relative_file_location: Utf8PathBuf::new(),
            file_line: 1,
            stages: Vec::new(),
            result: TestResult::default(),
            children_pass_count: 0,
            children: IndexSet::new(),
            parent: None,
        }
    }

    /// Synthesizes the file entity for a test file.
    pub fn file(path: &Utf8Path, relative_file_location: &Utf8Path) -> Self {
        let name = path.file_name().unwrap_or(path.as_str());
        Self::new(TestKind::File, name, NodeId::for_file(path), path)
            .with_relative_file_location(relative_file_location)
    }

    /// Sets the path relative to the workspace root.
    pub fn with_relative_file_location(mut self, relative: impl Into<Utf8PathBuf>) -> Self {
        self.relative_file_location = relative.into();
        self
    }

    /// Sets the 1-based line of the declaration.
    pub fn with_file_line(mut self, file_line: usize) -> Self {
        self.file_line = file_line;
        self
    }

    /// Sets the stages.
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind.
    pub fn kind(&self) -> TestKind {
        self.kind
    }

    /// The node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The absolute path of the file declaring this entity.
    pub fn file_location(&self) -> &Utf8Path {
        &self.file_location
    }

    /// The path of the file relative to the workspace root.
    pub fn relative_file_location(&self) -> &Utf8Path {
        &self.relative_file_location
    }

    /// The 1-based line of the declaration.
    pub fn file_line(&self) -> usize {
        self.file_line
    }

    /// The stages, as declared.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The current result.
    pub fn result(&self) -> &TestResult {
        &self.result
    }

    pub(crate) fn result_mut(&mut self) -> &mut TestResult {
        &mut self.result
    }

    /// The number of direct children whose state is [`TestState::Pass`].
    pub fn children_pass_count(&self) -> usize {
        self.children_pass_count
    }

    pub(crate) fn set_children_pass_count(&mut self, count: usize) {
        self.children_pass_count = count;
    }

    /// The node IDs of the direct children, in insertion order.
    pub fn children(&self) -> impl ExactSizeIterator<Item = &NodeId> {
        self.children.iter()
    }

    /// Returns true if this entity has children.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// The node ID of the parent. `None` for files.
    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }
}

/// An entity together with the subtree below it, as produced by parsing and before it is handed
/// to [`TestIndex::add`](crate::index::TestIndex::add).
#[derive(Clone, Debug, PartialEq)]
pub struct EntityTree {
    /// The root of the subtree.
    pub entity: TestEntity,

    /// The children, in order.
    pub children: Vec<EntityTree>,
}

impl EntityTree {
    /// A tree with no children.
    pub fn leaf(entity: TestEntity) -> Self {
        Self {
            entity,
            children: Vec::new(),
        }
    }

    /// A tree with the given leaf children.
    pub fn with_leaves(entity: TestEntity, children: impl IntoIterator<Item = TestEntity>) -> Self {
        Self {
            entity,
            children: children.into_iter().map(Self::leaf).collect(),
        }
    }

    /// Iterates over every entity in the subtree, depth-first, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &TestEntity> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let tree = stack.pop()?;
            stack.extend(tree.children.iter().rev());
            Some(&tree.entity)
        })
    }
}
