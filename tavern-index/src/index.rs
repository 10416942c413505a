// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test index: every file, test and parameter variant of a workspace, keyed by node ID.
//!
//! The index owns all entities. Parent and child links are node IDs, which keeps the hierarchy
//! free of ownership cycles while still allowing upward traversal when results change.

use crate::{
    entity::{EntityTree, TestEntity, TestKind, TestResult, TestState},
    errors::IndexError,
    node_id::NodeId,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::debug;

/// The hierarchical store of test entities.
#[derive(Clone, Debug, Default)]
pub struct TestIndex {
    entities: IndexMap<NodeId, TestEntity>,
    files: HashMap<Utf8PathBuf, IndexSet<NodeId>>,
}

impl TestIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a test (with its variants) or a file (with its tests) to the index.
    ///
    /// The file entity is synthesized if it isn't indexed yet. An entity whose node ID is already
    /// present replaces the old one along with its subtree.
    pub fn add(&mut self, tree: EntityTree) -> Result<(), IndexError> {
        match tree.entity.kind() {
            TestKind::ParameterVariant => Err(IndexError::OrphanVariant {
                node_id: tree.entity.node_id().clone(),
            }),
            TestKind::Test => {
                let file_id = self.ensure_file(&tree.entity);
                self.insert_subtree(tree, Some(file_id));
                Ok(())
            }
            TestKind::File => {
                let EntityTree { entity, children } = tree;
                let file_id = entity.node_id().clone();
                if !self.entities.contains_key(&file_id) {
                    self.record_file_entity(entity);
                }
                for child in children {
                    self.add(child)?;
                }
                debug!(file = %file_id, "indexed file");
                Ok(())
            }
        }
    }

    /// Adds every tree in order, stopping at the first error.
    pub fn add_all(&mut self, trees: impl IntoIterator<Item = EntityTree>) -> Result<(), IndexError> {
        for tree in trees {
            self.add(tree)?;
        }
        Ok(())
    }

    /// Removes a file, and every entity recorded for it, from the index.
    ///
    /// Returns the node IDs that were removed, which is empty if the file is unknown.
    pub fn delete_file(&mut self, path: &Utf8Path) -> Vec<NodeId> {
        let Some(node_ids) = self.files.remove(path) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(node_ids.len() + 1);
        for node_id in node_ids {
            if self.entities.shift_remove(&node_id).is_some() {
                removed.push(node_id);
            }
        }
        let file_id = NodeId::for_file(path);
        if self.entities.shift_remove(&file_id).is_some() {
            removed.push(file_id);
        }

        debug!(file = %path, removed = removed.len(), "deleted file from index");
        removed
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.files.clear();
    }

    /// Returns every entity of the given kind, in insertion order.
    pub fn filter(&self, kind: TestKind) -> Vec<&TestEntity> {
        self.entities.values().filter(|e| e.kind() == kind).collect()
    }

    /// Looks up an entity by node ID.
    pub fn get(&self, node_id: &str) -> Option<&TestEntity> {
        self.entities.get(node_id)
    }

    /// Returns the first entity matching `predicate`, in insertion order.
    pub fn find(&self, mut predicate: impl FnMut(&TestEntity) -> bool) -> Option<&TestEntity> {
        self.entities.values().find(|e| predicate(e))
    }

    /// Returns the tests and variants recorded for a file, in insertion order.
    pub fn entities_for_file(&self, path: &Utf8Path) -> Vec<&TestEntity> {
        self.files
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|node_id| self.entities.get(node_id))
            .collect()
    }

    /// Iterates over the children of an entity.
    pub fn children<'a>(&'a self, entity: &'a TestEntity) -> impl Iterator<Item = &'a TestEntity> {
        entity.children().filter_map(|id| self.entities.get(id))
    }

    /// Iterates over all entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TestEntity> {
        self.entities.values()
    }

    /// Iterates over all node IDs in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.entities.keys()
    }

    /// Iterates over the paths of all indexed files.
    pub fn files(&self) -> impl Iterator<Item = &Utf8Path> {
        self.filter(TestKind::File)
            .into_iter()
            .map(TestEntity::file_location)
    }

    /// The number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Sets the result of an entity and re-aggregates it and all of its ancestors.
    ///
    /// For an entity with children the given state is immediately replaced by the aggregate of
    /// its children.
    pub fn set_result(&mut self, node_id: &str, result: TestResult) -> Result<(), IndexError> {
        let entity = self
            .entities
            .get_mut(node_id)
            .ok_or_else(|| IndexError::UnknownNode {
                node_id: NodeId::new(node_id),
            })?;
        *entity.result_mut() = result;
        let mut parent = entity.parent().cloned();
        let node_id = entity.node_id().clone();

        self.aggregate(node_id.as_str());

        while let Some(parent_id) = parent {
            let state = self.aggregate(parent_id.as_str());
            let Some(parent_entity) = self.entities.get_mut(&parent_id) else {
                break;
            };
            if let Some(state) = state {
                *parent_entity.result_mut() = TestResult::with_state(state);
            }
            parent = parent_entity.parent().cloned();
        }

        Ok(())
    }

    /// Recomputes the state of an entity from its children.
    ///
    /// Children that have children of their own are aggregated first. The entity's state becomes
    /// the most severe state among its direct children; an entity without children keeps its
    /// state. Returns the resulting state, or `None` if the node is unknown.
    pub fn aggregate(&mut self, node_id: &str) -> Option<TestState> {
        let entity = self.entities.get(node_id)?;
        if !entity.has_children() {
            return Some(entity.result().state);
        }

        let children: Vec<NodeId> = entity.children().cloned().collect();
        let mut state: Option<TestState> = None;
        let mut pass_count = 0;
        for child_id in &children {
            let Some(child_state) = self.aggregate(child_id.as_str()) else {
                continue;
            };
            if child_state == TestState::Pass {
                pass_count += 1;
            }
            state = Some(match state {
                None => child_state,
                Some(state) => state.max_severity(child_state),
            });
        }

        let entity = self.entities.get_mut(node_id)?;
        entity.set_children_pass_count(pass_count);
        if let Some(state) = state {
            entity.result_mut().state = state;
        }
        Some(entity.result().state)
    }

    fn ensure_file(&mut self, test: &TestEntity) -> NodeId {
        let file_id = NodeId::for_file(test.file_location());
        if !self.entities.contains_key(&file_id) {
            self.record_file_entity(TestEntity::file(
                test.file_location(),
                test.relative_file_location(),
            ));
        }
        file_id
    }

    fn record_file_entity(&mut self, mut file: TestEntity) {
        file.parent = None;
        file.children.clear();
        self.files
            .entry(file.file_location().to_owned())
            .or_default();
        self.entities.insert(file.node_id().clone(), file);
    }

    fn insert_subtree(&mut self, tree: EntityTree, parent: Option<NodeId>) {
        let EntityTree {
            mut entity,
            children,
        } = tree;
        let node_id = entity.node_id().clone();

        if self.entities.contains_key(&node_id) {
            self.remove_subtree(&node_id);
        }

        entity.parent = parent.clone();
        entity.children = children
            .iter()
            .map(|child| child.entity.node_id().clone())
            .collect();

        if let Some(parent_id) = &parent
            && let Some(parent_entity) = self.entities.get_mut(parent_id)
        {
            parent_entity.children.insert(node_id.clone());
        }
        self.files
            .entry(entity.file_location().to_owned())
            .or_default()
            .insert(node_id.clone());
        self.entities.insert(node_id.clone(), entity);

        for child in children {
            self.insert_subtree(child, Some(node_id.clone()));
        }
    }

    fn remove_subtree(&mut self, node_id: &NodeId) {
        let Some(entity) = self.entities.shift_remove(node_id) else {
            return;
        };
        if let Some(parent_id) = entity.parent()
            && let Some(parent) = self.entities.get_mut(parent_id)
        {
            parent.children.shift_remove(node_id);
        }
        if let Some(ids) = self.files.get_mut(entity.file_location()) {
            ids.shift_remove(node_id);
        }
        for child in entity.children() {
            self.remove_subtree(child);
        }
    }
}
