// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node identifiers, mirroring the addressing scheme pytest uses for Tavern tests.
//!
//! * a file is identified by its path,
//! * a test by `<dotted path relative to the common root>::<test name>`,
//! * a parameter variant by `<test node ID>[<variant name>]`.
//!
//! pytest computes test paths relative to its `--rootdir`, which tavern-crawler always sets to the
//! deepest directory shared by every test file in the batch (see [`common_root`]). Test node IDs
//! are therefore only stable for as long as the set of discovered files doesn't change.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

/// The unique identifier of a file, test or parameter variant within an index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new node ID from a raw string, as found in a run report or the cache.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The node ID of a file.
    pub fn for_file(path: &Utf8Path) -> Self {
        Self(path.as_str().to_owned())
    }

    /// The node ID of the parameter variant `variant_name` of the test `parent`.
    pub fn for_variant(parent: &NodeId, variant_name: &str) -> Self {
        Self(format!("{parent}[{variant_name}]"))
    }

    /// Returns the node ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// For test and variant node IDs, returns the dotted file path before the first `::`
    /// separator. This is the class name the test is reported under.
    pub fn class_part(&self) -> Option<&str> {
        self.0.split_once("::").map(|(class, _)| class)
    }

    /// For test and variant node IDs, returns the part after the last `::` separator.
    pub fn test_part(&self) -> Option<&str> {
        self.0.rsplit_once("::").map(|(_, test)| test)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Computes the deepest directory shared by all `files`.
///
/// Each file's containing directory is split into components and the component lists are reduced
/// pairwise to their longest common prefix. A single file yields its own directory; an empty input
/// yields `None`. Absolute paths that share nothing else degenerate to the filesystem root.
pub fn common_root<'a>(files: impl IntoIterator<Item = &'a Utf8Path>) -> Option<Utf8PathBuf> {
    let mut prefix: Option<Vec<Utf8Component<'a>>> = None;

    for file in files {
        let dir = file.parent().unwrap_or(file);
        let components: Vec<_> = dir.components().collect();

        prefix = Some(match prefix {
            None => components,
            Some(mut current) => {
                let shared = current
                    .iter()
                    .zip(&components)
                    .take_while(|(a, b)| a == b)
                    .count();
                current.truncate(shared);
                current
            }
        });
    }

    prefix.map(|components| components.into_iter().collect())
}

/// Generates node IDs for entities of one discovery batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeIdGenerator {
    common_root: Option<Utf8PathBuf>,
}

impl NodeIdGenerator {
    /// Creates a generator relative to the given common root.
    pub fn new(common_root: Option<Utf8PathBuf>) -> Self {
        Self { common_root }
    }

    /// Creates a generator whose root is the common root of `files`.
    pub fn for_files<'a>(files: impl IntoIterator<Item = &'a Utf8Path>) -> Self {
        Self::new(common_root(files))
    }

    /// Returns the common root, if known.
    pub fn common_root(&self) -> Option<&Utf8Path> {
        self.common_root.as_deref()
    }

    /// Replaces the common root. Returns true if it changed, in which case previously generated
    /// test IDs are stale.
    pub fn set_common_root(&mut self, common_root: Option<Utf8PathBuf>) -> bool {
        let changed = self.common_root != common_root;
        self.common_root = common_root;
        changed
    }

    /// The node ID of a test file.
    pub fn file_id(&self, path: &Utf8Path) -> NodeId {
        NodeId::for_file(path)
    }

    /// The node ID of the test `test_name` declared in `path`.
    pub fn test_id(&self, path: &Utf8Path, test_name: &str) -> NodeId {
        NodeId(format!("{}::{test_name}", self.dotted_path(path)))
    }

    /// The node ID of a parameter variant.
    pub fn variant_id(&self, parent: &NodeId, variant_name: &str) -> NodeId {
        NodeId::for_variant(parent, variant_name)
    }

    /// The file's path relative to the common root, with separators replaced by `.`.
    ///
    /// Without a common root (or for files outside it), this is just the file name.
    pub fn dotted_path(&self, path: &Utf8Path) -> String {
        let file_name = || path.file_name().unwrap_or(path.as_str()).to_owned();

        let Some(root) = &self.common_root else {
            return file_name();
        };
        let Ok(relative) = path.strip_prefix(root) else {
            return file_name();
        };

        let tokens: Vec<&str> = relative
            .components()
            .filter_map(|component| match component {
                Utf8Component::Normal(token) => Some(token),
                _ => None,
            })
            .collect();
        if tokens.is_empty() {
            file_name()
        } else {
            tokens.join(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn paths(input: &[&'static str]) -> Vec<&'static Utf8Path> {
        input.iter().map(|path| Utf8Path::new(*path)).collect()
    }

    #[test_case(&["/a/b/c/t1.yaml", "/a/b/d/t2.yaml"], Some("/a/b") ; "siblings")]
    #[test_case(&["/a/b/c/t1.yaml"], Some("/a/b/c") ; "single file")]
    #[test_case(&["/a/b/t1.yaml", "/a/b/c/d/t2.yaml"], Some("/a/b") ; "nested")]
    #[test_case(&["/x/t1.yaml", "/y/t2.yaml"], Some("/") ; "diverging")]
    #[test_case(&["/a/b/c/t1.yaml", "/a/b/c/t2.yaml", "/a/e/t3.yaml"], Some("/a") ; "three files")]
    #[test_case(&[], None ; "empty")]
    fn common_root_cases(files: &[&'static str], expected: Option<&str>) {
        assert_eq!(
            common_root(paths(files)),
            expected.map(Utf8PathBuf::from),
        );
    }

    #[test]
    fn common_root_is_order_independent() {
        let forward = common_root(paths(&["/a/b/c/t1.yaml", "/a/b/d/t2.yaml", "/a/b/t3.yaml"]));
        let backward = common_root(paths(&["/a/b/t3.yaml", "/a/b/d/t2.yaml", "/a/b/c/t1.yaml"]));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_ids_are_dotted_relative_paths() {
        let ids = NodeIdGenerator::for_files(paths(&[
            "/ws/tests/api/t1.tavern.yaml",
            "/ws/tests/t2.tavern.yaml",
        ]));
        assert_eq!(ids.common_root(), Some(Utf8Path::new("/ws/tests")));

        assert_eq!(
            ids.test_id(Utf8Path::new("/ws/tests/api/t1.tavern.yaml"), "get users"),
            NodeId::from("api.t1.tavern.yaml::get users"),
        );
        assert_eq!(
            ids.test_id(Utf8Path::new("/ws/tests/t2.tavern.yaml"), "T"),
            NodeId::from("t2.tavern.yaml::T"),
        );
    }

    #[test]
    fn test_ids_without_root_use_file_name() {
        let ids = NodeIdGenerator::default();
        assert_eq!(
            ids.test_id(Utf8Path::new("/ws/tests/t.tavern.yaml"), "T"),
            NodeId::from("t.tavern.yaml::T"),
        );
    }

    #[test]
    fn variant_and_file_ids() {
        let ids = NodeIdGenerator::for_files(paths(&["/ws/T.tavern.yaml"]));
        let file = ids.file_id(Utf8Path::new("/ws/T.tavern.yaml"));
        assert_eq!(file.as_str(), "/ws/T.tavern.yaml");

        let test = ids.test_id(Utf8Path::new("/ws/T.tavern.yaml"), "T");
        let variant = ids.variant_id(&test, "a-c");
        assert_eq!(variant.as_str(), "T.tavern.yaml::T[a-c]");
        assert_eq!(variant.test_part(), Some("T[a-c]"));
        assert_eq!(variant.class_part(), Some("T.tavern.yaml"));
        assert_eq!(ids.file_id(Utf8Path::new("/ws/T.tavern.yaml")).class_part(), None);
    }

    #[test]
    fn set_common_root_reports_changes() {
        let mut ids = NodeIdGenerator::new(Some("/a".into()));
        assert!(!ids.set_common_root(Some("/a".into())));
        assert!(ids.set_common_root(Some("/a/b".into())));
        assert!(ids.set_common_root(None));
    }
}
