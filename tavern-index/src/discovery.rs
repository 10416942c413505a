// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing Tavern test files into entities.
//!
//! A test file is a stream of YAML documents, one test per document. Each test becomes a
//! [`TestKind::Test`] entity, with a [`TestKind::ParameterVariant`] child per combination of its
//! `parametrize` marks.

use crate::{
    entity::{EntityTree, Stage, TestEntity, TestKind},
    errors::{DiscoveryError, DocumentError},
    locator::SourceLineLocator,
    node_id::NodeIdGenerator,
    params::{ParameterExpander, ParametrizeClause},
    variables::VariableResolver,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tracing::{debug, warn};

static INCLUDE_TAG: &str = "!include";
static DOCUMENT_MARKER: &str = "---";

/// File name suffixes of Tavern test files.
pub const TEST_FILE_SUFFIXES: &[&str] = &[".tavern.yaml", ".tavern.yml"];

/// The fields of a test document that the index uses. Everything else is ignored.
///
/// List fields are read leniently: a field that isn't a sequence contributes nothing.
#[derive(Debug, Deserialize)]
struct TestDocument {
    test_name: Option<serde_yaml::Value>,
    #[serde(default)]
    includes: serde_yaml::Value,
    #[serde(default)]
    marks: serde_yaml::Value,
    #[serde(default)]
    stages: serde_yaml::Value,
}

fn sequence(value: serde_yaml::Value) -> Vec<serde_yaml::Value> {
    match value {
        serde_yaml::Value::Sequence(values) => values,
        serde_yaml::Value::Null => Vec::new(),
        other => {
            debug!("ignoring non-sequence value: {other:?}");
            Vec::new()
        }
    }
}

/// The outcome of parsing one test file.
#[derive(Debug)]
pub struct ParsedFile {
    /// The file that was parsed.
    pub path: Utf8PathBuf,

    /// The tests declared in the file, with their variants, in file order.
    pub tests: Vec<EntityTree>,

    /// Problems with individual documents. The affected documents are skipped, or indexed without
    /// variants.
    pub errors: Vec<DocumentError>,
}

impl ParsedFile {
    /// Returns the file entity together with all of its tests.
    pub fn into_tree(self, workspace_root: &Utf8Path) -> EntityTree {
        let relative = relative_to(&self.path, workspace_root);
        EntityTree {
            entity: TestEntity::file(&self.path, &relative),
            children: self.tests,
        }
    }
}

/// Parses test files relative to a batch's node ID generator.
#[derive(Debug)]
pub struct TestFileParser<'a> {
    workspace_root: &'a Utf8Path,
    ids: &'a NodeIdGenerator,
    resolver: &'a mut VariableResolver,
}

impl<'a> TestFileParser<'a> {
    /// Creates a new parser. Included variable files are loaded into `resolver` as they're found.
    pub fn new(
        workspace_root: &'a Utf8Path,
        ids: &'a NodeIdGenerator,
        resolver: &'a mut VariableResolver,
    ) -> Self {
        Self {
            workspace_root,
            ids,
            resolver,
        }
    }

    /// Reads and parses a test file.
    pub async fn parse_file(&mut self, path: &Utf8Path) -> Result<ParsedFile, DiscoveryError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| DiscoveryError::Read {
                    path: path.to_owned(),
                    error,
                })?;
        Ok(self.parse_str(path, &contents).await)
    }

    /// Parses the contents of a test file read from `path`.
    pub async fn parse_str(&mut self, path: &Utf8Path, contents: &str) -> ParsedFile {
        let mut parsed = ParsedFile {
            path: path.to_owned(),
            tests: Vec::new(),
            errors: Vec::new(),
        };
        let mut locator = SourceLineLocator::new(contents.as_bytes());
        let relative = relative_to(path, self.workspace_root);

        for (index, document) in split_documents(contents).into_iter().enumerate() {
            if is_blank_document(document) {
                continue;
            }
            let value = match serde_yaml::from_str::<serde_yaml::Value>(document) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(value) => value,
                Err(error) => {
                    parsed.errors.push(DocumentError::Malformed {
                        path: path.to_owned(),
                        index,
                        error,
                    });
                    continue;
                }
            };
            let document: TestDocument = match serde_yaml::from_value(value) {
                Ok(document) => document,
                Err(error) => {
                    parsed.errors.push(DocumentError::Malformed {
                        path: path.to_owned(),
                        index,
                        error,
                    });
                    continue;
                }
            };
            let Some(test_name) = document
                .test_name
                .as_ref()
                .and_then(serde_yaml::Value::as_str)
                .map(str::trim)
            else {
                parsed.errors.push(DocumentError::MissingTestName {
                    path: path.to_owned(),
                    index,
                });
                continue;
            };

            let file_line = locator.locate(test_name).unwrap_or(1);
            let test = TestEntity::new(
                TestKind::Test,
                test_name,
                self.ids.test_id(path, test_name),
                path,
            )
            .with_relative_file_location(&relative)
            .with_file_line(file_line)
            .with_stages(sequence(document.stages).into_iter().map(Stage::new).collect());

            let clauses: Vec<_> = sequence(document.marks)
                .iter()
                .filter_map(ParametrizeClause::from_mark)
                .collect();
            let variants = if clauses.is_empty() {
                Vec::new()
            } else {
                self.expand(path, &test, &sequence(document.includes), &clauses)
                    .await
                    .unwrap_or_else(|error| {
                        parsed.errors.push(error);
                        Vec::new()
                    })
            };

            parsed.tests.push(EntityTree::with_leaves(test, variants));
        }

        for error in &parsed.errors {
            warn!("{error}");
        }
        debug!(
            path = %path,
            tests = parsed.tests.len(),
            errors = parsed.errors.len(),
            "parsed test file"
        );
        parsed
    }

    async fn expand(
        &mut self,
        path: &Utf8Path,
        test: &TestEntity,
        includes: &[serde_yaml::Value],
        clauses: &[ParametrizeClause],
    ) -> Result<Vec<TestEntity>, DocumentError> {
        let dir = path.parent().unwrap_or(Utf8Path::new(""));
        let includes: Vec<Utf8PathBuf> = includes
            .iter()
            .filter_map(include_path)
            .map(|include| dir.join(include))
            .collect();

        self.resolver
            .load(includes.iter().map(Utf8PathBuf::as_path))
            .await
            .map_err(|error| DocumentError::Include {
                path: path.to_owned(),
                test_name: test.name().to_owned(),
                error,
            })?;

        ParameterExpander::new(self.resolver, &includes)
            .expand(test, clauses)
            .map_err(|error| DocumentError::Parameters {
                path: path.to_owned(),
                test_name: test.name().to_owned(),
                error,
            })
    }
}

/// Reads an `includes` entry: either a plain path or a `!include`-tagged path.
fn include_path(entry: &serde_yaml::Value) -> Option<&str> {
    match entry {
        serde_yaml::Value::String(path) => Some(path.as_str()),
        serde_yaml::Value::Tagged(tagged) if tagged.tag == INCLUDE_TAG => tagged.value.as_str(),
        _ => None,
    }
}

/// Splits a YAML stream into its documents at `---` markers.
///
/// Each document is parsed on its own, so a syntax error in one doesn't affect the others. Text
/// before the first marker is a document only if it's not blank.
fn split_documents(contents: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        if is_document_marker(line) {
            if start > 0 || !is_blank_document(&contents[..offset]) {
                documents.push(&contents[start..offset]);
            }
            // Content after the marker on the same line belongs to the new document.
            start = offset + DOCUMENT_MARKER.len();
        }
        offset += line.len();
    }
    if start > 0 || !is_blank_document(contents) {
        documents.push(&contents[start..]);
    }
    documents
}

fn is_document_marker(line: &str) -> bool {
    match line.strip_prefix(DOCUMENT_MARKER) {
        Some(rest) => rest.is_empty() || rest.starts_with([' ', '\t', '\r', '\n']),
        None => false,
    }
}

// Comments and directives only.
fn is_blank_document(document: &str) -> bool {
    document.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line.starts_with('%')
    })
}

fn relative_to(path: &Utf8Path, workspace_root: &Utf8Path) -> Utf8PathBuf {
    pathdiff::diff_utf8_paths(path, workspace_root).unwrap_or_else(|| path.to_owned())
}

/// Returns true if `path` names a Tavern test file.
pub fn is_test_file(path: &Utf8Path) -> bool {
    path.file_name()
        .is_some_and(|name| TEST_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

/// Finds all Tavern test files under `dir`, sorted by path. A missing `dir` has no test files.
pub fn discover_test_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let mut files = Vec::new();
    if !dir.exists() {
        debug!(dir = %dir, "tests directory does not exist");
        return Ok(files);
    }
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|error| DiscoveryError::Walk {
            dir: dir.to_owned(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|error| DiscoveryError::NonUtf8Path {
                path: error.into_path_buf(),
            })?;
        if is_test_file(&path) {
            files.push(path);
        }
    }

    debug!(dir = %dir, files = files.len(), "discovered test files");
    Ok(files)
}
