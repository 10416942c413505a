// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Global variables declared in included configuration files.
//!
//! Tavern test documents can `include` YAML files exposing a `variables` mapping. Parameter values
//! may then refer to those variables as `{key}` or `{key:type}`.

use crate::errors::{VariableLoadError, VariableResolutionError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Variable tables, one per included file name.
#[derive(Clone, Debug, Default)]
pub struct VariableResolver {
    // Keyed by file name: tavern resolves includes by name, so files with the same name in
    // different directories share a table.
    tables: HashMap<String, HashMap<String, serde_yaml::Value>>,
    loaded: HashSet<Utf8PathBuf>,
}

impl VariableResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and merges the variables of each file. Files that were already loaded are skipped.
    pub async fn load<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Result<(), VariableLoadError> {
        for path in paths {
            if self.loaded.contains(path) {
                continue;
            }

            let contents =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|error| VariableLoadError::Read {
                        path: path.to_owned(),
                        error,
                    })?;
            self.load_str(path, &contents)?;
        }

        Ok(())
    }

    /// Merges the variables declared in `contents`, read from `path`.
    ///
    /// Every YAML document in `contents` contributes its `variables` mapping. Reloading a path is
    /// a no-op.
    pub fn load_str(&mut self, path: &Utf8Path, contents: &str) -> Result<(), VariableLoadError> {
        if self.loaded.contains(path) {
            return Ok(());
        }

        let mut variables = HashMap::new();
        for document in serde_yaml::Deserializer::from_str(contents) {
            let document = serde_yaml::Value::deserialize(document).map_err(|error| {
                VariableLoadError::Parse {
                    path: path.to_owned(),
                    error,
                }
            })?;
            let Some(serde_yaml::Value::Mapping(mapping)) = document.get("variables") else {
                debug!("document in `{path}` has no variables mapping");
                continue;
            };

            for (key, value) in mapping {
                if let Some(key) = scalar_key(key) {
                    variables.insert(key, value.clone());
                }
            }
        }

        debug!(count = variables.len(), "loaded variables from `{path}`");
        self.tables
            .entry(file_name(path).to_owned())
            .or_default()
            .extend(variables);
        self.loaded.insert(path.to_owned());

        Ok(())
    }

    /// Returns true if `path` has been loaded.
    pub fn is_loaded(&self, path: &Utf8Path) -> bool {
        self.loaded.contains(path)
    }

    /// Resolves the placeholder in `token`, if any.
    ///
    /// If `token` contains no `{`, it's returned unchanged as a string. Otherwise the key between
    /// `{` and the first following `}` or `:` is looked up in `candidates` (by file name, in
    /// order) and the first value found replaces the whole token.
    pub fn resolve(
        &self,
        token: &str,
        candidates: &[Utf8PathBuf],
    ) -> Result<serde_yaml::Value, VariableResolutionError> {
        let Some(start) = token.find('{') else {
            return Ok(serde_yaml::Value::String(token.to_owned()));
        };

        let rest = &token[start + 1..];
        let Some(end) = rest.find(['}', ':']) else {
            return Err(VariableResolutionError::Unterminated {
                token: token.to_owned(),
            });
        };
        let key = &rest[..end];

        candidates
            .iter()
            .find_map(|candidate| self.tables.get(file_name(candidate))?.get(key))
            .cloned()
            .ok_or_else(|| VariableResolutionError::Undefined {
                key: key.to_owned(),
                token: token.to_owned(),
                candidates: candidates
                    .iter()
                    .map(|candidate| file_name(candidate).to_owned())
                    .collect(),
            })
    }

    /// Resolves every string inside `value`, recursing into sequences.
    pub fn resolve_value(
        &self,
        value: &serde_yaml::Value,
        candidates: &[Utf8PathBuf],
    ) -> Result<serde_yaml::Value, VariableResolutionError> {
        match value {
            serde_yaml::Value::String(token) => self.resolve(token, candidates),
            serde_yaml::Value::Sequence(values) => values
                .iter()
                .map(|value| self.resolve_value(value, candidates))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_yaml::Value::Sequence),
            other => Ok(other.clone()),
        }
    }
}

fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

fn scalar_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(key) => Some(key.clone()),
        serde_yaml::Value::Number(key) => Some(key.to_string()),
        serde_yaml::Value::Bool(key) => Some(key.to_string()),
        _ => None,
    }
}
