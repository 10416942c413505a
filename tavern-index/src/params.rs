// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expansion of `parametrize` marks into parameter variants.
//!
//! Tavern names parametrized tests the way pytest does: the values of one combination, joined by
//! `-`. With several `parametrize` marks the combinations multiply. For every value of the new
//! mark, every existing combination is extended, so marks `[a, b]` then `[c, d]` produce
//! `a-c, b-c, a-d, b-d`.

use crate::{
    entity::{TestEntity, TestKind},
    errors::VariableResolutionError,
    node_id::NodeId,
    variables::VariableResolver,
};
use camino::Utf8PathBuf;

/// One `parametrize` mark of a test.
#[derive(Clone, Debug, PartialEq)]
pub struct ParametrizeClause {
    /// The parameter key(s), as declared. Not used for naming.
    pub key: Option<serde_yaml::Value>,

    /// The values. Each is either a scalar or, for co-varying keys, a sequence of scalars.
    pub vals: Vec<serde_yaml::Value>,
}

impl ParametrizeClause {
    /// Creates a clause from its values.
    pub fn new(vals: Vec<serde_yaml::Value>) -> Self {
        Self { key: None, vals }
    }

    /// Reads a clause from a mark, if the mark is shaped `{ parametrize: { vals: [...] } }`.
    pub fn from_mark(mark: &serde_yaml::Value) -> Option<Self> {
        let parametrize = mark.get("parametrize")?;
        let vals = parametrize.get("vals")?.as_sequence()?.clone();
        Some(Self {
            key: parametrize.get("key").cloned(),
            vals,
        })
    }
}

/// Expands parametrize clauses into parameter variants of a test.
#[derive(Clone, Copy, Debug)]
pub struct ParameterExpander<'a> {
    resolver: &'a VariableResolver,
    includes: &'a [Utf8PathBuf],
}

impl<'a> ParameterExpander<'a> {
    /// Creates an expander that resolves variables from `includes`.
    pub fn new(resolver: &'a VariableResolver, includes: &'a [Utf8PathBuf]) -> Self {
        Self { resolver, includes }
    }

    /// Returns the variants of `parent`, in order.
    ///
    /// All values are resolved before any variant is produced, so a resolution failure yields no
    /// variants at all.
    pub fn expand(
        &self,
        parent: &TestEntity,
        clauses: &[ParametrizeClause],
    ) -> Result<Vec<TestEntity>, VariableResolutionError> {
        let mut names: Vec<String> = Vec::new();

        for (index, clause) in clauses.iter().enumerate() {
            let values = clause
                .vals
                .iter()
                .map(|value| self.resolver.resolve_value(value, self.includes))
                .collect::<Result<Vec<_>, _>>()?;

            if index == 0 || names.is_empty() {
                names = values.iter().map(value_name).collect();
            } else {
                names = values
                    .iter()
                    .flat_map(|value| {
                        let suffix = value_name(value);
                        names.iter().map(move |name| format!("{name}-{suffix}"))
                    })
                    .collect();
            }
        }

        Ok(names
            .into_iter()
            .map(|name| {
                let node_id = NodeId::for_variant(parent.node_id(), &name);
                TestEntity::new(
                    TestKind::ParameterVariant,
                    name,
                    node_id,
                    parent.file_location(),
                )
                .with_relative_file_location(parent.relative_file_location())
                .with_file_line(parent.file_line())
            })
            .collect())
    }
}

/// The display form of a parameter value.
pub fn value_name(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => "null".to_owned(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Sequence(values) => {
            values.iter().map(value_name).collect::<Vec<_>>().join("-")
        }
        serde_yaml::Value::Mapping(_) => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
        serde_yaml::Value::Tagged(tagged) => value_name(&tagged.value),
    }
}
