// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering the test index.

use crate::output::Styles;
use owo_colors::OwoColorize;
use serde_json::json;
use std::io::{self, Write};
use tavern_index::{
    entity::{TestEntity, TestKind},
    index::TestIndex,
};

const STATE_WIDTH: usize = 14;

/// Writes the index as an indented tree, one entity per line.
pub(crate) fn write_human(
    index: &TestIndex,
    styles: &Styles,
    mut writer: impl Write,
) -> io::Result<()> {
    for file in index.filter(TestKind::File) {
        write_entity(index, file, 0, styles, &mut writer)?;
    }
    writer.flush()
}

fn write_entity(
    index: &TestIndex,
    entity: &TestEntity,
    depth: usize,
    styles: &Styles,
    writer: &mut impl Write,
) -> io::Result<()> {
    let state = entity.result().state;
    let label = format!("{:>STATE_WIDTH$}", state.as_str());
    write!(
        writer,
        "{} {:indent$}",
        label.style(styles.state(state)),
        "",
        indent = depth * 2
    )?;

    match entity.kind() {
        TestKind::File => {
            write!(
                writer,
                "{}",
                entity.relative_file_location().style(styles.file)
            )?;
        }
        TestKind::Test => {
            write!(
                writer,
                "{} {}",
                entity.name().style(styles.test),
                format!("(line {})", entity.file_line()).style(styles.line)
            )?;
        }
        TestKind::ParameterVariant => {
            write!(writer, "[{}]", entity.name())?;
        }
    }
    if let Some(failure) = &entity.result().failure
        && !entity.has_children()
    {
        let first_line = failure.lines().next().unwrap_or_default();
        write!(writer, ": {first_line}")?;
    }
    writeln!(writer)?;

    for child in index.children(entity) {
        write_entity(index, child, depth + 1, styles, writer)?;
    }
    Ok(())
}

/// Returns every entity in the index as a JSON array, in index order.
pub(crate) fn to_json(index: &TestIndex) -> serde_json::Value {
    index
        .iter()
        .map(|entity| {
            json!({
                "node-id": entity.node_id().as_str(),
                "kind": entity.kind().as_str(),
                "name": entity.name(),
                "file": entity.relative_file_location().as_str(),
                "line": entity.file_line(),
                "parent": entity.parent().map(|parent| parent.as_str()),
                "state": entity.result().state.as_str(),
                "failure": entity.result().failure,
            })
        })
        .collect()
}
