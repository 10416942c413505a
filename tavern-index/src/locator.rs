// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating the line at which a test is declared.
//!
//! The YAML loader folds multi-line scalars, so a parsed `test_name` can differ from the raw
//! source by embedded newlines and indentation. Names are therefore compared with whitespace
//! skipped on both sides.

const TEST_NAME_KEY: &[u8] = b"test_name";

/// Finds declaration lines of tests within one file's raw contents.
///
/// Tests are declared in file order, so each search resumes after the previous match.
#[derive(Clone, Debug)]
pub struct SourceLineLocator<'a> {
    source: &'a [u8],
    line_starts: Vec<usize>,
    next_line: usize,
}

impl<'a> SourceLineLocator<'a> {
    /// Creates a locator over the raw contents of a file.
    pub fn new(source: &'a [u8]) -> Self {
        let line_starts = std::iter::once(0)
            .chain(
                source
                    .iter()
                    .enumerate()
                    .filter(|&(_, &b)| b == b'\n')
                    .map(|(i, _)| i + 1),
            )
            .filter(|&start| start < source.len())
            .collect();

        Self {
            source,
            line_starts,
            next_line: 0,
        }
    }

    /// Returns the 1-based line declaring the test `name`, searching from after the last match.
    pub fn locate(&mut self, name: &str) -> Option<usize> {
        for index in self.next_line..self.line_starts.len() {
            let line = &self.source[self.line_starts[index]..];
            if declares_test(line, name.as_bytes()) {
                self.next_line = index + 1;
                return Some(index + 1);
            }
        }

        None
    }
}

fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn declares_test(line: &[u8], name: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(TEST_NAME_KEY) else {
        return false;
    };
    let rest = skip_inline_blanks(rest);
    let Some(rest) = rest.strip_prefix(b":") else {
        return false;
    };
    let mut rest = skip_inline_blanks(rest);
    if let Some((&quote, quoted)) = rest.split_first()
        && (quote == b'"' || quote == b'\'')
    {
        rest = quoted;
    }

    let (mut i, mut j) = (0, 0);
    while i < name.len() {
        if is_blank(name[i]) {
            i += 1;
            continue;
        }
        match rest.get(j) {
            Some(&b) if is_blank(b) => j += 1,
            Some(&b) if b == name[i] => {
                i += 1;
                j += 1;
            }
            _ => return false,
        }
    }

    // The name must end here, not be a prefix of a longer one.
    matches!(
        skip_inline_blanks(&rest[j.min(rest.len())..]).first(),
        None | Some(b'\n' | b'\r' | b'"' | b'\'' | b'#')
    )
}

fn skip_inline_blanks(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
