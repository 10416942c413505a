// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading the JUnit XML report produced by a test run.
//!
//! Only what's needed to reconcile results is read: every `testcase` element, its `classname` and
//! `name` attributes, and whether it contains a `failure`, `error` or `skipped` child.

use crate::{
    entity::{TestResult, TestState},
    errors::RunReportError,
    node_id::NodeId,
};
use camino::Utf8Path;
use indexmap::IndexMap;
use quick_xml::{Reader, events::Event};
use tracing::debug;

static TESTCASE_TAG: &[u8] = b"testcase";
static FAILURE_TAG: &[u8] = b"failure";
static ERROR_TAG: &[u8] = b"error";
static SKIPPED_TAG: &[u8] = b"skipped";

/// The results of one test run, keyed by node ID (`classname::name`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    results: IndexMap<NodeId, TestResult>,
}

impl RunReport {
    /// Reads and parses a report file.
    pub async fn from_path(path: &Utf8Path) -> Result<Self, RunReportError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| RunReportError::Read {
                    path: path.to_owned(),
                    error,
                })?;
        let report = Self::parse(&contents)?;
        debug!(path = %path, results = report.len(), "read run report");
        Ok(report)
    }

    /// Parses a report. The root may be either `testsuites` or a single `testsuite`.
    pub fn parse(xml: &str) -> Result<Self, RunReportError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut report = Self::default();
        let mut current: Option<CaseBuilder> = None;
        let mut in_outcome = false;

        loop {
            let position = reader.buffer_position();
            let event = reader.read_event().map_err(|error| RunReportError::Xml {
                position: reader.error_position(),
                error,
            })?;

            match event {
                Event::Start(start) => {
                    let name = start.name();
                    if name.as_ref() == TESTCASE_TAG {
                        current = Some(CaseBuilder::from_attributes(&start, position)?);
                    } else if let Some(case) = &mut current
                        && case.apply_outcome(name.as_ref(), &start, position)?
                    {
                        in_outcome = true;
                    }
                }
                Event::Empty(empty) => {
                    let name = empty.name();
                    if name.as_ref() == TESTCASE_TAG {
                        report.insert(CaseBuilder::from_attributes(&empty, position)?);
                    } else if let Some(case) = &mut current {
                        case.apply_outcome(name.as_ref(), &empty, position)?;
                    }
                }
                Event::Text(text) if in_outcome => {
                    let text = text.unescape().map_err(|error| RunReportError::Xml {
                        position,
                        error,
                    })?;
                    if let Some(case) = &mut current {
                        case.push_text(&text);
                    }
                }
                Event::CData(cdata) if in_outcome => {
                    if let Some(case) = &mut current {
                        case.push_text(&String::from_utf8_lossy(&cdata));
                    }
                }
                Event::End(end) => {
                    let name = end.name();
                    if name.as_ref() == TESTCASE_TAG {
                        if let Some(case) = current.take() {
                            report.insert(case);
                        }
                        in_outcome = false;
                    } else if is_outcome_tag(name.as_ref()) {
                        in_outcome = false;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(report)
    }

    /// Returns the result reported for `node_id`.
    pub fn get(&self, node_id: &str) -> Option<&TestResult> {
        self.results.get(node_id)
    }

    /// Returns the result of the test case `case_name` reported under `classname`.
    ///
    /// A case reported without a class name is found with `classname` set to `None`.
    pub fn get_case(&self, classname: Option<&str>, case_name: &str) -> Option<&TestResult> {
        match classname {
            Some(classname) => self.results.get(format!("{classname}::{case_name}").as_str()),
            None => self.results.get(case_name),
        }
    }

    /// The number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the report has no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates over the results in report order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &TestResult)> {
        self.results.iter()
    }

    fn insert(&mut self, case: CaseBuilder) {
        let (node_id, result) = case.finish();
        self.results.insert(node_id, result);
    }
}

fn is_outcome_tag(name: &[u8]) -> bool {
    name == FAILURE_TAG || name == ERROR_TAG || name == SKIPPED_TAG
}

#[derive(Debug)]
struct CaseBuilder {
    name: String,
    classname: Option<String>,
    state: TestState,
    message: Option<String>,
    text: String,
}

impl CaseBuilder {
    fn from_attributes(
        start: &quick_xml::events::BytesStart<'_>,
        position: u64,
    ) -> Result<Self, RunReportError> {
        let mut name = None;
        let mut classname = None;
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|error| RunReportError::Xml {
                position,
                error: error.into(),
            })?;
            let value = || {
                attribute
                    .unescape_value()
                    .map(|value| value.into_owned())
                    .map_err(|error| RunReportError::Xml { position, error })
            };
            match attribute.key.as_ref() {
                b"name" => name = Some(value()?),
                b"classname" => classname = Some(value()?),
                _ => {}
            }
        }

        let name = name.ok_or(RunReportError::MissingAttribute {
            position,
            attribute: "name",
        })?;
        Ok(Self {
            name,
            classname: classname.filter(|classname| !classname.is_empty()),
            state: TestState::Pass,
            message: None,
            text: String::new(),
        })
    }

    /// Records a `failure`, `error` or `skipped` child. Returns false for any other element.
    fn apply_outcome(
        &mut self,
        tag: &[u8],
        element: &quick_xml::events::BytesStart<'_>,
        position: u64,
    ) -> Result<bool, RunReportError> {
        let state = if tag == FAILURE_TAG || tag == ERROR_TAG {
            TestState::Fail
        } else if tag == SKIPPED_TAG {
            TestState::Skipped
        } else {
            return Ok(false);
        };
        self.state = self.state.max_severity(state);

        for attribute in element.attributes() {
            let attribute = attribute.map_err(|error| RunReportError::Xml {
                position,
                error: error.into(),
            })?;
            if attribute.key.as_ref() == b"message" && self.message.is_none() {
                let message = attribute
                    .unescape_value()
                    .map_err(|error| RunReportError::Xml { position, error })?;
                self.message = Some(message.into_owned());
            }
        }
        Ok(true)
    }

    fn push_text(&mut self, text: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(text);
    }

    fn finish(self) -> (NodeId, TestResult) {
        let node_id = match &self.classname {
            Some(classname) => NodeId::new(format!("{classname}::{}", self.name)),
            None => NodeId::new(self.name),
        };
        let failure = if self.state == TestState::Pass {
            None
        } else if self.text.is_empty() {
            self.message
        } else {
            Some(self.text)
        };
        let result = TestResult {
            name: node_id.as_str().to_owned(),
            failure,
            state: self.state,
        };
        (node_id, result)
    }
}
