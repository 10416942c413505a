// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test manager: the workflows tying discovery, the index, the cache and the runner together.
//!
//! A [`TestManager`] owns all mutable engine state. Every workflow takes `&mut self`, so index and
//! cache updates are never interleaved even though reading files and waiting on the runner are
//! asynchronous.

use crate::{
    cache::{CacheLoad, ResultCache, SaveOutcome},
    config::EngineContext,
    discovery::TestFileParser,
    entity::TestKind,
    errors::{DocumentError, IndexError, ManagerError, RunnerError},
    index::TestIndex,
    node_id::{NodeId, NodeIdGenerator, common_root},
    reconcile::{ReconcileSummary, reconcile},
    run_report::RunReport,
    runner::{RunTarget, RunnerInvocation},
    variables::VariableResolver,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::process::ExitStatus;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

/// The report file used when more than one target is run.
pub const BATCH_REPORT_NAME: &str = "batch.xml";

/// What [`TestManager::load_test_files`] did.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// The files that were (re-)indexed.
    pub files: Vec<Utf8PathBuf>,

    /// True if the common root changed, so every known file was re-indexed.
    pub reindexed: bool,

    /// Problems with individual documents, which were skipped or indexed without variants.
    pub errors: Vec<DocumentError>,
}

/// What [`TestManager::run_tests`] did.
#[derive(Debug)]
pub struct RunSummary {
    /// The runner's exit status.
    pub status: ExitStatus,

    /// The report the results were read from.
    pub report_path: Utf8PathBuf,

    /// Where the applied results came from.
    pub reconciled: ReconcileSummary,

    /// Whether the cache was written.
    pub saved: SaveOutcome,
}

/// Owns the index, the result cache and the variables loaded for one workspace.
#[derive(Debug)]
pub struct TestManager {
    context: EngineContext,
    ids: NodeIdGenerator,
    resolver: VariableResolver,
    index: TestIndex,
    cache: ResultCache,
}

impl TestManager {
    /// Creates a manager with an empty index. The cache is not read until it's needed.
    pub fn new(context: EngineContext) -> Self {
        let cache = ResultCache::new(context.cache_file());
        Self {
            context,
            ids: NodeIdGenerator::default(),
            resolver: VariableResolver::new(),
            index: TestIndex::new(),
            cache,
        }
    }

    /// The engine context.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// The test index.
    pub fn index(&self) -> &TestIndex {
        &self.index
    }

    /// The result cache.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// The common root node IDs are currently relative to.
    pub fn common_root(&self) -> Option<&Utf8Path> {
        self.ids.common_root()
    }

    /// Parses `files` and indexes their tests, replacing anything previously indexed for them.
    ///
    /// Node IDs depend on the common root of every indexed file. If adding `files` moves it, every
    /// known file is re-indexed so that all IDs stay consistent.
    ///
    /// All files are read before the index is touched: if any of them can't be read, the index is
    /// unchanged.
    pub async fn load_test_files(
        &mut self,
        files: &[Utf8PathBuf],
    ) -> Result<LoadSummary, ManagerError> {
        let mut all_files: IndexSet<Utf8PathBuf> =
            self.index.files().map(Utf8Path::to_owned).collect();
        all_files.extend(files.iter().cloned());

        let root = common_root(all_files.iter().map(Utf8PathBuf::as_path));
        let mut ids = self.ids.clone();
        let reindexed = ids.set_common_root(root) && !self.index.is_empty();
        let to_parse: Vec<Utf8PathBuf> = if reindexed {
            info!(
                "common root changed to {}, re-indexing {} files",
                ids.common_root().map_or("<none>", Utf8Path::as_str),
                all_files.len()
            );
            all_files.into_iter().collect()
        } else {
            files.iter().cloned().collect::<IndexSet<_>>().into_iter().collect()
        };

        let mut parsed_files = Vec::with_capacity(to_parse.len());
        {
            let mut parser =
                TestFileParser::new(self.context.workspace_root(), &ids, &mut self.resolver);
            for path in &to_parse {
                parsed_files.push(parser.parse_file(path).await?);
            }
        }

        self.ids = ids;
        if reindexed {
            self.index.clear();
        }

        let mut summary = LoadSummary {
            files: to_parse,
            reindexed,
            errors: Vec::new(),
        };
        for mut parsed in parsed_files {
            summary.errors.append(&mut parsed.errors);
            self.index.delete_file(&parsed.path);
            self.index
                .add(parsed.into_tree(self.context.workspace_root()))?;
        }

        debug!(
            files = summary.files.len(),
            entities = self.index.len(),
            errors = summary.errors.len(),
            "loaded test files"
        );
        Ok(summary)
    }

    /// Removes `files` (or every indexed file, if `None`) from the index. Returns the node IDs that
    /// were removed.
    ///
    /// With `clear_cache`, the removed node IDs are also dropped from the cache, which is loaded
    /// first if needed. Call [`save_cache`](Self::save_cache) to persist that.
    ///
    /// The common root is recomputed over the remaining files. If it moved, they're re-indexed, as
    /// with [`load_test_files`](Self::load_test_files).
    pub async fn delete_test_files(
        &mut self,
        files: Option<&[Utf8PathBuf]>,
        clear_cache: bool,
    ) -> Result<Vec<NodeId>, ManagerError> {
        let files: Vec<Utf8PathBuf> = match files {
            Some(files) => files.to_vec(),
            None => self.index.files().map(Utf8Path::to_owned).collect(),
        };

        let mut removed = Vec::new();
        for file in &files {
            removed.extend(self.index.delete_file(file));
        }
        if clear_cache {
            self.load_cache().await;
            for node_id in &removed {
                self.cache.remove(node_id.as_str());
            }
        }

        debug!(
            files = files.len(),
            removed = removed.len(),
            clear_cache,
            "deleted test files"
        );

        self.load_test_files(&[]).await?;
        Ok(removed)
    }

    /// Applies cached results to the index.
    ///
    /// If `files` is given, those files are (re-)indexed first.
    pub async fn load_test_results(
        &mut self,
        files: Option<&[Utf8PathBuf]>,
    ) -> Result<ReconcileSummary, ManagerError> {
        if let Some(files) = files {
            self.load_test_files(files).await?;
        }
        self.load_cache().await;
        Ok(reconcile(&mut self.index, &mut self.cache, None))
    }

    /// Applies the results of a run report, then saves the cache.
    ///
    /// Results in the report take priority over cached ones.
    pub async fn apply_run_report(
        &mut self,
        report: &RunReport,
    ) -> Result<ReconcileSummary, ManagerError> {
        self.load_cache().await;
        let summary = reconcile(&mut self.index, &mut self.cache, Some(report));
        self.cache.save().await?;
        Ok(summary)
    }

    /// Runs the given tests, or every indexed file if `node_ids` is empty, and applies the results.
    ///
    /// The index is unchanged if the runner fails or its report can't be read.
    pub async fn run_tests(&mut self, node_ids: &[&str]) -> Result<RunSummary, ManagerError> {
        let root = self
            .ids
            .common_root()
            .ok_or(RunnerError::NoCommonRoot)?
            .to_owned();
        let targets = self.targets_for(node_ids)?;
        let report_path = self.context.reports_dir().join(report_file_name(node_ids));

        let invocation = RunnerInvocation::new(
            self.context.runner(),
            &targets,
            &root,
            report_path,
            self.context.pythonpath(),
        )?;
        let outcome = invocation.execute().await?;
        let report = RunReport::from_path(&outcome.report_path).await?;

        self.load_cache().await;
        let reconciled = reconcile(&mut self.index, &mut self.cache, Some(&report));
        let saved = self.cache.save().await?;
        info!(
            status = %outcome.status,
            results = report.len(),
            "applied run results"
        );

        Ok(RunSummary {
            status: outcome.status,
            report_path: outcome.report_path,
            reconciled,
            saved,
        })
    }

    /// Writes the result cache to disk.
    pub async fn save_cache(&mut self) -> Result<SaveOutcome, ManagerError> {
        self.load_cache().await;
        Ok(self.cache.save().await?)
    }

    async fn load_cache(&mut self) {
        if let CacheLoad::Loaded(entries) = self.cache.load().await {
            debug!(entries, "loaded cached results");
        }
    }

    fn targets_for(&self, node_ids: &[&str]) -> Result<Vec<RunTarget>, ManagerError> {
        if node_ids.is_empty() {
            return Ok(self
                .index
                .filter(TestKind::File)
                .into_iter()
                .filter_map(|entity| RunTarget::for_entity(&self.index, entity))
                .collect());
        }

        node_ids
            .iter()
            .map(|node_id| {
                self.index
                    .get(node_id)
                    .and_then(|entity| RunTarget::for_entity(&self.index, entity))
                    .ok_or_else(|| {
                        ManagerError::Index(IndexError::UnknownNode {
                            node_id: NodeId::from(*node_id),
                        })
                    })
            })
            .collect()
    }
}

fn report_file_name(node_ids: &[&str]) -> String {
    match node_ids {
        [node_id] => format!("{:016x}.xml", xxh3_64(node_id.as_bytes())),
        _ => BATCH_REPORT_NAME.to_owned(),
    }
}
