// Copyright (c) The tavern-crawler Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted result cache.
//!
//! The cache is a JSON object mapping node IDs to the last known [`TestResult`] of each entity. It
//! survives restarts, so results of a previous run are shown until tests are run again.

use crate::{
    entity::{TestEntity, TestResult, TestState},
    errors::CacheError,
    node_id::NodeId,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, warn};

/// The outcome of [`ResultCache::load`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheLoad {
    /// The cache was loaded before; nothing was read.
    AlreadyLoaded,

    /// The cache file was read, with this many entries.
    Loaded(usize),

    /// The cache file does not exist. The cache is empty.
    Missing,

    /// The cache file could not be read or parsed and was ignored. The cache is empty.
    Discarded,
}

/// The outcome of [`ResultCache::save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The cache was written to disk.
    Saved,

    /// Another save was in flight, so nothing was written.
    Coalesced,
}

/// Persisted results, keyed by node ID.
#[derive(Debug)]
pub struct ResultCache {
    path: Utf8PathBuf,
    entries: IndexMap<NodeId, TestResult>,
    loaded: bool,
    saving: AtomicBool,
}

impl ResultCache {
    /// Creates an empty, unloaded cache backed by `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: IndexMap::new(),
            loaded: false,
            saving: AtomicBool::new(false),
        }
    }

    /// The cache file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns true once the cache has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loads the cache file into memory. Only the first call reads the file.
    ///
    /// Failing to read the file is not an error: the cache starts out empty instead.
    pub async fn load(&mut self) -> CacheLoad {
        if self.loaded {
            return CacheLoad::AlreadyLoaded;
        }
        self.loaded = true;

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path, "no result cache found, starting empty");
                return CacheLoad::Missing;
            }
            Err(error) => {
                warn!("ignoring result cache `{}`: {error}", self.path);
                return CacheLoad::Discarded;
            }
        };

        match parse_entries(&contents) {
            Ok(entries) => {
                self.entries = entries;
                debug!(path = %self.path, entries = self.entries.len(), "loaded result cache");
                CacheLoad::Loaded(self.entries.len())
            }
            Err(error) => {
                warn!("ignoring corrupt result cache `{}`: {error}", self.path);
                CacheLoad::Discarded
            }
        }
    }

    /// Replaces the contents of the cache with those of `path`, which becomes the cache file.
    ///
    /// Unlike [`load`](Self::load), errors are returned, and on error the cache is unchanged.
    pub async fn reload(&mut self, path: &Utf8Path) -> Result<usize, CacheError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| CacheError::Read {
                    path: path.to_owned(),
                    error,
                })?;
        let entries = parse_entries(&contents).map_err(|error| CacheError::Parse {
            path: path.to_owned(),
            error,
        })?;

        self.path = path.to_owned();
        self.entries = entries;
        self.loaded = true;
        Ok(self.entries.len())
    }

    /// Returns the stored result of `node_id`, with its state mapped to the cached variant.
    pub fn get_result(&self, node_id: &str) -> Option<TestResult> {
        self.entries.get(node_id).map(TestResult::to_cached)
    }

    /// Stores the current result of `entity`, unless it is running.
    pub fn set_result(&mut self, entity: &TestEntity) {
        if entity.result().state == TestState::Running {
            return;
        }
        self.entries
            .insert(entity.node_id().clone(), entity.result().clone());
    }

    /// Stores the current results of all `entities`.
    pub fn set_results<'a>(&mut self, entities: impl IntoIterator<Item = &'a TestEntity>) {
        for entity in entities {
            self.set_result(entity);
        }
    }

    /// Removes the entry for `node_id`, returning it.
    pub fn remove(&mut self, node_id: &str) -> Option<TestResult> {
        self.entries.shift_remove(node_id)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the stored results, uncompressed.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &TestResult)> {
        self.entries.iter()
    }

    /// Writes the cache to disk.
    ///
    /// If another save is in flight this returns [`SaveOutcome::Coalesced`] immediately. The
    /// skipped state is not queued: callers that need it on disk must save again.
    pub async fn save(&self) -> Result<SaveOutcome, CacheError> {
        let Some(_guard) = self.try_begin_save() else {
            debug!(path = %self.path, "result cache save already in flight");
            return Ok(SaveOutcome::Coalesced);
        };

        let json = serde_json::to_string_pretty(&self.entries).map_err(|error| {
            CacheError::Serialize {
                path: self.path.clone(),
                error,
            }
        })?;

        if let Some(dir) = self.path.parent()
            && !dir.as_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|error| CacheError::CreateDir {
                    dir: dir.to_owned(),
                    error,
                })?;
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            atomicwrites::AtomicFile::new(&path, atomicwrites::AllowOverwrite)
                .write(|file| file.write_all(json.as_bytes()))
                .map_err(|error| CacheError::Write { path, error })
        })
        .await
        .map_err(|error| CacheError::WriteTask {
            path: self.path.clone(),
            error,
        })??;

        debug!(path = %self.path, entries = self.entries.len(), "saved result cache");
        Ok(SaveOutcome::Saved)
    }

    fn try_begin_save(&self) -> Option<SavingGuard<'_>> {
        self.saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SavingGuard {
                saving: &self.saving,
            })
    }
}

/// Clears the in-flight flag when a save finishes, however it finishes.
struct SavingGuard<'a> {
    saving: &'a AtomicBool,
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.saving.store(false, Ordering::Release);
    }
}

fn parse_entries(contents: &str) -> Result<IndexMap<NodeId, TestResult>, serde_json::Error> {
    let mut entries: IndexMap<NodeId, TestResult> = serde_json::from_str(contents)?;
    entries.retain(|_, result| result.state != TestState::Running);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TestKind;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn entity(node_id: &str, state: TestState) -> TestEntity {
        let mut entity = TestEntity::new(
            TestKind::Test,
            "T",
            NodeId::from(node_id),
            Utf8Path::new("/ws/T.tavern.yaml"),
        );
        *entity.result_mut() = TestResult {
            name: node_id.to_owned(),
            failure: (state == TestState::Fail).then(|| "assertion failed".to_owned()),
            state,
        };
        entity
    }

    fn temp_cache() -> (Utf8TempDir, ResultCache) {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("nested").join(".cache"));
        (dir, cache)
    }

    #[tokio::test]
    async fn round_trip_compresses_states() {
        let (_dir, mut cache) = temp_cache();
        cache.set_results([
            &entity("T::pass", TestState::Pass),
            &entity("T::skip", TestState::Skipped),
            &entity("T::fail", TestState::Fail),
            &entity("T::unset", TestState::Unset),
        ]);
        assert_eq!(cache.save().await.unwrap(), SaveOutcome::Saved);

        let mut reloaded = ResultCache::new(cache.path());
        assert_eq!(reloaded.load().await, CacheLoad::Loaded(4));
        assert_eq!(
            reloaded.get_result("T::pass").unwrap().state,
            TestState::PassCached
        );
        assert_eq!(
            reloaded.get_result("T::skip").unwrap().state,
            TestState::SkippedCached
        );
        let fail = reloaded.get_result("T::fail").unwrap();
        assert_eq!(fail.state, TestState::FailCached);
        assert_eq!(fail.failure.as_deref(), Some("assertion failed"));
        assert_eq!(reloaded.get_result("T::unset").unwrap().state, TestState::Unset);
        assert_eq!(reloaded.get_result("T::nope"), None);
    }

    #[test]
    fn get_result_does_not_mutate_entries() {
        let mut cache = ResultCache::new("/nonexistent/.cache");
        cache.set_result(&entity("T::pass", TestState::Pass));
        assert_eq!(cache.get_result("T::pass").unwrap().state, TestState::PassCached);
        let (_, stored) = cache.iter().next().unwrap();
        assert_eq!(stored.state, TestState::Pass);
    }

    #[test]
    fn running_results_are_not_stored() {
        let mut cache = ResultCache::new("/nonexistent/.cache");
        cache.set_result(&entity("T::running", TestState::Running));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn load_happens_once() {
        let (_dir, mut cache) = temp_cache();
        assert_eq!(cache.load().await, CacheLoad::Missing);
        assert!(cache.is_loaded());
        assert_eq!(cache.load().await, CacheLoad::AlreadyLoaded);
    }

    #[tokio::test]
    async fn corrupt_cache_is_discarded() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join(".cache");
        std::fs::write(&path, "{ not json").unwrap();

        let mut cache = ResultCache::new(&path);
        assert_eq!(cache.load().await, CacheLoad::Discarded);
        assert!(cache.is_empty());

        let error = cache.reload(&path).await.unwrap_err();
        assert!(matches!(error, CacheError::Parse { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn reload_switches_path() {
        let dir = camino_tempfile::tempdir().unwrap();
        let other = dir.path().join("other.json");
        std::fs::write(
            &other,
            r#"{"T::a": {"name": "T::a", "failure": null, "state": "fail"}, "T::b": {"state": "running"}}"#,
        )
        .unwrap();

        let mut cache = ResultCache::new(dir.path().join(".cache"));
        assert_eq!(cache.reload(&other).await.unwrap(), 1);
        assert_eq!(cache.path().as_str(), other.as_str());
        assert_eq!(cache.get_result("T::a").unwrap().state, TestState::FailCached);

        let missing = dir.path().join("missing.json");
        let error = cache.reload(&missing).await.unwrap_err();
        assert!(matches!(error, CacheError::Read { .. }), "{error:?}");
        assert_eq!(cache.path().as_str(), other.as_str());
    }

    #[tokio::test]
    async fn overlapping_save_is_coalesced() {
        let (_dir, mut cache) = temp_cache();
        cache.set_result(&entity("T::pass", TestState::Pass));

        {
            let _in_flight = cache.try_begin_save().unwrap();
            assert_eq!(cache.save().await.unwrap(), SaveOutcome::Coalesced);
        }
        assert!(!cache.path().exists());

        assert_eq!(cache.save().await.unwrap(), SaveOutcome::Saved);
        assert!(cache.path().exists());
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = ResultCache::new("/nonexistent/.cache");
        cache.set_results([
            &entity("T::a", TestState::Pass),
            &entity("T::b", TestState::Fail),
        ]);
        assert_eq!(cache.remove("T::a").unwrap().state, TestState::Pass);
        assert_eq!(cache.remove("T::a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
