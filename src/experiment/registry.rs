//! Experiment Registry - shared, file-backed index of experiments
//!
//! ## Layout
//!
//! ```text
//! <root>/registry.json       {version, next_seq, entries: {id -> entry}}
//! <root>/registry.json.lock  held by the one writer in a read-modify-write
//! ```
//!
//! ## Concurrency
//!
//! Writers (any number of threads or processes) serialize on the lock file,
//! created with `create_new`. The new index goes to a temp file that is
//! synced and renamed over `registry.json`, so readers never take the lock
//! and never observe a partial write. A lock older than `stale_after` is
//! assumed to belong to a dead writer and is removed; waiters breaking it
//! first take `registry.json.lock.break` and re-check the age under it.

use super::{RegistryEntry, RunStatus};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// File name of the index inside the registry root
pub const REGISTRY_FILE: &str = "registry.json";
const INDEX_VERSION: u32 = 1;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct RegistryIndex {
    version: u32,
    next_seq: u64,
    entries: BTreeMap<String, RegistryEntry>,
}

impl Default for RegistryIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_seq: 0,
            entries: BTreeMap::new(),
        }
    }
}

/// Query over registry entries.
///
/// Empty filter matches everything; results come back in registration order
/// unless `sort_by` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryFilter {
    tags: Vec<String>,
    category: Option<String>,
    name_prefix: Option<String>,
    status: Option<RunStatus>,
    sort_by: Option<String>,
    descending: bool,
    top_n: Option<usize>,
}

impl RegistryFilter {
    /// Match everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `tag` (all required tags must be present).
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Require this category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Require the name to start with `prefix` (case-insensitive).
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Require this status.
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sort by a numeric field or summary metric (see
    /// [`RegistryEntry::sort_value`]); entries without the value go last.
    #[must_use]
    pub fn sort_by(mut self, key: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(key.into());
        self.descending = descending;
        self
    }

    /// Keep the first `n` results.
    #[must_use]
    pub const fn top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    /// Whether `entry` passes every criterion.
    #[must_use]
    pub fn matches(&self, entry: &RegistryEntry) -> bool {
        self.tags.iter().all(|t| entry.tags().contains(t))
            && self.category.as_deref().map_or(true, |c| entry.category() == c)
            && self.name_prefix.as_deref().map_or(true, |p| {
                entry.name().to_lowercase().starts_with(&p.to_lowercase())
            })
            && self.status.map_or(true, |s| entry.status() == s)
    }

    fn apply(&self, mut entries: Vec<RegistryEntry>) -> Vec<RegistryEntry> {
        entries.retain(|e| self.matches(e));
        entries.sort_by_key(RegistryEntry::seq);
        if let Some(key) = &self.sort_by {
            entries.sort_by(|a, b| match (a.sort_value(key), b.sort_value(key)) {
                (Some(x), Some(y)) if self.descending => y.total_cmp(&x),
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }
        if let Some(n) = self.top_n {
            entries.truncate(n);
        }
        entries
    }
}

/// Handle on a registry directory.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    lock_timeout: Duration,
    stale_after: Duration,
}

impl Registry {
    /// Open (creating the directory if needed) the registry under `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        })
    }

    /// Override how long a writer waits for the lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Override the age after which a lock is considered abandoned.
    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Registry root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the index file
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// Add a new entry, assigning its registration sequence number.
    ///
    /// # Errors
    /// Returns `Error::Registry` if the id is already registered
    pub fn register(&self, mut entry: RegistryEntry) -> Result<()> {
        let id = entry.experiment_id().to_string();
        self.modify(|index| {
            if index.entries.contains_key(&id) {
                return Err(Error::Registry(format!("experiment '{id}' is already registered")));
            }
            entry.set_seq(index.next_seq);
            index.next_seq += 1;
            index.entries.insert(id.clone(), entry);
            Ok(())
        })?;
        info!(experiment_id = %id, "experiment registered");
        Ok(())
    }

    /// Record a status with summary metrics and duration.
    ///
    /// # Errors
    /// Returns `Error::Registry` if the id is not registered
    pub fn update_status(
        &self,
        experiment_id: &str,
        status: RunStatus,
        summary_metrics: BTreeMap<String, f64>,
        duration_seconds: Option<f64>,
    ) -> Result<RegistryEntry> {
        self.finish(experiment_id, status, summary_metrics, duration_seconds, None)
    }

    /// Mark an experiment failed with `reason`.
    ///
    /// # Errors
    /// Returns `Error::Registry` if the id is not registered
    pub fn mark_failed(
        &self,
        experiment_id: &str,
        reason: impl Into<String>,
        duration_seconds: Option<f64>,
    ) -> Result<RegistryEntry> {
        self.finish(
            experiment_id,
            RunStatus::Failed,
            BTreeMap::new(),
            duration_seconds,
            Some(reason.into()),
        )
    }

    fn finish(
        &self,
        experiment_id: &str,
        status: RunStatus,
        summary_metrics: BTreeMap<String, f64>,
        duration_seconds: Option<f64>,
        error: Option<String>,
    ) -> Result<RegistryEntry> {
        let updated = self.modify(|index| {
            let entry = index.entries.get_mut(experiment_id).ok_or_else(|| {
                Error::Registry(format!("experiment '{experiment_id}' is not registered"))
            })?;
            entry.finish(status, summary_metrics, duration_seconds, error);
            Ok(entry.clone())
        })?;
        info!(experiment_id, status = %status, "experiment status updated");
        Ok(updated)
    }

    /// Entries matching `filter`.
    ///
    /// # Errors
    /// Returns error if the index cannot be read
    pub fn query(&self, filter: &RegistryFilter) -> Result<Vec<RegistryEntry>> {
        Ok(filter.apply(self.snapshot()?.entries.into_values().collect()))
    }

    /// Every entry in registration order.
    ///
    /// # Errors
    /// Returns error if the index cannot be read
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        self.query(&RegistryFilter::new())
    }

    /// One entry by id.
    ///
    /// # Errors
    /// Returns error if the index cannot be read
    pub fn get(&self, experiment_id: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.snapshot()?.entries.remove(experiment_id))
    }

    /// Completed entry with the best value of `metric`.
    ///
    /// # Errors
    /// Returns error if the index cannot be read
    pub fn best_by(&self, metric: &str, higher_is_better: bool) -> Result<Option<RegistryEntry>> {
        let filter = RegistryFilter::new()
            .status(RunStatus::Completed)
            .sort_by(metric, higher_is_better)
            .top_n(1);
        Ok(self
            .query(&filter)?
            .into_iter()
            .find(|e| e.sort_value(metric).is_some()))
    }

    /// Remove an entry, optionally deleting its workspace.
    ///
    /// Returns whether the id was registered.
    ///
    /// # Errors
    /// Returns error if the index or workspace cannot be modified
    pub fn remove(&self, experiment_id: &str, delete_workspace: bool) -> Result<bool> {
        let removed = self.modify(|index| Ok(index.entries.remove(experiment_id)))?;
        let Some(entry) = removed else {
            return Ok(false);
        };
        if delete_workspace {
            remove_workspace(entry.workspace_path())?;
        }
        info!(experiment_id, delete_workspace, "experiment removed");
        Ok(true)
    }

    /// Remove every failed entry, optionally deleting workspaces.
    ///
    /// # Errors
    /// Returns error if the index or a workspace cannot be modified
    pub fn cleanup_failed(&self, delete_workspaces: bool) -> Result<Vec<String>> {
        let removed: Vec<RegistryEntry> = self.modify(|index| {
            let failed: Vec<String> = index
                .entries
                .values()
                .filter(|e| e.status() == RunStatus::Failed)
                .map(|e| e.experiment_id().to_string())
                .collect();
            Ok(failed
                .iter()
                .filter_map(|id| index.entries.remove(id))
                .collect())
        })?;
        if delete_workspaces {
            for entry in &removed {
                remove_workspace(entry.workspace_path())?;
            }
        }
        let ids: Vec<String> = removed
            .iter()
            .map(|e| e.experiment_id().to_string())
            .collect();
        info!(removed = ids.len(), "failed experiments cleaned up");
        Ok(ids)
    }

    fn snapshot(&self) -> Result<RegistryIndex> {
        let text = match fs::read_to_string(self.index_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RegistryIndex::default()),
            Err(e) => return Err(e.into()),
        };
        let index: RegistryIndex = serde_json::from_str(&text).map_err(|e| {
            Error::Registry(format!("corrupt index {}: {e}", self.index_path().display()))
        })?;
        if index.version != INDEX_VERSION {
            return Err(Error::Registry(format!(
                "unsupported index version {} (expected {INDEX_VERSION})",
                index.version
            )));
        }
        Ok(index)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut RegistryIndex) -> Result<T>) -> Result<T> {
        let _lock = IndexLock::acquire(
            &self.root.join(format!("{REGISTRY_FILE}.lock")),
            self.lock_timeout,
            self.stale_after,
        )?;
        let mut index = self.snapshot()?;
        let out = f(&mut index)?;
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(&index)?)?;
        Ok(out)
    }
}

/// Exclusive lock file, removed on drop
struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let started = Instant::now();
        let mut backoff = Duration::from_millis(1);
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // owner pid is informational only
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_age(path).is_some_and(|age| age > stale_after)
                        && break_stale(path, stale_after)?
                    {
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(Error::Registry(format!(
                            "timed out after {timeout:?} waiting for {}",
                            path.display()
                        )));
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "lock already gone");
        }
    }
}

/// Remove `lock` if it is still stale once `<lock>.break` is held.
///
/// Breakers serialize on the guard and re-check the age under it, so a
/// waiter that saw the old lock cannot remove one another waiter has since
/// acquired. Returns `false` if the guard is busy or the lock is now fresh.
fn break_stale(lock: &Path, stale_after: Duration) -> Result<bool> {
    let mut guard = lock.as_os_str().to_owned();
    guard.push(".break");
    let guard = PathBuf::from(guard);

    match OpenOptions::new().write(true).create_new(true).open(&guard) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // left behind by a breaker that died mid-break
            if lock_age(&guard).is_some_and(|age| age > stale_after) {
                let _ = fs::remove_file(&guard);
            }
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    let stale = lock_age(lock).is_some_and(|age| age > stale_after);
    if stale {
        warn!(lock = %lock.display(), "breaking stale registry lock");
        if let Err(e) = fs::remove_file(lock) {
            debug!(lock = %lock.display(), error = %e, "stale lock already gone");
        }
    }
    if let Err(e) = fs::remove_file(&guard) {
        debug!(guard = %guard.display(), error = %e, "break guard already gone");
    }
    Ok(stale)
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(REGISTRY_FILE);
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_workspace(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
