//! Experiment ids and workspaces
//!
//! ```text
//! <root>/<category>/<slug(name)>_<YYYYMMDD_HHMMSS>_<hash6>/
//!     config.json
//!     meta.json
//! ```
//!
//! `hash6` mixes the config hash with the launch time in nanoseconds, the
//! process id and a process-local counter. The workspace directory is created
//! with `create_dir`, so even a colliding id can never share a workspace: on
//! collision `_1`, `_2`, ... is appended.

use super::ArtifactStore;
use crate::config::RunConfig;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Attempts before workspace creation gives up
pub const MAX_WORKSPACE_ATTEMPTS: usize = 8;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A created experiment: id plus its exclusive workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    experiment_id: String,
    workspace: PathBuf,
    created_at: DateTime<Utc>,
}

impl RunIdentity {
    /// Allocate an id, create the workspace and snapshot the config into it.
    ///
    /// # Errors
    /// Returns `Error::Workspace` if no free workspace directory could be
    /// created within [`MAX_WORKSPACE_ATTEMPTS`]
    pub fn create(config: &RunConfig, root: &Path) -> Result<Self> {
        let created_at = Utc::now();
        let base_id = generate_id(config, created_at);
        Self::allocate(config, root, &base_id, created_at)
    }

    fn allocate(config: &RunConfig, root: &Path, base_id: &str, created_at: DateTime<Utc>) -> Result<Self> {
        let category_dir = root.join(slug(&config.experiment().category));
        std::fs::create_dir_all(&category_dir).map_err(|e| {
            Error::Workspace(format!("cannot create {}: {e}", category_dir.display()))
        })?;

        for attempt in 0..MAX_WORKSPACE_ATTEMPTS {
            let experiment_id = if attempt == 0 {
                base_id.to_string()
            } else {
                format!("{base_id}_{attempt}")
            };
            let workspace = category_dir.join(&experiment_id);
            match std::fs::create_dir(&workspace) {
                Ok(()) => {
                    ArtifactStore::new(&workspace, &experiment_id)
                        .put_json("config.json", &config.to_json()?)?;
                    info!(experiment_id = %experiment_id, workspace = %workspace.display(), "workspace created");
                    return Ok(Self {
                        experiment_id,
                        workspace,
                        created_at,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(experiment_id = %experiment_id, attempt, "workspace exists, retrying");
                }
                Err(e) => {
                    return Err(Error::Workspace(format!(
                        "cannot create {}: {e}",
                        workspace.display()
                    )))
                }
            }
        }

        Err(Error::Workspace(format!(
            "no free workspace for '{base_id}' after {MAX_WORKSPACE_ATTEMPTS} attempts"
        )))
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn generate_id(config: &RunConfig, now: DateTime<Utc>) -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    let digest = Sha256::digest(
        format!("{}|{nanos}|{}|{sequence}", config.hash(), std::process::id()).as_bytes(),
    );
    let hash6 = &hex::encode(digest)[..6];
    format!(
        "{}_{}_{hash6}",
        slug(&config.experiment().name),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Lowercase `name`, collapse every run of non-alphanumerics into `-`.
///
/// Falls back to `unnamed` when nothing is left.
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Git revision of the code that produced a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRevision {
    /// Short commit hash
    pub commit: String,
    /// Uncommitted changes present
    pub dirty: bool,
}

impl CodeRevision {
    /// Detect the revision of the git checkout containing `dir`.
    ///
    /// Returns `None` when git is unavailable or `dir` is not a checkout.
    #[must_use]
    pub fn detect(dir: &Path) -> Option<Self> {
        let commit = git(dir, &["rev-parse", "--short", "HEAD"])?;
        let dirty = git(dir, &["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
        Some(Self { commit, dirty })
    }
}

impl std::fmt::Display for CodeRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dirty {
            write!(f, "{}-dirty", self.commit)
        } else {
            f.write_str(&self.commit)
        }
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
