//! Append-only artifact store rooted at one experiment workspace
//!
//! Every artifact is written exactly once (`create_new`); a second write to
//! the same key is an `Error::Artifact`. Each write appends an
//! [`ArtifactRecord`] line to `artifacts.jsonl`.

use super::ArtifactRecord;
use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Name of the artifact log inside the workspace
pub const ARTIFACT_LOG: &str = "artifacts.jsonl";

/// Writes run outputs into a workspace
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    experiment_id: String,
}

impl ArtifactStore {
    /// Store over an existing workspace directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, experiment_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            experiment_id: experiment_id.into(),
        }
    }

    /// Workspace directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `key`
    #[must_use]
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Write raw bytes under `key`
    ///
    /// # Errors
    /// Returns `Error::Artifact` if the key is invalid or already exists
    pub fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<ArtifactRecord> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && key != ARTIFACT_LOG
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::Artifact(format!("invalid artifact key '{key}'")));
        }

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Artifact(format!(
                    "artifact '{key}' already exists in {}",
                    self.root.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes)?;
        file.sync_all()?;

        let record = ArtifactRecord::for_bytes(&self.experiment_id, key, bytes);
        self.append_record(&record)?;
        debug!(key, size = bytes.len(), "artifact written");
        Ok(record)
    }

    /// Write pretty-printed JSON under `key`
    ///
    /// # Errors
    /// Returns error if serialization fails or the write is rejected
    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<ArtifactRecord> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        self.put_bytes(key, &bytes)
    }

    /// Write text under `key`
    ///
    /// # Errors
    /// Returns error if the write is rejected
    pub fn put_text(&self, key: &str, text: &str) -> Result<ArtifactRecord> {
        self.put_bytes(key, text.as_bytes())
    }

    /// Every record in write order
    ///
    /// # Errors
    /// Returns error if the log cannot be read or parsed
    pub fn records(&self) -> Result<Vec<ArtifactRecord>> {
        let file = match fs::File::open(self.root.join(ARTIFACT_LOG)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }

    /// Whether the file under `record.key()` still holds the recorded bytes.
    ///
    /// A missing file is `Ok(false)`.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub fn verify(&self, record: &ArtifactRecord) -> Result<bool> {
        match fs::read(self.root.join(record.key())) {
            Ok(bytes) => Ok(record.matches(&bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn append_record(&self, record: &ArtifactRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(ARTIFACT_LOG))?;
        log.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), "exp_1");
        (dir, store)
    }

    #[test]
    fn test_put_and_list() {
        let (_dir, store) = store();
        store.put_json("aggregate.json", &json!({"a": 1})).unwrap();
        store.put_text("folds/fold_000.json", "{}").unwrap();

        assert!(store.path("folds/fold_000.json").is_file());
        let records = store.records().unwrap();
        let keys: Vec<&str> = records.iter().map(ArtifactRecord::key).collect();
        assert_eq!(keys, vec!["aggregate.json", "folds/fold_000.json"]);
        assert!(records.iter().all(|r| r.experiment_id() == "exp_1"));
        assert_eq!(records[1].size_bytes(), 2);
    }

    #[test]
    fn test_second_write_rejected() {
        let (_dir, store) = store();
        store.put_text("model.json", "first").unwrap();
        let err = store.put_text("model.json", "second").unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
        assert_eq!(fs::read_to_string(store.path("model.json")).unwrap(), "first");
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (_dir, store) = store();
        for key in ["", "../escape.txt", "/abs.txt", "a/../b", ARTIFACT_LOG] {
            assert!(store.put_text(key, "x").is_err(), "{key}");
        }
    }

    #[test]
    fn test_verify_detects_tampering() {
        let (_dir, store) = store();
        let kept = store.put_text("fold_metrics.csv", "fold_id\n0\n").unwrap();
        let edited = store.put_text("predictions.csv", "index\n1\n").unwrap();
        let removed = store.put_text("model.json", "{}").unwrap();
        fs::write(store.path("predictions.csv"), "index\n2\n").unwrap();
        fs::remove_file(store.path("model.json")).unwrap();

        assert!(store.verify(&kept).unwrap());
        assert!(!store.verify(&edited).unwrap());
        assert!(!store.verify(&removed).unwrap());
        assert_eq!(store.records().unwrap()[0], kept);
    }

    #[test]
    fn test_records_empty_workspace() {
        let (_dir, store) = store();
        assert!(store.records().unwrap().is_empty());
    }
}
