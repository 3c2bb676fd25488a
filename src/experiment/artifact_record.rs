//! One `artifacts.jsonl` line: what was written, where, and its digest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A file written into an experiment workspace.
///
/// `cas_hash` is `sha256:<hex>` over the exact bytes written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    experiment_id: String,
    key: String,
    cas_hash: String,
    size_bytes: u64,
    written_at: DateTime<Utc>,
}

fn digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

impl ArtifactRecord {
    /// Record the write of `bytes` under `key`, stamped now
    #[must_use]
    pub fn for_bytes(experiment_id: impl Into<String>, key: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            key: key.into(),
            cas_hash: digest(bytes),
            size_bytes: bytes.len() as u64,
            written_at: Utc::now(),
        }
    }

    /// Whether `bytes` are what was recorded
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.size_bytes && digest(bytes) == self.cas_hash
    }

    /// Owning experiment
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Workspace-relative path
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `sha256:<hex>` digest
    #[must_use]
    pub fn cas_hash(&self) -> &str {
        &self.cas_hash
    }

    /// Size in bytes
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Write time
    #[must_use]
    pub const fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }
}
