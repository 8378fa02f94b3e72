//! Ordered multi-file execution with per-item failure isolation.

use std::{
    collections::BTreeMap,
    fs,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    core::packager::copy_stems,
    error::Result,
    types::{SeparationRequest, StemLabel, StemSet},
};

pub const MANIFEST_FILE_NAME: &str = "batch_manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    Success { stems: StemSet },
    Failed { reason: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub input_path: PathBuf,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl BatchEntry {
    pub fn status(&self) -> ItemStatus {
        match self.outcome {
            ItemOutcome::Success { .. } => ItemStatus::Success,
            ItemOutcome::Failed { .. } => ItemStatus::Failed,
        }
    }

    pub fn stems(&self) -> Option<&StemSet> {
        match &self.outcome {
            ItemOutcome::Success { stems } => Some(stems),
            ItemOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ItemOutcome::Success { .. } => None,
            ItemOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

impl BatchOutcome {
    /// Process exit status for a finished batch: 0, 2 for partial, 1 when nothing succeeded.
    pub fn exit_code(self) -> i32 {
        match self {
            BatchOutcome::AllSucceeded => 0,
            BatchOutcome::Partial => 2,
            BatchOutcome::AllFailed => 1,
        }
    }
}

/// Entries in input order. Producing one means the batch completed; per-item
/// success is read from the entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status() == ItemStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn outcome(&self) -> BatchOutcome {
        match (self.succeeded(), self.failed()) {
            (_, 0) => BatchOutcome::AllSucceeded,
            (0, _) => BatchOutcome::AllFailed,
            _ => BatchOutcome::Partial,
        }
    }
}

/// Runs `run` for every request strictly in order. Errors and panics become
/// that item's failure; the loop always continues.
pub fn run_batch<F>(requests: &[SeparationRequest], mut run: F) -> BatchResult
where
    F: FnMut(&SeparationRequest) -> Result<StemSet>,
{
    let total = requests.len();
    let mut entries = Vec::with_capacity(total);

    for (idx, request) in requests.iter().enumerate() {
        let input_path = request.source_path().to_path_buf();
        tracing::info!(item = idx + 1, total, input = %input_path.display(), "batch item");

        let outcome = match catch_unwind(AssertUnwindSafe(|| run(request))) {
            Ok(Ok(stems)) => ItemOutcome::Success { stems },
            Ok(Err(e)) => {
                tracing::warn!(input = %input_path.display(), error = %e, "batch item failed");
                ItemOutcome::Failed {
                    retryable: e.is_retryable(),
                    reason: e.to_string(),
                }
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(input = %input_path.display(), %reason, "batch item panicked");
                ItemOutcome::Failed {
                    reason: format!("panicked: {reason}"),
                    retryable: false,
                }
            }
        };
        entries.push(BatchEntry { input_path, outcome });
    }

    BatchResult { entries }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub input_path: PathBuf,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub stems: BTreeMap<StemLabel, PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item record of a published batch, written as `batch_manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchManifest {
    pub outcome: BatchOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<ManifestEntry>,
}

impl BatchManifest {
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE_NAME);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Copies each successful item's directory from `staged_root` into `output`,
/// keeping its relative layout, and records every item in a manifest.
pub fn publish_batch(result: &BatchResult, staged_root: &Path, output: &Path) -> Result<BatchManifest> {
    fs::create_dir_all(output)?;
    let mut entries = Vec::with_capacity(result.len());
    for entry in &result.entries {
        let manifest_entry = match &entry.outcome {
            ItemOutcome::Success { stems } => {
                let relative = stems
                    .iter()
                    .next()
                    .and_then(|(_, p)| p.parent())
                    .and_then(|dir| dir.strip_prefix(staged_root).ok())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(stems.source_stem()));
                ManifestEntry {
                    input_path: entry.input_path.clone(),
                    status: ItemStatus::Success,
                    stems: copy_stems(stems, &output.join(relative))?,
                    error: None,
                }
            }
            ItemOutcome::Failed { reason, .. } => ManifestEntry {
                input_path: entry.input_path.clone(),
                status: ItemStatus::Failed,
                stems: BTreeMap::new(),
                error: Some(reason.clone()),
            },
        };
        entries.push(manifest_entry);
    }
    Ok(BatchManifest {
        outcome: result.outcome(),
        succeeded: result.succeeded(),
        failed: result.failed(),
        entries,
    })
}
