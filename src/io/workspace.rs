//! Per-job scratch directories.
//!
//! Every job gets `<root>/<uuid>/{upload,output}`. The directory is owned by a
//! [`WorkspaceGuard`]; dropping the guard removes it, so no exit path of a job
//! can leak a workspace. [`WorkspaceManager::purge_all`] is the administrative
//! sweep and never touches a workspace that is still held by a guard.
//!
//! Several processes may share one root (the CLI and the server default to the
//! same directory). Each live workspace carries an `.in-use` marker holding the
//! owner's pid, and a sweep skips any marked directory it does not own. A
//! workspace left by a killed process keeps its marker and must be removed by
//! hand.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};
use uuid::Uuid;

use crate::error::{Result, StemError};

const IN_USE_MARKER: &str = ".in-use";

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    pub root: PathBuf,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub skipped_active: usize,
    pub failed: usize,
}

#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    active: Arc<Mutex<HashSet<String>>>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            StemError::Workspace(format!(
                "Failed to create workspace root {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.active
            .lock()
            .map_err(|_| StemError::Workspace("active workspace set poisoned".into()))
    }

    /// Creates a fresh workspace and registers it as active.
    pub fn acquire(&self) -> Result<WorkspaceGuard> {
        let mut active = self.lock_active()?;

        let id = Uuid::new_v4().to_string();
        let root = self.root.join(&id);
        let upload_dir = root.join("upload");
        let output_dir = root.join("output");

        // Built under a hidden name and renamed once marked, so a sweep in
        // another process never sees an unmarked live workspace.
        let staging = self.root.join(format!(".{id}"));
        let created = fs::create_dir(&staging)
            .and_then(|_| fs::create_dir(staging.join("upload")))
            .and_then(|_| fs::create_dir(staging.join("output")))
            .and_then(|_| fs::write(staging.join(IN_USE_MARKER), std::process::id().to_string()))
            .and_then(|_| fs::rename(&staging, &root));
        if let Err(e) = created {
            // Half-built scopes are never handed out.
            let _ = fs::remove_dir_all(&staging);
            return Err(StemError::Workspace(format!(
                "Failed to create workspace {}: {e}",
                root.display()
            )));
        }

        active.insert(id.clone());
        tracing::debug!(workspace = %id, "workspace acquired");

        Ok(WorkspaceGuard {
            workspace: Workspace {
                id,
                root,
                upload_dir,
                output_dir,
                created_at: Utc::now(),
            },
            active: Arc::clone(&self.active),
            released: false,
        })
    }

    /// Explicit release; equivalent to dropping the guard but reports failures.
    pub fn release(&self, guard: WorkspaceGuard) -> Result<()> {
        guard.release()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().map(|a| a.contains(id)).unwrap_or(false)
    }

    /// Removes every inactive workspace whose directory is at least `retention` old.
    ///
    /// Holds the active-set lock for the whole sweep so a concurrent `acquire`
    /// cannot register a directory that is about to be deleted. Directories
    /// marked in use by another manager count as active.
    pub fn purge_all(&self, retention: Duration) -> Result<PurgeReport> {
        let active = self.lock_active()?;
        let now = SystemTime::now();
        let mut report = PurgeReport::default();

        let entries = fs::read_dir(&self.root).map_err(|e| {
            StemError::Workspace(format!("Failed to read {}: {e}", self.root.display()))
        })?;

        for entry in entries {
            let Ok(entry) = entry else {
                report.failed += 1;
                continue;
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.starts_with('.') {
                continue;
            }
            if active.contains(&id) || path.join(IN_USE_MARKER).exists() {
                report.skipped_active += 1;
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age < retention {
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to purge workspace");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            removed = report.removed,
            skipped_active = report.skipped_active,
            failed = report.failed,
            "workspace purge finished"
        );
        Ok(report)
    }
}

/// Exclusive handle on one workspace. Removes the directory when dropped.
#[derive(Debug)]
pub struct WorkspaceGuard {
    workspace: Workspace,
    active: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl WorkspaceGuard {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.teardown()
    }

    fn teardown(&self) -> Result<()> {
        let removed = match fs::remove_dir_all(&self.workspace.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StemError::Workspace(format!(
                "Failed to remove workspace {}: {e}",
                self.workspace.root.display()
            ))),
        };
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.workspace.id);
        }
        tracing::debug!(workspace = %self.workspace.id, "workspace released");
        removed
    }
}

impl Deref for WorkspaceGuard {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.teardown() {
            tracing::error!(workspace = %self.workspace.id, error = %e, "workspace leak on drop");
        }
    }
}
