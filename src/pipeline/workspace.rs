//! Per-request working directories
//!
//! Every request gets its own uniquely named directory under the configured
//! temp root. Destruction is best-effort: each removal is attempted on its
//! own, and failures are logged and reported but never raised.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory name prefix for workspaces
pub const WORKSPACE_PREFIX: &str = "segments-";

const CREATE_ATTEMPTS: usize = 3;

const ABANDONED_CLEANUP_ATTEMPTS: usize = 3;
const ABANDONED_CLEANUP_RETRY: Duration = Duration::from_millis(200);

/// An isolated directory owned by one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: Uuid,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Result of a cleanup pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Number of files and directories actually removed
    pub removed: usize,
    /// Paths that could not be removed
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, path: &Path, result: io::Result<()>) {
        match result {
            Ok(()) => self.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                self.failed.push(path.to_path_buf());
            }
        }
    }
}

/// Allocates and destroys workspaces under one root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh workspace.
    ///
    /// `create_dir` is atomic, so two concurrent requests can never end up
    /// with the same directory; a name collision is retried with a new id.
    pub async fn create(&self) -> io::Result<Workspace> {
        fs::create_dir_all(&self.root).await?;

        let mut last_err = None;
        for _ in 0..CREATE_ATTEMPTS {
            let id = Uuid::new_v4();
            let path = self.root.join(format!("{}{}", WORKSPACE_PREFIX, id));
            match fs::create_dir(&path).await {
                Ok(()) => {
                    debug!("Created workspace {}", path.display());
                    return Ok(Workspace {
                        id,
                        path,
                        created_at: Utc::now(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other("workspace creation failed")))
    }

    /// Remove `extra` files, the workspace contents and the workspace itself.
    pub async fn destroy(&self, workspace: &Workspace, extra: &[PathBuf]) -> CleanupReport {
        let mut report = self.discard(extra).await;

        match fs::read_dir(&workspace.path).await {
            Ok(mut entries) => loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        let is_dir = entry
                            .file_type()
                            .await
                            .map(|t| t.is_dir())
                            .unwrap_or(false);
                        let result = if is_dir {
                            fs::remove_dir_all(&path).await
                        } else {
                            fs::remove_file(&path).await
                        };
                        report.record(&path, result);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to list {}: {}", workspace.path.display(), e);
                        break;
                    }
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to list {}: {}", workspace.path.display(), e),
        }

        let result = fs::remove_dir(&workspace.path).await;
        report.record(&workspace.path, result);

        if report.is_clean() {
            debug!(
                "Removed workspace {} ({} entries)",
                workspace.path.display(),
                report.removed
            );
        } else {
            warn!(
                "Workspace {} cleanup left {} path(s) behind",
                workspace.path.display(),
                report.failed.len()
            );
        }
        report
    }

    /// Best-effort removal of loose files, e.g. an upload whose request
    /// failed before a workspace existed.
    pub async fn discard(&self, paths: &[PathBuf]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in paths {
            let result = fs::remove_file(path).await;
            report.record(path, result);
        }
        report
    }

    /// Remove `workspace` if there is one, and `files` in any case.
    pub async fn reclaim(&self, workspace: Option<&Workspace>, files: &[PathBuf]) -> CleanupReport {
        match workspace {
            Some(ws) => self.destroy(ws, files).await,
            None => self.discard(files).await,
        }
    }
}

/// Owns the on-disk leftovers of one request until they are released.
///
/// `release` removes them in order. A guard dropped while still armed, such
/// as when the request future is cancelled, schedules the same removal on the
/// runtime instead, so a disconnecting client cannot leak files.
#[derive(Debug)]
pub struct ScratchGuard {
    manager: WorkspaceManager,
    workspace: Option<Workspace>,
    files: Vec<PathBuf>,
}

impl ScratchGuard {
    pub fn new(manager: WorkspaceManager, files: Vec<PathBuf>) -> Self {
        Self {
            manager,
            workspace: None,
            files,
        }
    }

    /// Make the guard responsible for `workspace` as well.
    pub fn attach(&mut self, workspace: Workspace) {
        self.workspace = Some(workspace);
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Give up ownership without removing anything.
    pub fn disarm(mut self) {
        self.workspace = None;
        self.files.clear();
    }

    /// Remove everything the guard owns.
    pub async fn release(mut self) -> CleanupReport {
        let workspace = self.workspace.take();
        let files = std::mem::take(&mut self.files);
        self.manager.reclaim(workspace.as_ref(), &files).await
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.workspace.is_none() && self.files.is_empty() {
            return;
        }

        let manager = self.manager.clone();
        let workspace = self.workspace.take();
        let files = std::mem::take(&mut self.files);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to remove abandoned request files {:?}", files);
            return;
        };
        runtime.spawn(async move {
            warn!("Request abandoned, removing its files");
            // A killed ffmpeg may still be closing its last segment
            for attempt in 1..=ABANDONED_CLEANUP_ATTEMPTS {
                let report = manager.reclaim(workspace.as_ref(), &files).await;
                if report.is_clean() {
                    break;
                }
                if attempt < ABANDONED_CLEANUP_ATTEMPTS {
                    tokio::time::sleep(ABANDONED_CLEANUP_RETRY).await;
                }
            }
        });
    }
}
