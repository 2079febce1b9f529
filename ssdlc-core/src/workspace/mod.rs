//! Exclusive filesystem workspaces for scan jobs.
//!
//! A workspace name is derived from the scan target, so two jobs against the
//! same repository compete for the same name. A name is held twice over: in
//! the manager's in-memory set, and by an exclusive `flock` on
//! `<root>/.locks/<name>.lock` so that separate processes sharing a root
//! exclude each other too. A second holder gets `WorkspaceBusy` instead of
//! deleting the tree from under a running scan.
//!
//! Acquisition returns a [`WorkspaceLease`]. The lease frees the name when
//! released, or when dropped on a panic or cancellation path.

mod git;

pub use git::{GitCli, RepoFetcher};

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ScanError};
use crate::observability::metrics;
use crate::types::Target;

/// Directory under the root holding the per-name lock files.
const LOCK_DIR: &str = ".locks";

type HeldNames = Arc<Mutex<HashSet<String>>>;

fn lock(held: &HeldNames) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked mid-insert.
    held.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive advisory lock on one workspace name, shared by every process
/// using the same root. Closing the file releases it.
#[derive(Debug)]
struct NameLock {
    _file: File,
}

impl NameLock {
    /// Take the lock without blocking. `Ok(None)` means another holder has it.
    fn try_acquire(root: &Path, name: &str) -> Result<Option<Self>> {
        let dir = root.join(LOCK_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ScanError::io(&dir, e))?;

        let path = dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ScanError::io(&path, e))?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            return Ok(Some(Self { _file: file }));
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        Err(ScanError::io(&path, err))
    }
}

/// An exclusively owned directory bound to one in-flight job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    name: String,
    path: PathBuf,
}

impl Workspace {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Scoped ownership of a workspace.
#[derive(Debug)]
pub struct WorkspaceLease {
    workspace: Workspace,
    held: HeldNames,
    lock: Option<NameLock>,
    released: bool,
}

impl WorkspaceLease {
    /// Remove the directory, then free the name.
    ///
    /// The name is freed even when removal fails; the next holder clears any
    /// leftover tree before using it.
    #[instrument(skip(self), fields(workspace = %self.workspace.name))]
    pub async fn release(mut self) -> Result<()> {
        let removed = remove_tree(&self.workspace.path).await;
        self.free_name();
        match &removed {
            Ok(()) => debug!("Workspace released"),
            Err(e) => warn!("Workspace name freed but directory removal failed: {}", e),
        }
        removed
    }

    fn free_name(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut held = lock(&self.held);
        held.remove(&self.workspace.name);
        metrics::set_active_workspaces(held.len());
        self.lock.take();
    }
}

impl Deref for WorkspaceLease {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(workspace = %self.workspace.name, "Workspace lease dropped without release, cleaning up");
        if let Err(e) = std::fs::remove_dir_all(&self.workspace.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace = %self.workspace.name, "Failed to remove workspace directory: {}", e);
            }
        }
        self.free_name();
    }
}

async fn remove_tree(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ScanError::io(path, e)),
    }
}

/// Hands out exclusive workspaces under a root directory.
pub struct WorkspaceManager {
    root: PathBuf,
    held: HeldNames,
    fetcher: Arc<dyn RepoFetcher>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn RepoFetcher>) -> Self {
        Self { root: root.into(), held: Arc::new(Mutex::new(HashSet::new())), fetcher }
    }

    /// Acquire the workspace for `target`, failing fast if its name is held.
    ///
    /// Repository targets are cloned into the workspace; image targets get an
    /// empty directory for the pulled archive. On any failure the name is
    /// freed again before returning.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn acquire(&self, target: &Target) -> Result<WorkspaceLease> {
        let name = target.workspace_name();
        if name == LOCK_DIR {
            return Err(ScanError::InvalidRequest { reason: format!("'{}' is a reserved workspace name", name) });
        }
        let lease = self.reserve(&name, self.root.join(&name))?;

        // Holding the name in every process means no live job owns this directory.
        if lease.path.exists() {
            warn!(workspace = %lease.name, "Removing stale workspace directory");
            remove_tree(&lease.path).await?;
        }

        match target {
            Target::Repository { url, branch } => {
                self.fetcher.clone_or_checkout(url, branch, &lease.path).await?;
            }
            Target::Image { .. } => {
                tokio::fs::create_dir_all(&lease.path)
                    .await
                    .map_err(|e| ScanError::io(&lease.path, e))?;
            }
        }

        info!(workspace = %lease.name, path = %lease.path.display(), "Workspace acquired");
        Ok(lease)
    }

    /// Hold `name` in this process, then across processes.
    fn reserve(&self, name: &str, path: PathBuf) -> Result<WorkspaceLease> {
        let busy = || {
            metrics::record_workspace_busy();
            warn!(workspace = %name, "Workspace is held by another job");
            ScanError::WorkspaceBusy { name: name.to_string() }
        };

        if !lock(&self.held).insert(name.to_string()) {
            return Err(busy());
        }
        let name_lock = match NameLock::try_acquire(&self.root, name) {
            Ok(Some(name_lock)) => name_lock,
            Ok(None) => {
                lock(&self.held).remove(name);
                return Err(busy());
            }
            Err(e) => {
                lock(&self.held).remove(name);
                return Err(e);
            }
        };
        metrics::set_active_workspaces(lock(&self.held).len());

        Ok(WorkspaceLease {
            workspace: Workspace { name: name.to_string(), path },
            held: self.held.clone(),
            lock: Some(name_lock),
            released: false,
        })
    }

    /// Check if a workspace name is currently held.
    pub fn is_held(&self, name: &str) -> bool {
        lock(&self.held).contains(name)
    }

    /// Number of workspaces currently held.
    pub fn held_count(&self) -> usize {
        lock(&self.held).len()
    }

    /// Delete directories under the root that no live job holds, in this
    /// process or any other sharing the root.
    ///
    /// Each candidate name is reserved while it is removed, so a concurrent
    /// acquisition either fails fast or sees a clean slate.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn sweep_orphans(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScanError::io(&self.root, e)),
        };

        let mut removed = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ScanError::io(&self.root, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if name == LOCK_DIR || !is_dir || self.is_held(&name) {
                continue;
            }
            // Held elsewhere, or a new job won the race and will clear it itself.
            let lease = match self.reserve(&name, entry.path()) {
                Ok(lease) => lease,
                Err(ScanError::WorkspaceBusy { .. }) => {
                    debug!(workspace = %name, "Skipping workspace held by another process");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match lease.release().await {
                Ok(()) => removed.push(name),
                Err(e) => warn!("Failed to sweep orphaned workspace: {}", e),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Removed orphaned workspaces");
        }
        Ok(removed)
    }
}
