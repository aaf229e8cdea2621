//! Git-backed version history of the data root.
//!
//! The data root is an ordinary git repository and every snapshot file is
//! tracked in it. One mutation that changed a file becomes one commit, so
//! existing git tooling can inspect, diff, and roll back sessions.

use std::path::Path;

use git2::{Commit, ErrorCode, Oid, Repository, Signature};
use parking_lot::Mutex;

use crate::session::SessionCode;

/// Commits are recorded under a fixed identity so history stays
/// machine-attributable regardless of who runs the server.
const AUTHOR_NAME: &str = "lockstep";
const AUTHOR_EMAIL: &str = "lockstep@localhost";

/// One commit that changed a session's snapshot.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: Oid,
    /// Commit time, seconds since the epoch.
    pub seconds: i64,
    pub message: String,
}

/// Handle on the git repository at the data root.
///
/// `git2::Repository` is not `Sync`, so the handle serializes all access
/// through a mutex; callers on the async side hop through `spawn_blocking`
/// before touching it. The most recent commit id is tracked alongside so
/// unchanged saves can reuse it without walking the log.
pub struct History {
    repo: Mutex<Repository>,
    latest: Mutex<Option<Oid>>,
}

impl History {
    /// Create the repository (and the directory) if it does not exist yet.
    /// Re-running on an initialized root is harmless, like `git init`.
    pub fn init(root: &Path) -> Result<(), git2::Error> {
        Repository::init(root)?;
        Ok(())
    }

    /// Open an existing repository at the data root.
    pub fn open(root: &Path) -> Result<Self, git2::Error> {
        let repo = Repository::open(root)?;
        let latest = head_commit_id(&repo)?;
        Ok(Self {
            repo: Mutex::new(repo),
            latest: Mutex::new(latest),
        })
    }

    /// Most recently recorded commit id, if any commit exists.
    pub fn latest(&self) -> Option<Oid> {
        *self.latest.lock()
    }

    /// Re-read HEAD and adopt it as the latest id. Used when a save finds
    /// the file unchanged and the current commit already covers it.
    pub fn refresh_latest(&self) -> Result<Option<Oid>, git2::Error> {
        let repo = self.repo.lock();
        let id = head_commit_id(&repo)?;
        *self.latest.lock() = id;
        Ok(id)
    }

    /// Whether the session's snapshot file is identical to its committed
    /// version. Untracked and modified files both count as dirty.
    pub fn is_clean(&self, code: &SessionCode) -> Result<bool, git2::Error> {
        let repo = self.repo.lock();
        let status = repo.status_file(Path::new(code.as_str()))?;
        Ok(status.is_empty())
    }

    /// Stage the session's snapshot file and commit it.
    pub fn record(&self, code: &SessionCode, message: &str) -> Result<Oid, git2::Error> {
        let repo = self.repo.lock();

        let mut index = repo.index()?;
        index.add_path(Path::new(code.as_str()))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let author = Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?;
        let parent = match head_commit_id(&repo)? {
            Some(id) => Some(repo.find_commit(id)?),
            None => None,
        };
        let parents: Vec<&Commit> = parent.iter().collect();

        let id = repo.commit(Some("HEAD"), &author, &author, message, &tree, &parents)?;
        *self.latest.lock() = Some(id);
        Ok(id)
    }

    /// Walk the log newest-first and keep at most `limit` commits in which
    /// the session's snapshot actually changed. A zero limit yields nothing.
    pub fn entries(
        &self,
        code: &SessionCode,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, git2::Error> {
        let repo = self.repo.lock();
        let path = Path::new(code.as_str());
        let mut entries = Vec::new();

        if limit == 0 || head_commit_id(&repo)?.is_none() {
            return Ok(entries);
        }

        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        for id in walk {
            let commit = repo.find_commit(id?)?;
            let current = commit.tree()?.get_path(path).ok().map(|e| e.id());
            let previous = commit
                .parent(0)
                .ok()
                .and_then(|p| p.tree().ok())
                .and_then(|t| t.get_path(path).ok())
                .map(|e| e.id());
            if current != previous {
                entries.push(HistoryEntry {
                    id: commit.id(),
                    seconds: commit.time().seconds(),
                    message: commit.message().unwrap_or("").to_string(),
                });
                if entries.len() == limit {
                    break;
                }
            }
        }
        Ok(entries)
    }
}

fn head_commit_id(repo: &Repository) -> Result<Option<Oid>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}
