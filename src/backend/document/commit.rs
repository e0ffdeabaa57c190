//! Store commits and history.
//!
//! Every write against the document store is one commit on `main`, and the
//! commit message names the [`Change`] it made. A bulk write is a single
//! commit however many documents it touches.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::backend::document::error::DocumentStoreResult;
use crate::backend::document::tree::TreeHandle;
use crate::backend::document::types::{CommitId, Committer, TreeId};

/// What a store commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Initialize,
    CreateCollection { collection: String },
    Insert { collection: String, key: String },
    Update { collection: String, key: String },
    Delete { collection: String, key: String },
    Clear { collection: String },
    Bulk { collection: String, writes: usize },
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Initialize => write!(f, "[INIT] document store"),
            Change::CreateCollection { collection } => write!(f, "[CREATE COLLECTION] {}", collection),
            Change::Insert { collection, key } => write!(f, "[INSERT] {}/{}", collection, key),
            Change::Update { collection, key } => write!(f, "[UPDATE] {}/{}", collection, key),
            Change::Delete { collection, key } => write!(f, "[DELETE] {}/{}", collection, key),
            Change::Clear { collection } => write!(f, "[CLEAR] {}", collection),
            Change::Bulk { collection, writes } => write!(f, "[BULK] {} ({} writes)", collection, writes),
        }
    }
}

/// Write a commit of `tree` on top of `parent`. No ref is moved.
pub fn commit_tree(
    repo: &Repository,
    tree: TreeId,
    parent: Option<CommitId>,
    change: &Change,
    committer: &Committer,
) -> DocumentStoreResult<CommitId> {
    let tree = repo.find_tree(tree.raw())?;
    let signature = committer.signature()?;
    let parent = parent.map(|id| repo.find_commit(id.raw())).transpose()?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo.commit(None, &signature, &signature, &change.to_string(), &tree, &parents)?;
    Ok(CommitId::new(oid))
}

/// the root tree at `commit`
pub fn snapshot(repo: &Repository, commit: CommitId) -> DocumentStoreResult<TreeHandle<'_>> {
    let commit = repo.find_commit(commit.raw())?;
    Ok(TreeHandle::new(commit.tree()?))
}

/// One commit of the store history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    fn from_commit(commit: &git2::Commit<'_>) -> Self {
        let at = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_default();
        Self {
            id: CommitId::new(commit.id()),
            message: commit.message().unwrap_or_default().to_string(),
            author: commit.author().name().unwrap_or("unknown").to_string(),
            at,
        }
    }
}

/// Commits reachable from `head`, newest first, at most `limit` of them.
pub fn history(repo: &Repository, head: CommitId, limit: Option<usize>) -> DocumentStoreResult<Vec<HistoryEntry>> {
    let mut walk = repo.revwalk()?;
    walk.push(head.raw())?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

    let mut entries = Vec::new();
    for oid in walk.take(limit.unwrap_or(usize::MAX)) {
        let commit = repo.find_commit(oid?)?;
        entries.push(HistoryEntry::from_commit(&commit));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::backend::document::tree::create_initial_tree;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn insert(collection: &str, key: &str) -> Change {
        Change::Insert {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_history_newest_first() {
        let (_dir, repo) = setup_repo();
        let root = create_initial_tree(&repo).unwrap();
        let committer = Committer::default();

        let c1 = commit_tree(&repo, root, None, &Change::Initialize, &committer).unwrap();
        let c2 = commit_tree(&repo, root, Some(c1), &insert("players", "a"), &committer).unwrap();
        let bulk = Change::Bulk {
            collection: "players".to_string(),
            writes: 3,
        };
        let c3 = commit_tree(&repo, root, Some(c2), &bulk, &committer).unwrap();

        let entries = history(&repo, c3, None).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c3, c2, c1]);
        assert_eq!(entries[0].message, "[BULK] players (3 writes)");
        assert_eq!(entries[2].author, "Cardinal");

        assert_eq!(history(&repo, c3, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_does_not_move_refs() {
        let (_dir, repo) = setup_repo();
        let root = create_initial_tree(&repo).unwrap();
        commit_tree(&repo, root, None, &Change::Initialize, &Committer::default()).unwrap();
        assert!(repo.head().is_err());
    }

    #[test]
    fn test_change_messages() {
        assert_eq!(insert("players", "123").to_string(), "[INSERT] players/123");
        let delete = Change::Delete {
            collection: "players".to_string(),
            key: "123".to_string(),
        };
        assert_eq!(delete.to_string(), "[DELETE] players/123");
        let created = Change::CreateCollection {
            collection: "clans".to_string(),
        };
        assert_eq!(created.to_string(), "[CREATE COLLECTION] clans");
    }
}
