//! The `main` branch.
//!
//! A store keeps exactly one branch. Writers build their commit on the head
//! they read and advance `main` only if it still points there.

use git2::{ErrorCode, Repository};

use crate::backend::document::commit::{commit_tree, Change};
use crate::backend::document::error::{DocumentStoreError, DocumentStoreResult};
use crate::backend::document::tree::create_initial_tree;
use crate::backend::document::types::{CommitId, Committer};

pub const MAIN: &str = "main";
pub const MAIN_REF: &str = "refs/heads/main";

pub struct MainBranch;

impl MainBranch {
    /// current head of `main`, `None` when the branch does not exist yet
    pub fn head(repo: &Repository) -> DocumentStoreResult<Option<CommitId>> {
        match repo.find_reference(MAIN_REF) {
            Ok(reference) => Ok(Some(CommitId::new(reference.peel_to_commit()?.id()))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require(repo: &Repository) -> DocumentStoreResult<CommitId> {
        Self::head(repo)?.ok_or(DocumentStoreError::MissingMain)
    }

    /// Make sure `main` exists and HEAD points at it.
    ///
    /// A repository that already has commits on another branch gets `main`
    /// at its current HEAD; an empty one gets an initial commit with an
    /// empty root tree.
    pub fn ensure(repo: &Repository, committer: &Committer) -> DocumentStoreResult<CommitId> {
        if let Some(head) = Self::head(repo)? {
            return Ok(head);
        }

        let start = match repo.head() {
            Ok(head) => CommitId::new(head.peel_to_commit()?.id()),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                let root = create_initial_tree(repo)?;
                commit_tree(repo, root, None, &Change::Initialize, committer)?
            }
            Err(e) => return Err(e.into()),
        };

        repo.reference(MAIN_REF, start.raw(), false, "create main")?;
        repo.set_head(MAIN_REF)?;
        Ok(start)
    }

    /// Point `main` at `next` if it is still at `expected`.
    pub fn advance(repo: &Repository, expected: CommitId, next: CommitId) -> DocumentStoreResult<()> {
        let log = format!("advance main to {}", next.short());
        match repo.reference_matching(MAIN_REF, next.raw(), true, expected.raw(), &log) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Modified => Err(DocumentStoreError::ConcurrentModification),
            Err(e) => Err(e.into()),
        }
    }
}
