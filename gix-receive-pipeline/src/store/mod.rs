//! Access to repositories: refs, commit graph and tags.
//!
//! The pipeline never touches an object database directly. It talks to a [`Repository`]
//! obtained from a [`RepositoryManager`], which also owns the [`CommitCache`].
use gix_hash::ObjectId;

use crate::policy::RepositoryPolicy;
use crate::progress::ProgressSink;
use crate::protocol::RefUpdateCommand;

mod cache;
pub use cache::CommitCache;

pub mod memory;
pub use memory::{MemoryRepository, MemoryRepositoryManager};

/// A name and email pair as found in commits, tags and reflogs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The parts of a commit the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: ObjectId,
    pub parents: Vec<ObjectId>,
    pub committer: Signature,
    pub message: String,
}

impl CommitRecord {
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

/// An annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// The full ref name, like `refs/tags/main/r1`.
    pub name: String,
    /// The id of the tag object.
    pub id: ObjectId,
    /// The commit the tag points to.
    pub target: ObjectId,
    pub tagger: Signature,
    pub message: String,
}

/// Commands to apply to the ref store in one go.
///
/// The store decides every command independently and marks it `Ok` or rejected.
#[derive(Debug)]
pub struct RefBatch<'a> {
    pub allow_non_fast_forward: bool,
    pub reflog_identity: Signature,
    pub reflog_message: String,
    pub commands: Vec<&'a mut RefUpdateCommand>,
}

/// The error returned by [`Repository`] and [`RepositoryManager`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {id} not found")]
    ObjectNotFound { id: ObjectId },
    #[error("repository '{name}' not found")]
    RepositoryNotFound { name: String },
    #[error("reference '{name}' already exists")]
    RefExists { name: String },
    #[error("{message}")]
    Lock { message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// A repository as seen by the pipeline.
pub trait Repository {
    fn name(&self) -> &str;

    /// All branches as `(full ref name, tip)`, sorted by name.
    fn branches(&self) -> Result<Vec<(String, ObjectId)>, StoreError>;

    /// The id `name` currently points to.
    fn find_reference(&self, name: &str) -> Result<Option<ObjectId>, StoreError>;

    fn find_commit(&self, id: &ObjectId) -> Result<CommitRecord, StoreError>;

    /// The nearest common ancestor of `a` and `b`, if they share history.
    fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, StoreError>;

    /// Return `true` if `ancestor` is reachable from `descendant`, which includes both being equal.
    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool, StoreError>;

    /// Commits reachable from `tip` but not from any of `hidden`, newest first.
    ///
    /// Every commit is listed before all of its parents.
    fn rev_list(&self, tip: &ObjectId, hidden: &[ObjectId]) -> Result<Vec<CommitRecord>, StoreError>;

    /// Apply all pending commands of `batch`, marking each as applied or rejected.
    ///
    /// An `Err` means the store failed as a whole. Commands applied before the failure stay applied.
    fn apply_batch(&self, batch: &mut RefBatch<'_>, progress: &mut dyn ProgressSink) -> Result<(), StoreError>;

    /// All annotated tags, sorted by name.
    fn tags(&self) -> Result<Vec<TagRecord>, StoreError>;

    /// Create the annotated tag `name` pointing to `target`, returning the id of the tag object.
    fn create_annotated_tag(
        &self,
        name: &str,
        target: &ObjectId,
        tagger: &Signature,
        message: &str,
    ) -> Result<ObjectId, StoreError>;

    /// The amount of commits in `(base, tip]`.
    fn count_commits(&self, base: &ObjectId, tip: &ObjectId) -> Result<usize, StoreError> {
        Ok(self.rev_list(tip, std::slice::from_ref(base))?.len())
    }

    /// Commits a push to `refname` introduces, newest first.
    ///
    /// With an `old` tip these are the commits in `(old, new]`. Without one, as for
    /// newly created refs, these are the commits not reachable from any other branch.
    fn new_commits(
        &self,
        refname: &str,
        old: Option<&ObjectId>,
        new: &ObjectId,
    ) -> Result<Vec<CommitRecord>, StoreError> {
        match old {
            Some(old) => self.rev_list(new, std::slice::from_ref(old)),
            None => {
                let others: Vec<_> = self
                    .branches()?
                    .into_iter()
                    .filter(|(name, _)| name != refname)
                    .map(|(_, tip)| tip)
                    .collect();
                self.rev_list(new, &others)
            }
        }
    }
}

/// Opens repositories by name and holds state shared between pushes.
pub trait RepositoryManager: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn Repository>, StoreError>;

    fn repository_policy(&self, name: &str) -> Result<RepositoryPolicy, StoreError>;

    fn commit_cache(&self) -> &CommitCache;
}
