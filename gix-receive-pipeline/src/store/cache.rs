use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::store::CommitRecord;

type Key = (String, String);

/// Branch histories keyed by repository and ref name, shared between pushes.
///
/// Readers outside of the push path, like repository views, fill it. Entries are never
/// refreshed implicitly; whoever changes refs clears them.
#[derive(Debug, Default)]
pub struct CommitCache {
    entries: RwLock<HashMap<Key, Arc<Vec<CommitRecord>>>>,
}

impl CommitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, repository: &str, refname: &str) -> Option<Arc<Vec<CommitRecord>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(repository.to_owned(), refname.to_owned()))
            .cloned()
    }

    /// Remember `commits` as the history of `refname`, replacing what was cached before.
    pub fn insert(&self, repository: &str, refname: &str, commits: Vec<CommitRecord>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((repository.to_owned(), refname.to_owned()), Arc::new(commits));
    }

    pub fn clear_ref(&self, repository: &str, refname: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(repository.to_owned(), refname.to_owned()));
    }

    /// Drop every entry of `repository`.
    pub fn clear_repository(&self, repository: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(repo, _), _| repo != repository);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
