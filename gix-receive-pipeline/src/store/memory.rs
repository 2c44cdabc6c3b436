//! In-memory repositories for embedding and tests.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gix_hash::ObjectId;

use crate::policy::RepositoryPolicy;
use crate::progress::ProgressSink;
use crate::protocol::{CommandKind, ReasonCode};
use crate::store::{
    CommitCache, CommitRecord, RefBatch, Repository, RepositoryManager, Signature, StoreError, TagRecord,
};

const COMMIT_MARKER: u8 = 0xc0;
const TAG_MARKER: u8 = 0x7a;

/// A single reflog line written by [`Repository::apply_batch()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogRecord {
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub identity: Signature,
    pub message: String,
}

#[derive(Debug)]
struct CommitEntry {
    record: CommitRecord,
    generation: u32,
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    commits: HashMap<ObjectId, CommitEntry>,
    refs: BTreeMap<String, ObjectId>,
    tags: BTreeMap<String, TagRecord>,
    reflogs: HashMap<String, Vec<ReflogRecord>>,
    fail_after: Option<(usize, String)>,
}

impl State {
    fn next_id(&mut self, marker: u8) -> (ObjectId, u64) {
        self.next_seq += 1;
        let mut bytes = [0u8; 20];
        bytes[0] = marker;
        bytes[12..].copy_from_slice(&self.next_seq.to_be_bytes());
        (ObjectId::Sha1(bytes), self.next_seq)
    }

    fn entry(&self, id: &ObjectId) -> Result<&CommitEntry, StoreError> {
        self.commits.get(id).ok_or(StoreError::ObjectNotFound { id: *id })
    }

    fn ancestors(&self, tip: &ObjectId) -> Result<HashSet<ObjectId>, StoreError> {
        let mut seen = HashSet::new();
        let mut queue = vec![*tip];
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            queue.extend(self.entry(&id)?.record.parents.iter().copied());
        }
        Ok(seen)
    }
}

/// A repository holding commits, refs and tags in memory.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    name: String,
    state: Arc<RwLock<State>>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a commit with the given `parents` and return its id.
    ///
    /// Parents must already exist.
    pub fn commit(
        &self,
        parents: &[ObjectId],
        committer: &Signature,
        message: impl Into<String>,
    ) -> Result<ObjectId, StoreError> {
        let mut state = self.write();
        let mut generation = 0;
        for parent in parents {
            generation = generation.max(state.entry(parent)?.generation);
        }
        let (id, seq) = state.next_id(COMMIT_MARKER);
        state.commits.insert(
            id,
            CommitEntry {
                record: CommitRecord {
                    id,
                    parents: parents.to_vec(),
                    committer: committer.clone(),
                    message: message.into(),
                },
                generation: generation + 1,
                seq,
            },
        );
        Ok(id)
    }

    /// Point `name` at `id` without any checks or reflog.
    pub fn set_reference(&self, name: impl Into<String>, id: ObjectId) {
        self.write().refs.insert(name.into(), id);
    }

    pub fn reference(&self, name: &str) -> Option<ObjectId> {
        self.read().refs.get(name).copied()
    }

    /// The reflog of `name`, oldest first.
    pub fn reflog(&self, name: &str) -> Vec<ReflogRecord> {
        self.read().reflogs.get(name).cloned().unwrap_or_default()
    }

    /// Make the next batch fail with a lock error after `applied` of its commands were handled.
    pub fn fail_batch_after(&self, applied: usize, message: impl Into<String>) {
        self.write().fail_after = Some((applied, message.into()));
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn branches(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
        Ok(self
            .read()
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with("refs/heads/"))
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }

    fn find_reference(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        Ok(self.reference(name))
    }

    fn find_commit(&self, id: &ObjectId) -> Result<CommitRecord, StoreError> {
        Ok(self.read().entry(id)?.record.clone())
    }

    fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, StoreError> {
        let state = self.read();
        let of_a = state.ancestors(a)?;
        let mut best: Option<&CommitEntry> = None;
        for id in state.ancestors(b)?.intersection(&of_a) {
            let candidate = state.entry(id)?;
            if best.map_or(true, |current| (candidate.generation, candidate.seq) > (current.generation, current.seq)) {
                best = Some(candidate);
            }
        }
        Ok(best.map(|entry| entry.record.id))
    }

    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool, StoreError> {
        let state = self.read();
        state.entry(ancestor)?;
        Ok(state.ancestors(descendant)?.contains(ancestor))
    }

    fn rev_list(&self, tip: &ObjectId, hidden: &[ObjectId]) -> Result<Vec<CommitRecord>, StoreError> {
        let state = self.read();
        let mut excluded = HashSet::new();
        for id in hidden {
            excluded.extend(state.ancestors(id)?);
        }
        let mut entries = state
            .ancestors(tip)?
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .map(|id| state.entry(&id))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| (b.generation, b.seq).cmp(&(a.generation, a.seq)));
        Ok(entries.into_iter().map(|e| e.record.clone()).collect())
    }

    fn apply_batch(&self, batch: &mut RefBatch<'_>, progress: &mut dyn ProgressSink) -> Result<(), StoreError> {
        let mut state = self.write();
        let total = batch.commands.len();
        for (index, cmd) in batch.commands.iter_mut().enumerate() {
            if !cmd.is_pending() {
                continue;
            }
            if let Some((after, message)) = &state.fail_after {
                if index >= *after {
                    let message = message.clone();
                    state.fail_after = None;
                    return Err(StoreError::Lock { message });
                }
            }
            progress.info(format!("updating {} ({}/{total})\n", cmd.name(), index + 1).as_bytes());

            let current = state.refs.get(cmd.name()).copied();
            if current != cmd.old_tip() {
                cmd.reject(ReasonCode::StaleRef, "stale info");
                continue;
            }
            match cmd.new_tip() {
                Some(new) => {
                    if !state.commits.contains_key(&new) {
                        cmd.reject(ReasonCode::MissingObjects, "missing necessary objects");
                        continue;
                    }
                    if cmd.kind() == CommandKind::UpdateNonFastForward && !batch.allow_non_fast_forward {
                        cmd.reject(ReasonCode::NonFastForward, "non-fast-forward");
                        continue;
                    }
                    state.refs.insert(cmd.name().to_owned(), new);
                }
                None => {
                    state.refs.remove(cmd.name());
                }
            }
            let record = ReflogRecord {
                old: cmd.old_tip(),
                new: cmd.new_tip(),
                identity: batch.reflog_identity.clone(),
                message: batch.reflog_message.clone(),
            };
            state.reflogs.entry(cmd.name().to_owned()).or_default().push(record);
            cmd.mark_ok();
        }
        Ok(())
    }

    fn tags(&self) -> Result<Vec<TagRecord>, StoreError> {
        Ok(self.read().tags.values().cloned().collect())
    }

    fn create_annotated_tag(
        &self,
        name: &str,
        target: &ObjectId,
        tagger: &Signature,
        message: &str,
    ) -> Result<ObjectId, StoreError> {
        let mut state = self.write();
        if state.refs.contains_key(name) {
            return Err(StoreError::RefExists { name: name.to_owned() });
        }
        state.entry(target)?;
        let (id, _) = state.next_id(TAG_MARKER);
        state.refs.insert(name.to_owned(), id);
        state.tags.insert(
            name.to_owned(),
            TagRecord {
                name: name.to_owned(),
                id,
                target: *target,
                tagger: tagger.clone(),
                message: message.to_owned(),
            },
        );
        Ok(id)
    }
}

/// Serves [`MemoryRepository`] instances registered with their policy.
#[derive(Debug, Default)]
pub struct MemoryRepositoryManager {
    repositories: RwLock<HashMap<String, (MemoryRepository, RepositoryPolicy)>>,
    cache: CommitCache,
}

impl MemoryRepositoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `repository` under its own name, replacing a previous one.
    pub fn insert(&self, repository: MemoryRepository, policy: RepositoryPolicy) {
        self.repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository.name.clone(), (repository, policy));
    }

    pub fn get(&self, name: &str) -> Option<MemoryRepository> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(repo, _)| repo.clone())
    }
}

impl RepositoryManager for MemoryRepositoryManager {
    fn open(&self, name: &str) -> Result<Box<dyn Repository>, StoreError> {
        self.get(name)
            .map(|repo| Box::new(repo) as Box<dyn Repository>)
            .ok_or_else(|| StoreError::RepositoryNotFound { name: name.to_owned() })
    }

    fn repository_policy(&self, name: &str) -> Result<RepositoryPolicy, StoreError> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(_, policy)| policy.clone())
            .ok_or_else(|| StoreError::RepositoryNotFound { name: name.to_owned() })
    }

    fn commit_cache(&self) -> &CommitCache {
        &self.cache
    }
}
