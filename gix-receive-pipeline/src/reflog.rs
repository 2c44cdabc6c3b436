//! The audit trail of pushes.
//!
//! Every applied command becomes one [`PushLogEntry`] in a [`PushLog`]. Writing the log
//! is best-effort and never changes the outcome of a push.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use gix_hash::ObjectId;
use serde::Serialize;

use crate::identity::PushingIdentity;
use crate::protocol::{CommandKind, RefUpdateCommand};
use crate::store::{CommitCache, StoreError};

/// One applied ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushLogEntry {
    pub repository: String,
    pub user: String,
    pub refname: String,
    pub kind: CommandKind,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub time: gix_date::Time,
}

/// Storage for [`PushLogEntry`] records.
pub trait PushLog: Send + Sync {
    fn record(&self, entry: &PushLogEntry) -> Result<(), StoreError>;
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryPushLog {
    entries: Mutex<Vec<PushLogEntry>>,
}

impl MemoryPushLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries recorded so far, oldest first.
    pub fn entries(&self) -> Vec<PushLogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PushLog for MemoryPushLog {
    fn record(&self, entry: &PushLogEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

/// Appends entries to a file, one JSON object per line.
#[derive(Debug)]
pub struct FilePushLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    repository: &'a str,
    user: &'a str,
    #[serde(rename = "ref")]
    refname: &'a str,
    kind: &'static str,
    old: Option<String>,
    new: Option<String>,
    seconds: i64,
    offset: i32,
}

impl FilePushLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PushLog for FilePushLog {
    fn record(&self, entry: &PushLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&JsonEntry {
            repository: &entry.repository,
            user: &entry.user,
            refname: &entry.refname,
            kind: entry.kind.as_str(),
            old: entry.old.map(|id| id.to_string()),
            new: entry.new.map(|id| id.to_string()),
            seconds: entry.time.seconds,
            offset: entry.time.offset,
        })
        .map_err(std::io::Error::from)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Records applied commands and invalidates cached histories of the refs they changed.
pub struct RefLogRecorder<'a> {
    log: Option<&'a dyn PushLog>,
    cache: &'a CommitCache,
    repository: &'a str,
    identity: &'a PushingIdentity,
}

impl<'a> RefLogRecorder<'a> {
    pub fn new(
        log: Option<&'a dyn PushLog>,
        cache: &'a CommitCache,
        repository: &'a str,
        identity: &'a PushingIdentity,
    ) -> Self {
        Self {
            log,
            cache,
            repository,
            identity,
        }
    }

    /// Record `cmd` if it was applied.
    pub fn record(&self, cmd: &RefUpdateCommand) {
        if !cmd.is_ok() {
            return;
        }
        match cmd.kind() {
            // Creating or removing a branch changes which commits are new to every other branch.
            CommandKind::Create | CommandKind::Delete => self.cache.clear_repository(self.repository),
            CommandKind::Update | CommandKind::UpdateNonFastForward => self.cache.clear_ref(self.repository, cmd.name()),
        }

        let Some(log) = self.log else { return };
        let entry = PushLogEntry {
            repository: self.repository.to_owned(),
            user: self.identity.username.clone(),
            refname: cmd.name().to_owned(),
            kind: cmd.kind(),
            old: cmd.old_tip(),
            new: cmd.new_tip(),
            time: gix_date::Time::now_local_or_utc(),
        };
        if let Err(err) = log.record(&entry) {
            tracing::error!(
                repository = self.repository,
                user = self.identity.username.as_str(),
                refname = cmd.name(),
                %err,
                "failed to record push"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Permissions;
    use std::sync::Arc;

    fn id(n: u8) -> ObjectId {
        ObjectId::Sha1([n; 20])
    }

    fn applied(mut cmd: RefUpdateCommand) -> RefUpdateCommand {
        cmd.mark_ok();
        cmd
    }

    fn warm(cache: &CommitCache, refname: &str) {
        cache.insert("r", refname, Vec::new());
    }

    #[test]
    fn only_applied_commands_are_recorded() {
        let log = MemoryPushLog::new();
        let cache = CommitCache::new();
        let identity = PushingIdentity::new("alice", Permissions::all());
        let recorder = RefLogRecorder::new(Some(&log), &cache, "r", &identity);

        recorder.record(&applied(RefUpdateCommand::update("refs/heads/main", id(1), id(2))));
        let mut rejected = RefUpdateCommand::delete("refs/heads/old", id(3));
        rejected.reject(crate::protocol::ReasonCode::DeleteDenied, "no");
        recorder.record(&rejected);

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user, "alice");
        assert_eq!(entries[0].kind, CommandKind::Update);
        assert_eq!((entries[0].old, entries[0].new), (Some(id(1)), Some(id(2))));
    }

    #[test]
    fn cache_invalidation_follows_the_kind_of_update() {
        let cache = CommitCache::new();
        let identity = PushingIdentity::new("alice", Permissions::all());
        let recorder = RefLogRecorder::new(None, &cache, "r", &identity);
        warm(&cache, "refs/heads/main");
        warm(&cache, "refs/heads/dev");

        recorder.record(&applied(RefUpdateCommand::update("refs/heads/main", id(1), id(2))));
        assert!(cache.get("r", "refs/heads/main").is_none());
        assert!(cache.get("r", "refs/heads/dev").is_some());

        recorder.record(&applied(RefUpdateCommand::create("refs/heads/topic", id(2))));
        assert!(cache.is_empty());
    }

    #[test]
    fn file_log_appends_json_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log: Arc<dyn PushLog> = Arc::new(FilePushLog::new(dir.path().join("push.log")));
        let entry = PushLogEntry {
            repository: "r".into(),
            user: "alice".into(),
            refname: "refs/heads/main".into(),
            kind: CommandKind::Create,
            old: None,
            new: Some(id(0xab)),
            time: gix_date::Time::now_local_or_utc(),
        };
        log.record(&entry)?;
        log.record(&entry)?;

        let text = std::fs::read_to_string(dir.path().join("push.log"))?;
        let lines: Vec<serde_json::Value> = text.lines().map(serde_json::from_str).collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["ref"], "refs/heads/main");
        assert_eq!(lines[0]["kind"], "create");
        assert_eq!(lines[0]["old"], serde_json::Value::Null);
        assert_eq!(lines[0]["new"], "ab".repeat(20));
        Ok(())
    }
}
