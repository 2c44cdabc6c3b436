use std::time::Duration;

use crate::identity::PushingIdentity;
use crate::policy;
use crate::progress::{DelayedProgress, Discard, ProgressSink};
use crate::protocol::{ReasonCode, RefUpdateCommand};
use crate::store::{RefBatch, Repository};

/// The reflog message of refs updated by a push.
pub const REFLOG_MESSAGE: &str = "push";

/// Applies all still-pending commands to the ref store in one batch.
pub struct BatchRefApplier<'a> {
    identity: &'a PushingIdentity,
    progress_delay: Duration,
}

impl<'a> BatchRefApplier<'a> {
    pub fn new(identity: &'a PushingIdentity, progress_delay: Duration) -> Self {
        Self {
            identity,
            progress_delay,
        }
    }

    /// Apply pending `commands` to `repo` and return how many were applied.
    ///
    /// `progress` receives store progress once the delay elapsed, pass `None` if the client
    /// didn't ask for progress. If the store fails as a whole, every command it didn't decide
    /// yet is rejected with a lock error.
    pub fn apply(
        &self,
        repo: &dyn Repository,
        commands: &mut [RefUpdateCommand],
        progress: Option<&mut dyn ProgressSink>,
    ) -> usize {
        let mut batch = RefBatch {
            allow_non_fast_forward: self.identity.can_rewind_ref(),
            reflog_identity: self.identity.signature(),
            reflog_message: REFLOG_MESSAGE.into(),
            commands: commands.iter_mut().filter(|cmd| cmd.is_pending()).collect(),
        };
        if batch.commands.is_empty() {
            return 0;
        }

        let mut discard = Discard;
        let mut delayed;
        let progress: &mut dyn ProgressSink = match progress {
            Some(inner) => {
                delayed = DelayedProgress::new(inner, self.progress_delay);
                &mut delayed
            }
            None => &mut discard,
        };

        if let Err(err) = repo.apply_batch(&mut batch, progress) {
            tracing::error!(repository = repo.name(), %err, "failed to update refs");
            let reason = format!("lock error: {err}");
            for cmd in batch.commands.iter_mut().filter(|cmd| cmd.is_pending()) {
                policy::reject(cmd, ReasonCode::LockFailure, &reason, self.identity, repo.name());
            }
        }

        let applied = batch.commands.iter().filter(|cmd| cmd.is_ok()).count();
        tracing::debug!(
            repository = repo.name(),
            user = self.identity.username.as_str(),
            applied,
            total = batch.commands.len(),
            "applied ref updates"
        );
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Permissions;
    use crate::store::{MemoryRepository, Signature, StoreError};

    fn setup() -> Result<(MemoryRepository, Vec<gix_hash::ObjectId>), StoreError> {
        let repo = MemoryRepository::new("r");
        let sig = Signature::new("a", "a@example.com");
        let root = repo.commit(&[], &sig, "root")?;
        let next = repo.commit(&[root], &sig, "next")?;
        let other = repo.commit(&[root], &sig, "other")?;
        repo.set_reference("refs/heads/main", next);
        Ok((repo, vec![root, next, other]))
    }

    #[test]
    fn storage_failure_rejects_only_undecided_commands() -> Result<(), StoreError> {
        let (repo, ids) = setup()?;
        repo.fail_batch_after(1, "unable to lock refs/heads/b");
        let identity = PushingIdentity::new("alice", Permissions::all());
        let mut commands = vec![
            RefUpdateCommand::create("refs/heads/a", ids[0]),
            RefUpdateCommand::create("refs/heads/b", ids[1]),
            RefUpdateCommand::create("refs/heads/c", ids[2]),
        ];

        let applied = BatchRefApplier::new(&identity, Duration::ZERO).apply(&repo, &mut commands, None);

        assert_eq!(applied, 1);
        assert!(commands[0].is_ok());
        for cmd in &commands[1..] {
            assert_eq!(
                cmd.rejection(),
                Some((ReasonCode::LockFailure, "lock error: unable to lock refs/heads/b"))
            );
        }
        assert_eq!(repo.reference("refs/heads/a"), Some(ids[0]));
        assert_eq!(repo.reference("refs/heads/b"), None);
        assert_eq!(repo.reflog("refs/heads/a")[0].message, REFLOG_MESSAGE);
        Ok(())
    }

    #[test]
    fn rewinding_depends_on_the_pushers_permission() -> Result<(), StoreError> {
        let (repo, ids) = setup()?;
        let contributor = PushingIdentity::new("bob", Permissions::contributor());
        let mut rewind = [RefUpdateCommand::update("refs/heads/main", ids[1], ids[2])];
        rewind[0].mark_non_fast_forward();

        BatchRefApplier::new(&contributor, Duration::ZERO).apply(&repo, &mut rewind, None);
        assert_eq!(rewind[0].rejection(), Some((ReasonCode::NonFastForward, "non-fast-forward")));

        let owner = PushingIdentity::new("alice", Permissions::all());
        let mut rewind = [RefUpdateCommand::update("refs/heads/main", ids[1], ids[2])];
        rewind[0].mark_non_fast_forward();
        assert_eq!(BatchRefApplier::new(&owner, Duration::ZERO).apply(&repo, &mut rewind, None), 1);
        Ok(())
    }

    #[test]
    fn progress_is_delayed() -> Result<(), StoreError> {
        let (repo, ids) = setup()?;
        let identity = PushingIdentity::new("alice", Permissions::all());

        let mut seen = Vec::<String>::new();
        let mut commands = [RefUpdateCommand::create("refs/heads/fast", ids[0])];
        BatchRefApplier::new(&identity, Duration::from_secs(3600)).apply(&repo, &mut commands, Some(&mut seen));
        assert!(seen.is_empty(), "fast pushes stay silent");

        let mut commands = [RefUpdateCommand::create("refs/heads/slow", ids[0])];
        BatchRefApplier::new(&identity, Duration::ZERO).apply(&repo, &mut commands, Some(&mut seen));
        assert_eq!(seen, vec!["updating refs/heads/slow (1/1)\n".to_string()]);
        Ok(())
    }

    #[test]
    fn decided_commands_are_left_alone() {
        let repo = MemoryRepository::new("r");
        let identity = PushingIdentity::new("alice", Permissions::all());
        let mut commands = [RefUpdateCommand::create("refs/heads/x", gix_hash::ObjectId::Sha1([9; 20]))];
        commands[0].reject(ReasonCode::Hook, "no");
        assert_eq!(BatchRefApplier::new(&identity, Duration::ZERO).apply(&repo, &mut commands, None), 0);
        assert_eq!(commands[0].rejection(), Some((ReasonCode::Hook, "no")));
    }
}
