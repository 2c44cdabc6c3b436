use crate::identity::PushingIdentity;
use crate::policy::{reject, RepositoryPolicy};
use crate::protocol::{CommandKind, ReasonCode, RefUpdateCommand};
use crate::store::Repository;

/// Confirms that the mainline commits of a push were committed by the pusher.
///
/// Only the first-parent chain of each pushed tip is checked. Commits brought in
/// through the second and further parents of merges were committed elsewhere and are skipped.
pub struct CommitterVerifier<'a> {
    policy: &'a RepositoryPolicy,
    identity: &'a PushingIdentity,
}

impl<'a> CommitterVerifier<'a> {
    pub fn new(policy: &'a RepositoryPolicy, identity: &'a PushingIdentity) -> Self {
        Self { policy, identity }
    }

    /// Verification needs an authenticated push and must be enabled for the repository.
    pub fn is_active(&self) -> bool {
        self.policy.verify_committer && self.policy.access_restriction.requires_authenticated_push()
    }

    /// Reject each pending command introducing a first-parent commit that isn't ours.
    pub fn verify(&self, repo: &dyn Repository, commands: &mut [RefUpdateCommand]) {
        if !self.is_active() {
            return;
        }
        let repository = self.policy.name.as_str();
        if self.identity.email.as_deref().map_or(true, str::is_empty) {
            let reason = format!(
                "{} must have an email address configured to push to {repository}, as committer verification is enabled",
                self.identity.username
            );
            for cmd in commands.iter_mut().filter(|cmd| cmd.is_pending()) {
                reject(cmd, ReasonCode::MissingEmail, &reason, self.identity, repository);
            }
            return;
        }

        for cmd in commands
            .iter_mut()
            .filter(|cmd| cmd.is_pending() && cmd.kind() != CommandKind::Delete)
        {
            if let Some((code, reason)) = self.check(repo, cmd) {
                reject(cmd, code, &reason, self.identity, repository);
            }
        }
    }

    fn check(&self, repo: &dyn Repository, cmd: &RefUpdateCommand) -> Option<(ReasonCode, String)> {
        let old = cmd.old_tip();
        let new = cmd.new_id();
        let commits = match repo.new_commits(cmd.name(), old.as_ref(), &new) {
            Ok(commits) => commits,
            Err(err) => return Some((ReasonCode::MissingObjects, format!("missing necessary objects: {err}"))),
        };

        let mut expected = Some(new);
        for commit in &commits {
            if expected != Some(commit.id) {
                continue;
            }
            if !self.identity.is(&commit.committer.name, &commit.committer.email) {
                let reason = format!(
                    "{} by {} was not committed by {} ({}) <{}>",
                    commit.id,
                    commit.committer,
                    self.identity.display_name(),
                    self.identity.username,
                    self.identity.email.as_deref().unwrap_or_default(),
                );
                return Some((ReasonCode::CommitterMismatch, reason));
            }
            expected = commit.first_parent();
        }
        tracing::debug!(refname = cmd.name(), commits = commits.len(), "verified committer");
        None
    }
}
