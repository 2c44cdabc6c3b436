//! Accept/reject gates run before any ref is touched.
//!
//! Evaluation order:
//! 1. repository state (mirror, frozen, working copy) and push permission, which halt the push
//! 2. per command: protected ticket ref, patchset namespace, create/delete/rewind permissions
//! 3. committer verification, see [`CommitterVerifier`]

pub mod ff;
mod repository;
mod verify;

pub use repository::{AccessRestriction, RepositoryPolicy};
pub use verify::CommitterVerifier;

use crate::identity::PushingIdentity;
use crate::protocol::{CommandKind, ReasonCode, RefUpdateCommand};

/// The ref holding ticket data, writable only by administrators and owners.
pub const TICKETS_REF: &str = "refs/meta/tickets";
/// The namespace for proposing patchsets, which this pipeline doesn't accept.
pub const PATCHSET_NAMESPACE: &str = "refs/for/";

/// Whether processing continues after a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Every command was rejected and no further stage must run.
    Halt,
}

/// Decides which commands may proceed based on repository state and the pusher's permissions.
pub struct RefUpdatePolicy<'a> {
    policy: &'a RepositoryPolicy,
    identity: &'a PushingIdentity,
}

impl<'a> RefUpdatePolicy<'a> {
    pub fn new(policy: &'a RepositoryPolicy, identity: &'a PushingIdentity) -> Self {
        Self { policy, identity }
    }

    /// Reject what may not be pushed. No state other than command results is modified.
    ///
    /// This is [`admit()`](Self::admit) followed by [`check_commands()`](Self::check_commands).
    pub fn evaluate(&self, commands: &mut [RefUpdateCommand]) -> Verdict {
        if self.admit(commands) == Verdict::Halt {
            return Verdict::Halt;
        }
        self.check_commands(commands);
        Verdict::Continue
    }

    /// Reject every command if repository state or missing push permission refuse the push as a whole.
    ///
    /// Runs before anything else looks at the commands, so the halt reason always wins.
    pub fn admit(&self, commands: &mut [RefUpdateCommand]) -> Verdict {
        if commands.is_empty() {
            return Verdict::Continue;
        }
        let repo = &self.policy.name;
        let user = &self.identity.username;
        let halt = if self.policy.is_mirror {
            Some((ReasonCode::Mirror, format!("{repo} is a mirror and does not accept pushes")))
        } else if self.policy.is_frozen {
            Some((ReasonCode::Frozen, format!("{repo} is frozen and does not accept pushes")))
        } else if !self.policy.is_bare {
            Some((
                ReasonCode::WorkingCopy,
                format!("{repo} has a working copy and does not accept pushes"),
            ))
        } else if !self.identity.can_push() {
            Some((ReasonCode::PushDenied, format!("{user} does not have push permissions for {repo}")))
        } else {
            None
        };
        if let Some((code, reason)) = halt {
            for cmd in commands.iter_mut() {
                reject(cmd, code, &reason, self.identity, repo);
            }
            return Verdict::Halt;
        }
        Verdict::Continue
    }

    /// Apply the per-ref rules to pending commands, expecting them to be classified already.
    pub fn check_commands(&self, commands: &mut [RefUpdateCommand]) {
        let repo = &self.policy.name;
        for cmd in commands.iter_mut().filter(|cmd| cmd.is_pending()) {
            if let Some((code, reason)) = self.refusal(cmd) {
                reject(cmd, code, &reason, self.identity, repo);
            }
        }
    }

    fn refusal(&self, cmd: &RefUpdateCommand) -> Option<(ReasonCode, String)> {
        let user = &self.identity.username;
        let name = cmd.name();
        if name == TICKETS_REF && !(self.identity.can_admin() || self.identity.is_owner()) {
            return Some((ReasonCode::ProtectedRef, format!("{user} is not permitted to push to {name}")));
        }
        if name.starts_with(PATCHSET_NAMESPACE) {
            return Some((
                ReasonCode::UnsupportedRef,
                format!("{name} is a patchset ref and cannot be pushed to directly"),
            ));
        }
        match cmd.kind() {
            CommandKind::Create if !self.identity.can_create_ref() => Some((
                ReasonCode::CreateDenied,
                format!("{user} does not have permission to create {name}"),
            )),
            CommandKind::Delete if !self.identity.can_delete_ref() => Some((
                ReasonCode::DeleteDenied,
                format!("{user} does not have permission to delete {name}"),
            )),
            CommandKind::UpdateNonFastForward if !self.identity.can_rewind_ref() => Some((
                ReasonCode::NonFastForward,
                format!("{user} does not have permission to rewind {name}"),
            )),
            _ => None,
        }
    }
}

/// Reject `cmd` and log it with the acting identity.
pub(crate) fn reject(
    cmd: &mut RefUpdateCommand,
    code: ReasonCode,
    reason: &str,
    identity: &PushingIdentity,
    repository: &str,
) {
    if cmd.reject(code, reason) {
        tracing::warn!(
            repository,
            user = identity.username.as_str(),
            refname = cmd.name(),
            ?code,
            reason,
            "rejected ref update"
        );
    }
}
