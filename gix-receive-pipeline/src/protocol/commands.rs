// Ref update commands and their head-info parsing.
//
// Head-info command lines have the form
//   "<old-oid> <new-oid> <refname>[\\0<capabilities>]"
// and may be interleaved with "push-option=<value>" lines.
//
// Capability tokens (after NUL on the first command line) are parsed into Options.

use crate::protocol::options::Options;
use crate::Error;
use gix_hash::ObjectId;

/// The kind of change a command applies to its ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Create a ref that did not exist.
    Create,
    /// Move a ref forward to a descendant of its old value.
    Update,
    /// Move a ref to a commit that does not contain its old value.
    UpdateNonFastForward,
    /// Delete an existing ref.
    Delete,
}

impl CommandKind {
    /// A stable, lower-case name used in logs, push-log entries and script contexts.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Create => "create",
            CommandKind::Update => "update",
            CommandKind::UpdateNonFastForward => "update-nonff",
            CommandKind::Delete => "delete",
        }
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// The repository mirrors another one.
    Mirror,
    /// The repository is frozen.
    Frozen,
    /// The repository has a working copy.
    WorkingCopy,
    /// The pusher may not push to the repository.
    PushDenied,
    /// The ref is reserved for administrators.
    ProtectedRef,
    /// The ref namespace is not served by this pipeline.
    UnsupportedRef,
    /// The pusher may not create refs.
    CreateDenied,
    /// The pusher may not delete refs.
    DeleteDenied,
    /// Non-fast-forward updates are not permitted.
    NonFastForward,
    /// Committer verification needs an email address.
    MissingEmail,
    /// A mainline commit was not committed by the pusher.
    CommitterMismatch,
    /// Objects required for the update are not available.
    MissingObjects,
    /// A hook or script rejected the command.
    Hook,
    /// The ref no longer has the expected old value.
    StaleRef,
    /// The ref store failed while applying the batch.
    LockFailure,
}

/// Outcome of a single command. Transitions only go forward, from
/// `NotAttempted` to either `Ok` or `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Not decided yet.
    NotAttempted,
    /// The ref was updated.
    Ok,
    /// The command was refused and will not be applied.
    Rejected {
        /// Classification of the rejection.
        code: ReasonCode,
        /// Human-readable reason sent to the pusher.
        reason: String,
    },
}

/// A single ref update as requested by the pusher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdateCommand {
    name: String,
    old: ObjectId,
    new: ObjectId,
    kind: CommandKind,
    result: CommandResult,
}

impl RefUpdateCommand {
    /// Create a command from raw ids, deriving its kind from which side is null.
    ///
    /// Updates start out as [`CommandKind::Update`] and are reclassified once
    /// ancestry is known.
    pub fn new(name: impl Into<String>, old: ObjectId, new: ObjectId) -> Result<Self, Error> {
        let kind = match (old.is_null(), new.is_null()) {
            (true, true) => return Err(Error::Validation("both old and new are zero (invalid command)".into())),
            (true, false) => CommandKind::Create,
            (false, true) => CommandKind::Delete,
            (false, false) => CommandKind::Update,
        };
        Ok(Self {
            name: name.into(),
            old,
            new,
            kind,
            result: CommandResult::NotAttempted,
        })
    }

    /// A command creating `name` at `new`.
    pub fn create(name: impl Into<String>, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            old: ObjectId::null(new.kind()),
            new,
            kind: CommandKind::Create,
            result: CommandResult::NotAttempted,
        }
    }

    /// A command moving `name` from `old` to `new`.
    pub fn update(name: impl Into<String>, old: ObjectId, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            old,
            new,
            kind: CommandKind::Update,
            result: CommandResult::NotAttempted,
        }
    }

    /// A command deleting `name`, which is expected to point at `old`.
    pub fn delete(name: impl Into<String>, old: ObjectId) -> Self {
        Self {
            name: name.into(),
            old,
            new: ObjectId::null(old.kind()),
            kind: CommandKind::Delete,
            result: CommandResult::NotAttempted,
        }
    }

    /// The full ref name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The expected current value, null for creations.
    pub fn old(&self) -> ObjectId {
        self.old
    }

    /// The requested value, null for deletions.
    pub fn new_id(&self) -> ObjectId {
        self.new
    }

    /// The old value unless this is a creation.
    pub fn old_tip(&self) -> Option<ObjectId> {
        (!self.old.is_null()).then_some(self.old)
    }

    /// The new value unless this is a deletion.
    pub fn new_tip(&self) -> Option<ObjectId> {
        (!self.new.is_null()).then_some(self.new)
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    /// The branch name without `refs/heads/`, if this is a branch.
    pub fn branch_name(&self) -> Option<&str> {
        self.name.strip_prefix("refs/heads/")
    }

    /// The ref name with its well-known prefix removed.
    pub fn short_name(&self) -> &str {
        ["refs/heads/", "refs/tags/", "refs/remotes/", "refs/"]
            .iter()
            .find_map(|prefix| self.name.strip_prefix(prefix))
            .unwrap_or(&self.name)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.result, CommandResult::NotAttempted)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, CommandResult::Ok)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.result, CommandResult::Rejected { .. })
    }

    /// The rejection code and reason, if rejected.
    pub fn rejection(&self) -> Option<(ReasonCode, &str)> {
        match &self.result {
            CommandResult::Rejected { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        }
    }

    /// Reject the command unless its result was already decided.
    ///
    /// Returns `true` if the rejection took effect.
    pub fn reject(&mut self, code: ReasonCode, reason: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.result = CommandResult::Rejected {
            code,
            reason: reason.into(),
        };
        true
    }

    /// Mark the command as applied unless its result was already decided.
    pub fn mark_ok(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.result = CommandResult::Ok;
        true
    }

    pub(crate) fn mark_non_fast_forward(&mut self) {
        if self.kind == CommandKind::Update {
            self.kind = CommandKind::UpdateNonFastForward;
        }
    }
}

/// A list of parsed update commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<RefUpdateCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn push(&mut self, cmd: RefUpdateCommand) {
        self.commands.push(cmd);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RefUpdateCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Hand out the commands for processing.
    pub fn into_vec(self) -> Vec<RefUpdateCommand> {
        self.commands
    }

    /// Parse head-info from text, one logical line per `\n`.
    ///
    /// - Command lines: "<old> <new> <ref>[\\0caps]"
    /// - "push-option=<value>" lines are recorded in [`Options::push_options`].
    ///
    /// Returns the list of commands and the parsed Options.
    pub fn parse_from_text(text: &str) -> Result<(Self, Options), Error> {
        let mut list = CommandList::new();
        let mut opts = Options::default();
        let mut caps_seen = false;

        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("push-option=") {
                opts.add_push_option(value.to_string());
                continue;
            }

            let (cmd_part, caps_part) = split_once_nul(line);
            if !caps_seen {
                if let Some(caps) = caps_part {
                    opts.negotiated = Options::parse(caps).negotiated;
                    caps_seen = true;
                }
            }

            list.push(parse_command_before_nul(cmd_part)?);
        }

        Ok((list, opts))
    }
}

/// Parse a command line (before any NUL) into a command.
fn parse_command_before_nul(cmd_part: &str) -> Result<RefUpdateCommand, Error> {
    let mut it = cmd_part.split_whitespace();
    let old_hex = it.next().ok_or_else(|| Error::Protocol("missing <old> oid".into()))?;
    let new_hex = it.next().ok_or_else(|| Error::Protocol("missing <new> oid".into()))?;
    let name = it.next().ok_or_else(|| Error::Protocol("missing <refname>".into()))?;

    // Refnames can't contain spaces.
    if it.next().is_some() {
        return Err(Error::Protocol("unexpected tokens after <refname>".into()));
    }

    let old = parse_oid(old_hex).map_err(|e| Error::Protocol(format!("invalid old oid '{old_hex}': {e}")))?;
    let new = parse_oid(new_hex).map_err(|e| Error::Protocol(format!("invalid new oid '{new_hex}': {e}")))?;
    RefUpdateCommand::new(name, old, new)
}

fn parse_oid(hex: &str) -> Result<ObjectId, String> {
    ObjectId::from_hex(hex.as_bytes()).map_err(|e| e.to_string())
}

/// Split once at the first NUL byte; return (before, Option<after>).
fn split_once_nul(s: &str) -> (&str, Option<&str>) {
    match s.find('\0') {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    }
}
