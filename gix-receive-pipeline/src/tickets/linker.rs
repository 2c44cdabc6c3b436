use std::collections::HashSet;

use gix_hash::ObjectId;

use crate::identity::PushingIdentity;
use crate::protocol::{CommandKind, RefUpdateCommand};
use crate::session::ClientMessages;
use crate::store::{CommitRecord, Repository, StoreError};
use crate::tickets::{
    Change, LinkAction, Status, Ticket, TicketLink, TicketNotifier, TicketNumber, TicketReferenceParser,
    TicketService,
};

/// Links the commits of applied branch updates to the tickets their messages mention.
///
/// - creates and fast-forwards link the new commits
/// - non-fast-forwards first unlink the discarded commits, then link the new ones
/// - deletions unlink the commits that no other branch contains
///
/// Call [`finish()`](Self::finish()) once all commands were processed.
pub struct TicketLinker<'a> {
    service: &'a dyn TicketService,
    parser: &'a TicketReferenceParser,
    repository: &'a dyn Repository,
    identity: &'a PushingIdentity,
    short_id_len: usize,
    notifier: Box<dyn TicketNotifier + 'a>,
    touched: Vec<TicketNumber>,
    /// Applied branch commands of this push as `(ref name, tip before the push)`.
    pushed: Vec<(String, Option<ObjectId>)>,
    linked: HashSet<ObjectId>,
    active: bool,
}

impl<'a> TicketLinker<'a> {
    pub fn new(
        service: &'a dyn TicketService,
        parser: &'a TicketReferenceParser,
        repository: &'a dyn Repository,
        identity: &'a PushingIdentity,
        short_id_len: usize,
    ) -> Self {
        Self {
            active: service.is_accepting_ticket_updates(repository.name()),
            notifier: service.create_notifier(),
            service,
            parser,
            repository,
            identity,
            short_id_len,
            touched: Vec::new(),
            pushed: Vec::new(),
            linked: HashSet::new(),
        }
    }

    /// Remember where the branches updated by `commands` pointed before the push.
    ///
    /// Commits of created branches are then only skipped if a branch contained them before,
    /// not if another branch of the same push does.
    pub fn with_pushed_commands(mut self, commands: &[RefUpdateCommand]) -> Self {
        self.pushed = commands
            .iter()
            .filter(|cmd| cmd.is_ok() && cmd.branch_name().is_some())
            .map(|cmd| (cmd.name().to_owned(), cmd.old_tip()))
            .collect();
        self
    }

    /// Return `false` if the ticket service doesn't take updates for this repository.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Update tickets for `cmd` if it is an applied branch update.
    pub fn process(&mut self, cmd: &RefUpdateCommand, messages: &mut ClientMessages) {
        if !self.active || !cmd.is_ok() {
            return;
        }
        let Some(branch) = cmd.branch_name() else {
            return;
        };
        let result = match cmd.kind() {
            CommandKind::Create => self
                .created_commits(cmd)
                .map(|commits| self.link_commits(&commits, branch, messages)),
            CommandKind::Update => self
                .repository
                .new_commits(cmd.name(), cmd.old_tip().as_ref(), &cmd.new_id())
                .map(|commits| self.link_commits(&commits, branch, messages)),
            CommandKind::UpdateNonFastForward => self.rewrite(cmd, branch, messages),
            CommandKind::Delete => self.cleanup_deleted(cmd, messages),
        };
        if let Err(err) = result {
            tracing::warn!(
                repository = self.repository.name(),
                refname = cmd.name(),
                %err,
                "could not scan commits for ticket references"
            );
        }
    }

    /// Report, notify and reset caches. Returns the tickets that were updated.
    pub fn finish(mut self, messages: &mut ClientMessages) -> Vec<TicketNumber> {
        if !self.active {
            return self.touched;
        }
        if !self.touched.is_empty() {
            messages.info(format!("{} tickets updated", self.touched.len()));
        }
        self.notifier.send_all();
        self.service.reset_caches(self.repository.name());
        self.touched
    }

    /// Commits of a created branch that no branch contained before the push, newest first.
    fn created_commits(&self, cmd: &RefUpdateCommand) -> Result<Vec<CommitRecord>, StoreError> {
        let mut hidden: Vec<ObjectId> = self
            .repository
            .branches()?
            .into_iter()
            .filter(|(name, _)| name != cmd.name() && !self.pushed.iter().any(|(pushed, _)| pushed == name))
            .map(|(_, tip)| tip)
            .collect();
        hidden.extend(
            self.pushed
                .iter()
                .filter(|(name, _)| name != cmd.name())
                .filter_map(|(_, old)| *old),
        );
        self.repository.rev_list(&cmd.new_id(), &hidden)
    }

    fn rewrite(
        &mut self,
        cmd: &RefUpdateCommand,
        branch: &str,
        messages: &mut ClientMessages,
    ) -> Result<(), StoreError> {
        let (old, new) = (cmd.old(), cmd.new_id());
        let (discarded, added) = match self.repository.merge_base(&old, &new)? {
            Some(base) => (
                self.repository.rev_list(&old, &[base])?,
                self.repository.rev_list(&new, &[base])?,
            ),
            None => (
                self.repository.rev_list(&old, &[new])?,
                self.repository.rev_list(&new, &[old])?,
            ),
        };
        self.unlink_commits(&discarded, messages);
        self.link_commits(&added, branch, messages);
        Ok(())
    }

    fn cleanup_deleted(&mut self, cmd: &RefUpdateCommand, messages: &mut ClientMessages) -> Result<(), StoreError> {
        let deleted = cmd.old();
        let mut nearest: Option<(usize, ObjectId)> = None;
        for (name, tip) in self.repository.branches()? {
            if name == cmd.name() {
                continue;
            }
            let Some(base) = self.repository.merge_base(&deleted, &tip)? else {
                continue;
            };
            let distance = self.repository.count_commits(&base, &deleted)?;
            if distance == 0 {
                tracing::debug!(refname = cmd.name(), into = name.as_str(), "deleted branch was fully merged");
                return Ok(());
            }
            if nearest.map_or(true, |(best, _)| distance < best) {
                nearest = Some((distance, base));
            }
        }

        match nearest {
            Some((_, base)) => {
                let unmerged = self.repository.rev_list(&deleted, &[base])?;
                self.unlink_commits(&unmerged, messages);
            }
            // TODO: decide whether deleting an orphan branch unlinks all of its commits or is refused.
            None => tracing::warn!(
                repository = self.repository.name(),
                refname = cmd.name(),
                "deleted branch shares no history with other branches, skipping ticket cleanup"
            ),
        }
        Ok(())
    }

    /// Submit one change removing all ticket links of `commits`.
    fn unlink_commits(&mut self, commits: &[CommitRecord], messages: &mut ClientMessages) {
        let mut change = Change::new(self.identity.username.clone());
        for commit in commits.iter().rev() {
            for reference in self.parser.parse(&commit.message) {
                change.link(TicketLink::deletion(reference.number, commit.id));
            }
        }
        if change.pending_links.is_empty() {
            return;
        }
        let repository = self.repository.name();
        match self.service.update_links(repository, change) {
            Ok(updated) => {
                for number in updated {
                    match self.service.get_ticket(repository, number) {
                        Ok(Some(ticket)) => self.touch(&ticket),
                        Ok(None) => {}
                        Err(err) => tracing::warn!(repository, number, %err, "could not load ticket"),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(repository, %err, "failed to remove ticket links");
                messages.error(format!("FAILED to remove ticket links: {err}"));
            }
        }
    }

    /// Link `commits`, given newest first, oldest first.
    ///
    /// Commits already linked by an earlier command of this push are skipped.
    fn link_commits(&mut self, commits: &[CommitRecord], branch: &str, messages: &mut ClientMessages) {
        for commit in commits.iter().rev() {
            if !self.linked.insert(commit.id) {
                continue;
            }
            for reference in self.parser.parse(&commit.message) {
                match reference.action {
                    LinkAction::Commit => self.reference(reference.number, commit, branch, messages),
                    LinkAction::Close => self.close(reference.number, commit, branch, messages),
                }
            }
        }
    }

    fn reference(&mut self, number: TicketNumber, commit: &CommitRecord, branch: &str, messages: &mut ClientMessages) {
        let short = self.short_id(&commit.id);
        let mut change = Change::new(self.identity.username.clone());
        change.link(TicketLink::new(number, LinkAction::Commit, commit.id));
        match self.service.update_ticket(self.repository.name(), number, change) {
            Ok(ticket) => {
                self.announce(&ticket, &format!("referenced by push of {short} to {branch}"), messages);
                self.touch(&ticket);
            }
            Err(err) => {
                tracing::warn!(repository = self.repository.name(), number, commit = %commit.id, %err, "failed to reference ticket");
                messages.error(format!("FAILED to reference ticket #{number} by push of {short}"));
            }
        }
    }

    fn close(&mut self, number: TicketNumber, commit: &CommitRecord, branch: &str, messages: &mut ClientMessages) {
        let short = self.short_id(&commit.id);
        let repository = self.repository.name();
        let ticket = match self.service.get_ticket(repository, number) {
            Ok(Some(ticket)) => ticket,
            Ok(None) => {
                tracing::warn!(repository, number, "commit closes an unknown ticket");
                messages.error(format!("FAILED to close ticket #{number} by push of {short}: ticket not found"));
                return;
            }
            Err(err) => {
                tracing::warn!(repository, number, %err, "failed to load ticket");
                messages.error(format!("FAILED to close ticket #{number} by push of {short}"));
                return;
            }
        };
        if ticket.is_closed() {
            tracing::debug!(repository, number, "ticket is already closed");
            return;
        }

        let mut change = Change::new(self.identity.username.clone());
        change.set_status(Status::Fixed);
        change.link(TicketLink::new(number, LinkAction::Close, commit.id));
        if ticket.responsible().is_none() {
            change.set_responsible(self.identity.username.clone());
        }
        match self.service.update_ticket(repository, number, change) {
            Ok(ticket) => {
                self.announce(&ticket, &format!("closed by push of {short} to {branch}"), messages);
                self.touch(&ticket);
            }
            Err(err) => {
                tracing::warn!(repository, number, commit = %commit.id, %err, "failed to close ticket");
                messages.error(format!("FAILED to close ticket #{number} by push of {short}"));
            }
        }
    }

    fn announce(&self, ticket: &Ticket, what: &str, messages: &mut ClientMessages) {
        messages.info(format!("#{}: {}", ticket.number(), ticket.title()));
        messages.info(what);
        messages.info(self.service.ticket_url(ticket));
    }

    fn touch(&mut self, ticket: &Ticket) {
        if !self.touched.contains(&ticket.number()) {
            self.touched.push(ticket.number());
            self.notifier.queue_mailing(ticket);
        }
    }

    fn short_id(&self, id: &ObjectId) -> String {
        id.to_hex_with_len(self.short_id_len).to_string()
    }
}
