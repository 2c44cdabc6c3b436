//! Tickets tracked alongside repositories, and how pushes update them.
//!
//! A [`Ticket`] only ever changes by applying a [`Change`], which is also kept in its journal.

use gix_hash::ObjectId;

mod linker;
mod parse;
mod service;

pub use linker::TicketLinker;
pub use parse::{TicketReference, TicketReferenceParser, DEFAULT_CLOSE_PATTERN, DEFAULT_LINK_PATTERN};
pub use service::{MemoryTicketService, TicketError, TicketNotifier, TicketService};

pub type TicketNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    New,
    Open,
    OnHold,
    Resolved,
    Fixed,
    Merged,
    Wontfix,
    Declined,
    Duplicate,
    Invalid,
    Abandoned,
}

impl Status {
    pub fn is_closed(self) -> bool {
        !matches!(self, Status::New | Status::Open | Status::OnHold)
    }
}

/// How a commit relates to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkAction {
    /// The commit mentions the ticket.
    Commit,
    /// The commit claims to close the ticket.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketLink {
    pub target: TicketNumber,
    pub action: LinkAction,
    pub commit: Option<ObjectId>,
    /// Remove the link of `commit` instead of adding it.
    pub is_delete: bool,
}

impl TicketLink {
    pub fn new(target: TicketNumber, action: LinkAction, commit: ObjectId) -> Self {
        Self {
            target,
            action,
            commit: Some(commit),
            is_delete: false,
        }
    }

    pub fn deletion(target: TicketNumber, commit: ObjectId) -> Self {
        Self {
            target,
            action: LinkAction::Commit,
            commit: Some(commit),
            is_delete: true,
        }
    }
}

/// A mutation of a ticket field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Status(Status),
    /// The username of the responsible user, or `None` to unassign.
    Responsible(Option<String>),
}

/// The atomic unit of ticket mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub author: String,
    pub fields: Vec<Field>,
    pub pending_links: Vec<TicketLink>,
    pub time: gix_date::Time,
}

impl Change {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            fields: Vec::new(),
            pending_links: Vec::new(),
            time: gix_date::Time::now_local_or_utc(),
        }
    }

    pub fn set_status(&mut self, status: Status) -> &mut Self {
        self.fields.push(Field::Status(status));
        self
    }

    pub fn set_responsible(&mut self, username: impl Into<String>) -> &mut Self {
        self.fields.push(Field::Responsible(Some(username.into())));
        self
    }

    pub fn link(&mut self, link: TicketLink) -> &mut Self {
        self.pending_links.push(link);
        self
    }

    pub fn has_link_deletions(&self) -> bool {
        self.pending_links.iter().any(|l| l.is_delete)
    }

    pub fn has_link_additions(&self) -> bool {
        self.pending_links.iter().any(|l| !l.is_delete)
    }

    /// Return `true` if links are both added and deleted, which services refuse.
    pub fn is_mixed(&self) -> bool {
        self.has_link_deletions() && self.has_link_additions()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.pending_links.is_empty()
    }

    /// A copy of this change with only the links targeting `number`.
    pub fn for_ticket(&self, number: TicketNumber) -> Change {
        Change {
            author: self.author.clone(),
            fields: self.fields.clone(),
            pending_links: self
                .pending_links
                .iter()
                .filter(|l| l.target == number)
                .cloned()
                .collect(),
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    repository: String,
    number: TicketNumber,
    title: String,
    status: Status,
    responsible: Option<String>,
    links: Vec<TicketLink>,
    changes: Vec<Change>,
}

impl Ticket {
    pub fn new(repository: impl Into<String>, number: TicketNumber, title: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            number,
            title: title.into(),
            status: Status::New,
            responsible: None,
            links: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn number(&self) -> TicketNumber {
        self.number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn responsible(&self) -> Option<&str> {
        self.responsible.as_deref()
    }

    /// Links currently in effect.
    pub fn links(&self) -> &[TicketLink] {
        &self.links
    }

    /// Every change ever applied, oldest first.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Apply `change` and record it in the journal.
    ///
    /// Links targeting other tickets are ignored.
    pub fn apply(&mut self, change: Change) {
        for field in &change.fields {
            match field {
                Field::Status(status) => self.status = *status,
                Field::Responsible(who) => self.responsible.clone_from(who),
            }
        }
        for link in change.pending_links.iter().filter(|l| l.target == self.number) {
            if link.is_delete {
                self.links.retain(|existing| existing.commit != link.commit);
            } else if !self
                .links
                .iter()
                .any(|existing| existing.commit == link.commit && existing.action == link.action)
            {
                self.links.push(link.clone());
            }
        }
        self.changes.push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(n: u8) -> ObjectId {
        ObjectId::Sha1([n; 20])
    }

    #[test]
    fn changes_update_fields_links_and_journal() {
        let mut ticket = Ticket::new("r", 7, "crash on start");
        let mut change = Change::new("alice");
        change
            .set_status(Status::Fixed)
            .set_responsible("alice")
            .link(TicketLink::new(7, LinkAction::Close, commit(1)))
            .link(TicketLink::new(8, LinkAction::Commit, commit(2)));
        ticket.apply(change);

        assert!(ticket.is_closed());
        assert_eq!(ticket.responsible(), Some("alice"));
        assert_eq!(ticket.links().len(), 1, "links of other tickets are ignored");
        assert_eq!(ticket.changes().len(), 1);

        let mut removal = Change::new("bob");
        removal.link(TicketLink::deletion(7, commit(1)));
        ticket.apply(removal);
        assert!(ticket.links().is_empty());
        assert_eq!(ticket.changes().len(), 2);
    }

    #[test]
    fn mixed_changes_are_detected() {
        let mut change = Change::new("alice");
        change.link(TicketLink::new(1, LinkAction::Commit, commit(1)));
        assert!(!change.is_mixed());
        change.link(TicketLink::deletion(1, commit(2)));
        assert!(change.is_mixed());
        assert_eq!(change.for_ticket(2).pending_links.len(), 0);
    }

    #[test]
    fn open_states() {
        assert!(!Status::OnHold.is_closed());
        assert!(Status::Merged.is_closed());
    }
}
