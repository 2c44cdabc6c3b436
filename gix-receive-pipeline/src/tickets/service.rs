use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::tickets::{Change, Ticket, TicketNumber};

/// The error returned by [`TicketService`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("ticket #{number} not found in '{repository}'")]
    NotFound { repository: String, number: TicketNumber },
    #[error("a change must not add and delete links at the same time")]
    MixedLinkChange,
    #[error("{0}")]
    Storage(String),
}

/// Collects tickets to notify watchers about and sends the notifications in one go.
pub trait TicketNotifier {
    fn queue_mailing(&mut self, ticket: &Ticket);
    fn send_all(&mut self);
}

/// Storage and notification of tickets.
///
/// Calls are synchronous and read-your-writes.
pub trait TicketService: Send + Sync {
    fn is_accepting_ticket_updates(&self, repository: &str) -> bool;

    fn get_ticket(&self, repository: &str, number: TicketNumber) -> Result<Option<Ticket>, TicketError>;

    /// Apply `change` to ticket `number` and return the updated ticket.
    fn update_ticket(&self, repository: &str, number: TicketNumber, change: Change) -> Result<Ticket, TicketError>;

    /// Apply link changes spanning multiple tickets, returning the tickets that were updated.
    ///
    /// Each affected ticket records the part of `change` targeting it.
    fn update_links(&self, repository: &str, change: Change) -> Result<Vec<TicketNumber>, TicketError>;

    fn create_notifier(&self) -> Box<dyn TicketNotifier + '_>;

    fn reset_caches(&self, repository: &str);

    fn ticket_url(&self, ticket: &Ticket) -> String;
}

#[derive(Debug, Default)]
struct State {
    tickets: BTreeMap<(String, TicketNumber), Ticket>,
    not_accepting: HashSet<String>,
    failing: HashSet<TicketNumber>,
    sent: Vec<(String, TicketNumber)>,
    cache_resets: Vec<String>,
}

/// Tickets kept in memory.
#[derive(Debug)]
pub struct MemoryTicketService {
    base_url: String,
    state: Mutex<State>,
}

impl MemoryTicketService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a ticket.
    pub fn insert(&self, ticket: Ticket) {
        self.lock()
            .tickets
            .insert((ticket.repository().to_owned(), ticket.number()), ticket);
    }

    pub fn ticket(&self, repository: &str, number: TicketNumber) -> Option<Ticket> {
        self.lock().tickets.get(&(repository.to_owned(), number)).cloned()
    }

    pub fn set_accepting_updates(&self, repository: &str, accepting: bool) {
        let mut state = self.lock();
        if accepting {
            state.not_accepting.remove(repository);
        } else {
            state.not_accepting.insert(repository.to_owned());
        }
    }

    /// Make every update of ticket `number` fail with a storage error.
    pub fn fail_updates_of(&self, number: TicketNumber) {
        self.lock().failing.insert(number);
    }

    /// Notifications sent so far, in order.
    pub fn sent_mailings(&self) -> Vec<(String, TicketNumber)> {
        self.lock().sent.clone()
    }

    /// Repositories whose caches were reset, in order.
    pub fn cache_resets(&self) -> Vec<String> {
        self.lock().cache_resets.clone()
    }
}

impl TicketService for MemoryTicketService {
    fn is_accepting_ticket_updates(&self, repository: &str) -> bool {
        !self.lock().not_accepting.contains(repository)
    }

    fn get_ticket(&self, repository: &str, number: TicketNumber) -> Result<Option<Ticket>, TicketError> {
        Ok(self.ticket(repository, number))
    }

    fn update_ticket(&self, repository: &str, number: TicketNumber, change: Change) -> Result<Ticket, TicketError> {
        if change.is_mixed() {
            return Err(TicketError::MixedLinkChange);
        }
        let mut state = self.lock();
        if state.failing.contains(&number) {
            return Err(TicketError::Storage(format!("could not write ticket #{number}")));
        }
        let ticket = state
            .tickets
            .get_mut(&(repository.to_owned(), number))
            .ok_or_else(|| TicketError::NotFound {
                repository: repository.to_owned(),
                number,
            })?;
        ticket.apply(change);
        Ok(ticket.clone())
    }

    fn update_links(&self, repository: &str, change: Change) -> Result<Vec<TicketNumber>, TicketError> {
        if change.is_mixed() {
            return Err(TicketError::MixedLinkChange);
        }
        let targets: BTreeSet<_> = change.pending_links.iter().map(|l| l.target).collect();
        let mut state = self.lock();
        if let Some(number) = targets.iter().find(|n| state.failing.contains(*n)) {
            return Err(TicketError::Storage(format!("could not write ticket #{number}")));
        }
        let mut updated = Vec::new();
        for number in targets {
            match state.tickets.get_mut(&(repository.to_owned(), number)) {
                Some(ticket) => {
                    ticket.apply(change.for_ticket(number));
                    updated.push(number);
                }
                None => tracing::debug!(repository, number, "skipping links of unknown ticket"),
            }
        }
        Ok(updated)
    }

    fn create_notifier(&self) -> Box<dyn TicketNotifier + '_> {
        Box::new(MemoryNotifier {
            service: self,
            queued: Vec::new(),
        })
    }

    fn reset_caches(&self, repository: &str) {
        self.lock().cache_resets.push(repository.to_owned());
    }

    fn ticket_url(&self, ticket: &Ticket) -> String {
        format!(
            "{}/tickets/{}/{}",
            self.base_url.trim_end_matches('/'),
            ticket.repository(),
            ticket.number()
        )
    }
}

struct MemoryNotifier<'a> {
    service: &'a MemoryTicketService,
    queued: Vec<(String, TicketNumber)>,
}

impl TicketNotifier for MemoryNotifier<'_> {
    fn queue_mailing(&mut self, ticket: &Ticket) {
        let key = (ticket.repository().to_owned(), ticket.number());
        if !self.queued.contains(&key) {
            self.queued.push(key);
        }
    }

    fn send_all(&mut self) {
        self.service.lock().sent.append(&mut self.queued);
    }
}
