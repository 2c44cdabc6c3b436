use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::tickets::{LinkAction, TicketNumber};

/// Matches `fixes #12`, `closes-12` and friends.
pub const DEFAULT_CLOSE_PATTERN: &str = r"(?:fixes|closes)[\s-]+#?(\d+)";
/// Matches `#12`, `ref #12`, `issue-#12` and friends.
pub const DEFAULT_LINK_PATTERN: &str = r"(?:ref|task|issue|bug)?[\s-]*#(\d+)";

static DEFAULT_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| compile(DEFAULT_CLOSE_PATTERN).expect("invalid default close pattern"));
static DEFAULT_LINK: LazyLock<Regex> =
    LazyLock::new(|| compile(DEFAULT_LINK_PATTERN).expect("invalid default link pattern"));

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// A ticket mentioned in a commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketReference {
    pub number: TicketNumber,
    pub action: LinkAction,
}

/// Finds ticket references in commit messages.
///
/// Patterns match case-insensitively and must capture the ticket number in their first group.
#[derive(Debug, Clone)]
pub struct TicketReferenceParser {
    close: Regex,
    link: Regex,
}

impl Default for TicketReferenceParser {
    fn default() -> Self {
        Self {
            close: DEFAULT_CLOSE.clone(),
            link: DEFAULT_LINK.clone(),
        }
    }
}

impl TicketReferenceParser {
    pub fn new(close: &str, link: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            close: compile(close)?,
            link: compile(link)?,
        })
    }

    pub fn close_pattern(&self) -> &str {
        self.close.as_str()
    }

    pub fn link_pattern(&self) -> &str {
        self.link.as_str()
    }

    /// Every ticket referenced by `message`, each at most once.
    ///
    /// A ticket that is both closed and referenced is reported as closed.
    pub fn parse(&self, message: &str) -> Vec<TicketReference> {
        let mut out: Vec<TicketReference> = Vec::new();
        for (pattern, action) in [(&self.close, LinkAction::Close), (&self.link, LinkAction::Commit)] {
            for number in pattern
                .captures_iter(message)
                .filter_map(|caps| caps.get(1)?.as_str().parse::<TicketNumber>().ok())
            {
                if !out.iter().any(|r| r.number == number) {
                    out.push(TicketReference { number, action });
                }
            }
        }
        out
    }
}
