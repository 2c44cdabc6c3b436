//! Configuration read from git-config files.
//!
//! # Configuration Keys
//!
//! ## Global
//! - `hooks.preReceive`, `hooks.postReceive`: script names, multi-valued
//! - `hooks.scriptsDir`: directory holding the scripts
//! - `web.canonicalUrl`: base URL passed to scripts and used in ticket links
//! - `web.shortCommitIdLength`: length of abbreviated ids in messages (default 6)
//! - `tickets.closeOnPushCommitMessageRegex`, `tickets.linkOnPushCommitMessageRegex`
//! - `git.defaultIncrementalPushTagPrefix`: default `r`
//! - `receive.progressDelay`: milliseconds before progress is shown (default 250)
//!
//! ## Per repository
//! See [`RepositoryPolicy::from_config()`](crate::policy::RepositoryPolicy::from_config()).

use std::path::PathBuf;
use std::time::Duration;

use gix_config::File;

use crate::progress;
use crate::tickets::{TicketReferenceParser, DEFAULT_CLOSE_PATTERN, DEFAULT_LINK_PATTERN};

mod policy;

/// The error returned when configuration values can't be used.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid boolean value for '{key}': {message}")]
    Boolean { key: &'static str, message: String },
    #[error("invalid integer value for '{key}': {message}")]
    Integer { key: &'static str, message: String },
    #[error("'{key}' must not be negative, got {value}")]
    Negative { key: &'static str, value: i64 },
    #[error("invalid access restriction for '{key}': '{value}'. Valid values are: none, push, clone, view")]
    AccessRestriction { key: &'static str, value: String },
    #[error("invalid regular expression for '{key}'")]
    Regex {
        key: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Server-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Scripts run before refs are updated, for every repository.
    pub pre_receive_scripts: Vec<String>,
    /// Scripts run after refs were updated, for every repository.
    pub post_receive_scripts: Vec<String>,
    pub scripts_dir: Option<PathBuf>,
    pub canonical_url: Option<String>,
    pub short_commit_id_length: usize,
    pub ticket_parser: TicketReferenceParser,
    pub incremental_push_tag_prefix: String,
    pub progress_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pre_receive_scripts: Vec::new(),
            post_receive_scripts: Vec::new(),
            scripts_dir: None,
            canonical_url: None,
            short_commit_id_length: 6,
            ticket_parser: TicketReferenceParser::default(),
            incremental_push_tag_prefix: "r".into(),
            progress_delay: progress::DEFAULT_DELAY,
        }
    }
}

impl Settings {
    /// Read settings from `config`, using defaults for everything unset.
    pub fn from_config(config: &File<'_>) -> Result<Self, Error> {
        let mut settings = Self::default();

        settings.pre_receive_scripts = strings(config, "hooks.preReceive");
        settings.post_receive_scripts = strings(config, "hooks.postReceive");
        settings.scripts_dir = string(config, "hooks.scriptsDir").map(PathBuf::from);
        settings.canonical_url = string(config, "web.canonicalUrl");
        if let Some(len) = unsigned(config, "web.shortCommitIdLength")? {
            settings.short_commit_id_length = len.clamp(4, 40) as usize;
        }

        let close = string(config, "tickets.closeOnPushCommitMessageRegex");
        let link = string(config, "tickets.linkOnPushCommitMessageRegex");
        if close.is_some() || link.is_some() {
            let close_key = "tickets.closeOnPushCommitMessageRegex";
            let link_key = "tickets.linkOnPushCommitMessageRegex";
            // Compile each separately so the error names the offending key.
            let close = close.as_deref().unwrap_or(DEFAULT_CLOSE_PATTERN);
            let link = link.as_deref().unwrap_or(DEFAULT_LINK_PATTERN);
            TicketReferenceParser::new(close, DEFAULT_LINK_PATTERN)
                .map_err(|source| Error::Regex { key: close_key, source })?;
            settings.ticket_parser =
                TicketReferenceParser::new(close, link).map_err(|source| Error::Regex { key: link_key, source })?;
        }

        if let Some(prefix) = string(config, "git.defaultIncrementalPushTagPrefix").filter(|p| !p.is_empty()) {
            settings.incremental_push_tag_prefix = prefix;
        }
        if let Some(ms) = unsigned(config, "receive.progressDelay")? {
            settings.progress_delay = Duration::from_millis(ms);
        }
        Ok(settings)
    }
}

pub(crate) fn boolean(config: &File<'_>, key: &'static str) -> Result<Option<bool>, Error> {
    config.boolean(key).transpose().map_err(|err| Error::Boolean {
        key,
        message: err.to_string(),
    })
}

pub(crate) fn string(config: &File<'_>, key: &'static str) -> Option<String> {
    config.string(key).map(|value| value.to_string())
}

/// All values of a multi-valued `key`, with empty values removed.
pub(crate) fn strings(config: &File<'_>, key: &'static str) -> Vec<String> {
    config
        .strings(key)
        .unwrap_or_default()
        .into_iter()
        .map(|value| value.to_string())
        .filter(|value| !value.trim().is_empty())
        .collect()
}

fn unsigned(config: &File<'_>, key: &'static str) -> Result<Option<u64>, Error> {
    let Some(value) = config.integer(key).transpose().map_err(|err| Error::Integer {
        key,
        message: err.to_string(),
    })?
    else {
        return Ok(None);
    };
    u64::try_from(value).map(Some).map_err(|_| Error::Negative { key, value })
}
