//! Per-push state: who pushes where, what they negotiated and what we tell them.

use crate::identity::PushingIdentity;
use crate::progress::ProgressSink;
use crate::protocol::Options;

/// Severity of a message for the pusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Error,
}

/// A single line of text for the pusher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Messages collected during a push, sent to the client once processing is done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMessages {
    messages: Vec<ClientMessage>,
}

impl ClientMessages {
    pub fn info(&mut self, text: impl Into<String>) {
        self.messages.push(ClientMessage {
            level: MessageLevel::Info,
            text: text.into(),
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.messages.push(ClientMessage {
            level: MessageLevel::Error,
            text: text.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientMessage> {
        self.messages.iter()
    }

    /// Texts of all messages of the given `level`, in order.
    pub fn texts(&self, level: MessageLevel) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.level == level)
            .map(|m| m.text.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Everything known about one push besides its commands.
pub struct PushSession {
    /// Name of the repository pushed to.
    pub repository: String,
    pub identity: PushingIdentity,
    pub options: Options,
    pub messages: ClientMessages,
    /// Where progress goes if the client asked for it.
    pub progress: Option<Box<dyn ProgressSink + Send>>,
}

impl std::fmt::Debug for PushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSession")
            .field("repository", &self.repository)
            .field("identity", &self.identity)
            .field("options", &self.options)
            .field("messages", &self.messages)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl PushSession {
    pub fn new(repository: impl Into<String>, identity: PushingIdentity) -> Self {
        Self {
            repository: repository.into(),
            identity,
            options: Options::default(),
            messages: ClientMessages::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}
