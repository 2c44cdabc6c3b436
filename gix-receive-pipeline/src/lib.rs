/*!
A push-processing pipeline for gitoxide servers.

It sits between a receive-pack front end and the ref store. Given the ref update commands
of a push, already-received objects and an authenticated pusher, it

- classifies updates as fast-forward or not, and rejects what repository policy and the
  pusher's permissions don't allow,
- optionally verifies that the pushed mainline commits were committed by the pusher,
- runs in-process extensions and external scripts before and after refs are updated,
- applies the remaining updates to the ref store in one batch,
- records the push, tags pushed branches and links commits to the tickets they mention.

Results are kept on each [`RefUpdateCommand`], and [`write_response()`] turns them into
sideband messages and a report-status for the client.

Design principles
- Zero I/O in constructors and configuration APIs.
- Typestate to prevent building a pipeline without repository access.
- Side effects after refs were updated never fail the push, they are logged instead.
*/

#![forbid(unsafe_code)]

pub mod apply;
pub mod config;
pub mod hooks;
pub mod identity;
pub mod policy;
pub mod progress;
pub mod protocol;
pub mod reflog;
pub mod session;
pub mod store;
pub mod tag;
pub mod tickets;

pub use apply::BatchRefApplier;
pub use config::Settings;
pub use hooks::{HookPipeline, HookRegistry, ReceiveHook, ScriptRuntime, Stage, StageReport};
pub use identity::{Permissions, PushingIdentity};
pub use policy::{CommitterVerifier, RefUpdatePolicy, RepositoryPolicy, Verdict};
pub use protocol::{CommandKind, CommandList, CommandResult, Options, ReasonCode, RefUpdateCommand};
pub use reflog::{PushLog, RefLogRecorder};
pub use session::{ClientMessages, PushSession};
pub use store::{Repository, RepositoryManager, StoreError};
pub use tag::IncrementalTagger;
pub use tickets::{TicketLinker, TicketNumber, TicketService};

use std::io::{self, Write};
use std::sync::Arc;

/// Typestates representing builder progress.
pub mod state {
    use std::sync::Arc;

    use crate::store::RepositoryManager;

    /// Initial builder state without repository access.
    pub struct Start;
    /// Ready state after repositories were provided.
    pub struct Ready {
        pub(crate) repositories: Arc<dyn RepositoryManager>,
    }
}

/// Stable high-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Io,
    Protocol,
    Validation,
    NotFound,
    Resource,
    Other,
}

/// Error type for operations provided by this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed commands or options sent by the client.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Commands or values that are well-formed but can't be valid.
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Fast classification helper returning a stable error kind.
    pub fn kind(&self) -> Kind {
        match self {
            Error::Protocol(_) => Kind::Protocol,
            Error::Validation(_) | Error::Config(_) => Kind::Validation,
            Error::Store(err) => match err {
                StoreError::ObjectNotFound { .. } | StoreError::RepositoryNotFound { .. } => Kind::NotFound,
                StoreError::Lock { .. } => Kind::Resource,
                StoreError::Io(_) => Kind::Io,
                StoreError::RefExists { .. } | StoreError::Other(_) => Kind::Other,
            },
            Error::Io(_) => Kind::Io,
        }
    }
}

#[derive(Default)]
struct Config {
    settings: Settings,
    hooks: HookRegistry,
    script_runtime: Option<Arc<dyn ScriptRuntime>>,
    ticket_service: Option<Arc<dyn TicketService>>,
    push_log: Option<Arc<dyn PushLog>>,
}

/// Builder for constructing a [`ReceivePipeline`] with typestate guarantees.
pub struct ReceivePipelineBuilder<S = state::Start> {
    cfg: Config,
    state: S,
}

impl Default for ReceivePipelineBuilder<state::Start> {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivePipelineBuilder<state::Start> {
    /// Create a new builder in the Start state.
    pub fn new() -> Self {
        Self {
            cfg: Config::default(),
            state: state::Start,
        }
    }

    /// Provide access to repositories and move to the Ready state.
    pub fn with_repositories(self, repositories: Arc<dyn RepositoryManager>) -> ReceivePipelineBuilder<state::Ready> {
        ReceivePipelineBuilder {
            cfg: self.cfg,
            state: state::Ready { repositories },
        }
    }
}

impl ReceivePipelineBuilder<state::Ready> {
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.cfg.settings = settings;
        self
    }

    /// Register an extension, run after the ones registered before.
    pub fn with_hook(mut self, hook: impl ReceiveHook + 'static) -> Self {
        self.cfg.hooks.register(hook);
        self
    }

    /// Use `hooks` instead of everything registered so far.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.cfg.hooks = hooks;
        self
    }

    /// Run scripts with `runtime`.
    ///
    /// Without one, scripts run as subprocesses from `hooks.scriptsDir` if the
    /// `hooks-external` feature is enabled.
    pub fn with_script_runtime(mut self, runtime: Arc<dyn ScriptRuntime>) -> Self {
        self.cfg.script_runtime = Some(runtime);
        self
    }

    pub fn with_ticket_service(mut self, service: Arc<dyn TicketService>) -> Self {
        self.cfg.ticket_service = Some(service);
        self
    }

    pub fn with_push_log(mut self, log: Arc<dyn PushLog>) -> Self {
        self.cfg.push_log = Some(log);
        self
    }

    /// Finalize the builder. This does no I/O.
    pub fn build(self) -> ReceivePipeline {
        let mut cfg = self.cfg;
        if cfg.script_runtime.is_none() {
            cfg.script_runtime = default_script_runtime(&cfg.settings);
        }
        ReceivePipeline {
            repositories: self.state.repositories,
            cfg,
        }
    }
}

#[cfg(feature = "hooks-external")]
fn default_script_runtime(settings: &Settings) -> Option<Arc<dyn ScriptRuntime>> {
    let dir = settings.scripts_dir.clone()?;
    Some(Arc::new(hooks::ProcessScriptRuntime::new(dir)))
}

#[cfg(not(feature = "hooks-external"))]
fn default_script_runtime(_settings: &Settings) -> Option<Arc<dyn ScriptRuntime>> {
    None
}

/// What happened to a push besides the results on its commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Repository state or permissions refused the push as a whole and no stage after the policy ran.
    pub halted: bool,
    pub pre_receive: StageReport,
    pub post_receive: StageReport,
    /// Names of the incremental push tags created.
    pub tags: Vec<String>,
    pub tickets_updated: Vec<TicketNumber>,
}

/// Runs pushes through policy, hooks, ref application and their side effects.
///
/// One instance serves any number of pushes, also concurrently.
pub struct ReceivePipeline {
    repositories: Arc<dyn RepositoryManager>,
    cfg: Config,
}

impl ReceivePipeline {
    pub fn builder() -> ReceivePipelineBuilder<state::Start> {
        ReceivePipelineBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.cfg.settings
    }

    pub fn repositories(&self) -> &dyn RepositoryManager {
        &*self.repositories
    }

    /// Process the `commands` of a push to `session.repository`.
    ///
    /// Every command ends up applied or rejected, with messages for the client collected in
    /// `session.messages`. An `Err` is only returned if the repository can't be opened.
    pub fn receive(&self, session: &mut PushSession, commands: &mut [RefUpdateCommand]) -> Result<PushOutcome, Error> {
        let repo = self.repositories.open(&session.repository)?;
        let repo = &*repo;
        let policy = self.repositories.repository_policy(&session.repository)?;
        let identity = session.identity.clone();
        let settings = &self.cfg.settings;
        let mut outcome = PushOutcome::default();

        let gate = RefUpdatePolicy::new(&policy, &identity);
        if gate.admit(commands) == Verdict::Halt {
            if let Some((_, reason)) = commands.first().and_then(RefUpdateCommand::rejection) {
                session.messages.error(reason);
            }
            outcome.halted = true;
            return Ok(outcome);
        }
        policy::ff::classify(repo, &identity, commands);
        gate.check_commands(commands);
        CommitterVerifier::new(&policy, &identity).verify(repo, commands);

        let hooks = HookPipeline::new(&self.cfg.hooks, self.cfg.script_runtime.as_deref())
            .with_global_scripts(&settings.pre_receive_scripts, &settings.post_receive_scripts)
            .with_base_url(settings.canonical_url.as_deref());
        if commands.iter().any(RefUpdateCommand::is_pending) {
            outcome.pre_receive = hooks.run(
                Stage::PreReceive,
                &mut hooks::HookContext {
                    session: &mut *session,
                    repository: repo,
                    policy: &policy,
                    commands: &mut *commands,
                },
            );
        }

        let progress: Option<&mut dyn progress::ProgressSink> = match session.progress.as_deref_mut() {
            Some(sink) if session.options.wants_progress() => Some(sink as &mut dyn progress::ProgressSink),
            _ => None,
        };
        let applied = BatchRefApplier::new(&identity, settings.progress_delay).apply(repo, commands, progress);
        if applied == 0 {
            tracing::debug!(repository = repo.name(), user = identity.username.as_str(), "no ref was updated");
            return Ok(outcome);
        }

        let recorder = RefLogRecorder::new(
            self.cfg.push_log.as_deref(),
            self.repositories.commit_cache(),
            repo.name(),
            &identity,
        );
        let tagger = IncrementalTagger::new(repo, &policy, &identity, &settings.incremental_push_tag_prefix);
        let mut linker = self.cfg.ticket_service.as_deref().map(|service| {
            TicketLinker::new(
                service,
                &settings.ticket_parser,
                repo,
                &identity,
                settings.short_commit_id_length,
            )
            .with_pushed_commands(commands)
        });
        for cmd in commands.iter().filter(|cmd| cmd.is_ok()) {
            recorder.record(cmd);
            outcome.tags.extend(tagger.tag(cmd));
            if let Some(linker) = linker.as_mut() {
                linker.process(cmd, &mut session.messages);
            }
        }
        if let Some(linker) = linker {
            outcome.tickets_updated = linker.finish(&mut session.messages);
        }

        outcome.post_receive = hooks.run(
            Stage::PostReceive,
            &mut hooks::HookContext {
                session,
                repository: repo,
                policy: &policy,
                commands,
            },
        );
        tracing::info!(
            repository = repo.name(),
            applied,
            tags = outcome.tags.len(),
            tickets = outcome.tickets_updated.len(),
            "push processed"
        );
        Ok(outcome)
    }
}

/// Write the messages and report-status of a processed push to `out`, as the client negotiated.
///
/// Messages are only sent if a sideband was negotiated, and are sent even with `quiet`.
pub fn write_response<W: Write>(out: &mut W, session: &PushSession, commands: &[RefUpdateCommand]) -> io::Result<()> {
    if session.options.has("side-band") || session.options.has("side-band-64k") {
        protocol::write_messages(out, &session.messages)?;
    }
    if session.options.wants_report_status() {
        protocol::write_report_status(out, commands)?;
    }
    Ok(())
}
