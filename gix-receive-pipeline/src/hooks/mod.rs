//! Hook execution around ref updates.
//!
//! Each stage first runs the in-process extensions of a [`HookRegistry`] in registration order,
//! then the configured scripts through a [`ScriptRuntime`]. Nothing that happens here aborts
//! the push: failures are logged and counted in the [`StageReport`].
//!
//! # Feature Gates
//!
//! - `hooks-external`: Enables [`ProcessScriptRuntime`] to run scripts as subprocesses via gix-command

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::policy::RepositoryPolicy;
use crate::protocol::{ReasonCode, RefUpdateCommand};
use crate::session::PushSession;
use crate::store::Repository;

pub mod env;
#[cfg(feature = "hooks-external")]
pub mod external;
pub mod script;

#[cfg(feature = "hooks-external")]
pub use external::ProcessScriptRuntime;
pub use script::{
    resolve_scripts, ScriptContext, ScriptError, ScriptOutcome, ScriptRejection, ScriptRuntime,
    SCRIPT_CONTEXT_VERSION,
};

/// The point in the pipeline at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before refs are updated, with all still-pending commands.
    PreReceive,
    /// After refs were updated.
    PostReceive,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreReceive => "pre-receive",
            Stage::PostReceive => "post-receive",
        }
    }
}

/// What hooks get to see and change.
pub struct HookContext<'a> {
    pub session: &'a mut PushSession,
    pub repository: &'a dyn Repository,
    pub policy: &'a RepositoryPolicy,
    pub commands: &'a mut [RefUpdateCommand],
}

/// The error returned by [`ReceiveHook`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error("hook '{hook}' panicked")]
    Panicked { hook: String },
}

/// An extension running in-process before and after refs are updated.
///
/// Pre-receive hooks may reject pending commands through the context.
pub trait ReceiveHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_pre_receive(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_post_receive(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Extensions registered at start-up, run in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ReceiveHook>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.hooks.iter().map(|h| h.name())).finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl ReceiveHook + 'static) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn register_shared(&mut self, hook: Arc<dyn ReceiveHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ReceiveHook>> {
        self.hooks.iter()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// What happened while running one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Names of extensions that ran, including failed ones.
    pub extensions_run: Vec<String>,
    pub extension_failures: Vec<String>,
    /// Names of scripts that ran, including failed ones.
    pub scripts_run: Vec<String>,
    pub script_failures: Vec<String>,
    /// The script that stopped the remaining ones of the stage.
    pub aborted_by: Option<String>,
}

/// Runs extensions and scripts for a stage.
pub struct HookPipeline<'a> {
    registry: &'a HookRegistry,
    runtime: Option<&'a dyn ScriptRuntime>,
    base_url: Option<&'a str>,
    global_pre: &'a [String],
    global_post: &'a [String],
}

impl<'a> HookPipeline<'a> {
    pub fn new(registry: &'a HookRegistry, runtime: Option<&'a dyn ScriptRuntime>) -> Self {
        Self {
            registry,
            runtime,
            base_url: None,
            global_pre: &[],
            global_post: &[],
        }
    }

    /// Scripts configured for all repositories, run before the repository's own.
    pub fn with_global_scripts(mut self, pre: &'a [String], post: &'a [String]) -> Self {
        self.global_pre = pre;
        self.global_post = post;
        self
    }

    pub fn with_base_url(mut self, url: Option<&'a str>) -> Self {
        self.base_url = url;
        self
    }

    pub fn run(&self, stage: Stage, ctx: &mut HookContext<'_>) -> StageReport {
        let mut report = StageReport::default();
        self.run_extensions(stage, ctx, &mut report);
        self.run_scripts(stage, ctx, &mut report);
        report
    }

    fn run_extensions(&self, stage: Stage, ctx: &mut HookContext<'_>, report: &mut StageReport) {
        for hook in self.registry.iter() {
            let name = hook.name().to_owned();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match stage {
                Stage::PreReceive => hook.on_pre_receive(ctx),
                Stage::PostReceive => hook.on_post_receive(ctx),
            }))
            .unwrap_or_else(|_| Err(HookError::Panicked { hook: name.clone() }));

            if let Err(err) = outcome {
                tracing::error!(
                    repository = ctx.policy.name.as_str(),
                    hook = name.as_str(),
                    stage = stage.as_str(),
                    %err,
                    "extension failed"
                );
                report.extension_failures.push(name.clone());
            }
            report.extensions_run.push(name);
        }
    }

    fn run_scripts(&self, stage: Stage, ctx: &mut HookContext<'_>, report: &mut StageReport) {
        let (global, own) = match stage {
            Stage::PreReceive => (self.global_pre, ctx.policy.pre_receive_scripts.as_slice()),
            Stage::PostReceive => (self.global_post, ctx.policy.post_receive_scripts.as_slice()),
        };
        let scripts = resolve_scripts(global, own);
        if scripts.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime else {
            tracing::warn!(
                repository = ctx.policy.name.as_str(),
                stage = stage.as_str(),
                count = scripts.len(),
                "no script runtime configured, skipping scripts"
            );
            return;
        };

        for script in scripts {
            let context = ScriptContext::new(stage, self.base_url, ctx);
            report.scripts_run.push(script.clone());
            match runtime.run(&script, &context) {
                Ok(outcome) => {
                    let stop = outcome.is_stop();
                    apply_outcome(&script, outcome, ctx);
                    if stop {
                        tracing::info!(
                            repository = ctx.policy.name.as_str(),
                            script = script.as_str(),
                            stage = stage.as_str(),
                            "script stopped the remaining scripts"
                        );
                        report.aborted_by = Some(script);
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(
                        repository = ctx.policy.name.as_str(),
                        script = script.as_str(),
                        stage = stage.as_str(),
                        %err,
                        "script failed"
                    );
                    report.script_failures.push(script);
                }
            }
        }
    }
}

fn apply_outcome(script: &str, outcome: ScriptOutcome, ctx: &mut HookContext<'_>) {
    for message in outcome.messages {
        ctx.session.messages.info(message);
    }
    for rejection in outcome.rejections {
        let identity = &ctx.session.identity;
        match ctx.commands.iter_mut().find(|cmd| cmd.name() == rejection.refname) {
            Some(cmd) if cmd.is_pending() => {
                crate::policy::reject(cmd, ReasonCode::Hook, &rejection.reason, identity, &ctx.policy.name);
            }
            _ => tracing::warn!(
                script,
                refname = rejection.refname.as_str(),
                "ignoring rejection of a ref that is not pending"
            ),
        }
    }
}
