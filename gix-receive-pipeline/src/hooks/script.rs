//! The contract between the pipeline and repository scripts.
use serde::{Deserialize, Serialize};

use crate::hooks::{HookContext, Stage};
use crate::protocol::{CommandResult, RefUpdateCommand};

/// Bumped whenever [`ScriptContext`] changes incompatibly.
pub const SCRIPT_CONTEXT_VERSION: u32 = 1;

/// Everything a script gets to see about a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptContext {
    pub version: u32,
    pub stage: String,
    /// The canonical URL of the server, if configured.
    pub base_url: Option<String>,
    pub repository: String,
    pub user: ScriptUser,
    pub push_options: Vec<String>,
    pub commands: Vec<ScriptCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptUser {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// A command as seen by scripts, with ids in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCommand {
    #[serde(rename = "ref")]
    pub refname: String,
    pub old: String,
    pub new: String,
    pub kind: String,
    /// One of `pending`, `ok` or `rejected`.
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScriptCommand {
    fn from_command(cmd: &RefUpdateCommand) -> Self {
        let (result, reason) = match cmd.result() {
            CommandResult::NotAttempted => ("pending", None),
            CommandResult::Ok => ("ok", None),
            CommandResult::Rejected { reason, .. } => ("rejected", Some(reason.clone())),
        };
        Self {
            refname: cmd.name().to_owned(),
            old: cmd.old().to_string(),
            new: cmd.new_id().to_string(),
            kind: cmd.kind().as_str().to_owned(),
            result: result.to_owned(),
            reason,
        }
    }
}

impl ScriptContext {
    pub fn new(stage: Stage, base_url: Option<&str>, ctx: &HookContext<'_>) -> Self {
        let identity = &ctx.session.identity;
        Self {
            version: SCRIPT_CONTEXT_VERSION,
            stage: stage.as_str().to_owned(),
            base_url: base_url.map(ToOwned::to_owned),
            repository: ctx.policy.name.clone(),
            user: ScriptUser {
                username: identity.username.clone(),
                display_name: identity.display_name().to_owned(),
                email: identity.email.clone(),
            },
            push_options: ctx.session.options.push_options.clone(),
            commands: ctx.commands.iter().map(ScriptCommand::from_command).collect(),
        }
    }
}

/// A script's request to reject a single ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRejection {
    #[serde(rename = "ref")]
    pub refname: String,
    pub reason: String,
}

/// What a script answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// `Some(false)` stops the remaining scripts of the stage. `None` if the script didn't say.
    pub result: Option<bool>,
    /// Lines to show to the pusher.
    pub messages: Vec<String>,
    pub rejections: Vec<ScriptRejection>,
}

impl ScriptOutcome {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn stop() -> Self {
        Self {
            result: Some(false),
            ..Self::default()
        }
    }

    pub fn is_stop(&self) -> bool {
        self.result == Some(false)
    }
}

/// The error returned by [`ScriptRuntime::run()`].
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script '{script}' not found")]
    NotFound { script: String },
    #[error("script '{script}' could not be started")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },
    #[error("script '{script}' failed with {}: {stderr}", .code.map_or_else(|| "a signal".to_owned(), |c| format!("exit code {c}")))]
    Exit {
        script: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("script '{script}' answered with an invalid reply: {message}")]
    Protocol { script: String, message: String },
}

/// Runs repository scripts by name.
///
/// Scripts run one after another in the order they are configured. A script answering
/// with an explicit `false` stops the remaining scripts of the same stage, but only
/// explicit rejections change command results.
pub trait ScriptRuntime: Send + Sync {
    fn run(&self, script: &str, context: &ScriptContext) -> Result<ScriptOutcome, ScriptError>;
}

/// Concatenate globally configured scripts with the repository's own, keeping the first
/// occurrence of each name.
pub fn resolve_scripts(global: &[String], repository: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(global.len() + repository.len());
    for name in global.iter().chain(repository) {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|existing| existing == name) {
            out.push(name.to_owned());
        }
    }
    out
}
