//! Scripts executed as subprocesses via gix-command.
//!
//! Only available with the "hooks-external" feature.
//!
//! A script receives the [`ScriptContext`] as JSON on stdin and may answer on stdout with
//! either a bare boolean or an object like
//! `{"continue": false, "messages": ["..."], "rejections": [{"ref": "refs/heads/main", "reason": "..."}]}`.
//! No output at all means the script had nothing to say. Its stderr is relayed to the pusher.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};

use serde::Deserialize;

use crate::hooks::env::ScriptEnvironment;
use crate::hooks::script::{ScriptContext, ScriptError, ScriptOutcome, ScriptRejection, ScriptRuntime};

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Flag(bool),
    Full {
        #[serde(rename = "continue", default)]
        result: Option<bool>,
        #[serde(default)]
        messages: Vec<String>,
        #[serde(default)]
        rejections: Vec<ScriptRejection>,
    },
}

/// Runs scripts found in a directory as subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessScriptRuntime {
    scripts_dir: PathBuf,
}

impl ProcessScriptRuntime {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    fn parse_reply(script: &str, stdout: &[u8]) -> Result<ScriptOutcome, ScriptError> {
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(ScriptOutcome::default());
        }
        let reply: Reply = serde_json::from_slice(stdout).map_err(|err| ScriptError::Protocol {
            script: script.to_owned(),
            message: err.to_string(),
        })?;
        Ok(match reply {
            Reply::Flag(flag) => ScriptOutcome {
                result: Some(flag),
                ..ScriptOutcome::default()
            },
            Reply::Full {
                result,
                messages,
                rejections,
            } => ScriptOutcome {
                result,
                messages,
                rejections,
            },
        })
    }
}

impl ScriptRuntime for ProcessScriptRuntime {
    fn run(&self, script: &str, context: &ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        let path = self.scripts_dir.join(script);
        if !path.is_file() {
            return Err(ScriptError::NotFound {
                script: script.to_owned(),
            });
        }
        let input = serde_json::to_vec(context).map_err(|err| ScriptError::Protocol {
            script: script.to_owned(),
            message: err.to_string(),
        })?;
        let spawn_error = |source: std::io::Error| ScriptError::Spawn {
            script: script.to_owned(),
            source,
        };

        let mut prepare = gix_command::prepare(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in ScriptEnvironment::from_context(context).build() {
            prepare = prepare.env(key, value);
        }
        let mut child = prepare.spawn().map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            // Scripts may exit without reading their input.
            match stdin.write_all(&input) {
                Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => {
                    drop(stdin);
                    abandon(&mut child);
                    return Err(spawn_error(err));
                }
                _ => {}
            }
        }
        let output = child.wait_with_output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ScriptError::Exit {
                script: script.to_owned(),
                code: output.status.code(),
                stderr: stderr.trim().to_owned(),
            });
        }

        let mut outcome = Self::parse_reply(script, &output.stdout)?;
        outcome
            .messages
            .extend(stderr.lines().filter(|l| !l.trim().is_empty()).map(ToOwned::to_owned));
        tracing::debug!(script, result = ?outcome.result, "script finished");
        Ok(outcome)
    }
}

/// Stop `child` and reap it, so no zombie is left behind.
fn abandon(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(%err, "script exited before it could be stopped");
    }
    if let Err(err) = child.wait() {
        tracing::warn!(%err, "could not collect exit status of script");
    }
}
