//! Extensions and scripts around ref updates.

use std::sync::{Arc, Mutex, PoisonError};

use gix_hash::ObjectId;
use gix_receive_pipeline::hooks::{HookContext, HookError, ScriptContext, ScriptError, ScriptOutcome, ScriptRejection};
use gix_receive_pipeline::store::{MemoryRepository, MemoryRepositoryManager, Signature};
use gix_receive_pipeline::{
    Permissions, PushSession, PushingIdentity, ReasonCode, ReceiveHook, ReceivePipeline, RefUpdateCommand,
    RepositoryPolicy, ScriptRuntime, Settings,
};
use pretty_assertions::assert_eq;

fn setup(policy: RepositoryPolicy) -> anyhow::Result<(Arc<MemoryRepositoryManager>, MemoryRepository, ObjectId)> {
    let repo = MemoryRepository::new("r");
    let root = repo.commit(&[], &Signature::new("alice", "alice@example.com"), "initial import")?;
    let manager = Arc::new(MemoryRepositoryManager::new());
    manager.insert(repo.clone(), policy);
    Ok((manager, repo, root))
}

fn session() -> PushSession {
    PushSession::new("r", PushingIdentity::new("alice", Permissions::all()))
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

/// Answers with a fixed outcome per script and records what it saw.
#[derive(Default)]
struct Recording {
    outcomes: Vec<(&'static str, ScriptOutcome)>,
    seen: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl Recording {
    fn calls(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(script, ..)| script.clone())
            .collect()
    }
}

impl ScriptRuntime for Recording {
    fn run(&self, script: &str, context: &ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).push((
            script.to_owned(),
            context.stage.clone(),
            context.commands.iter().map(|c| c.result.clone()).collect(),
        ));
        Ok(self
            .outcomes
            .iter()
            .find(|(name, _)| *name == script)
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_default())
    }
}

#[test]
fn a_script_answering_false_stops_the_remaining_ones() -> anyhow::Result<()> {
    let (manager, repo, root) = setup(RepositoryPolicy::new("r"))?;
    let runtime = Arc::new(Recording {
        outcomes: vec![("second", ScriptOutcome::stop())],
        ..Recording::default()
    });
    let pipeline = ReceivePipeline::builder()
        .with_repositories(manager)
        .with_settings(Settings {
            pre_receive_scripts: names(&["first", "second", "third"]),
            ..Settings::default()
        })
        .with_script_runtime(runtime.clone())
        .build();

    let mut commands = vec![RefUpdateCommand::create("refs/heads/main", root)];
    let outcome = pipeline.receive(&mut session(), &mut commands)?;

    assert_eq!(runtime.calls(), names(&["first", "second"]));
    assert_eq!(outcome.pre_receive.aborted_by.as_deref(), Some("second"));
    assert!(commands[0].is_ok(), "stopping scripts doesn't reject anything");
    assert_eq!(repo.reference("refs/heads/main"), Some(root));
    Ok(())
}

#[test]
fn scripts_see_results_and_may_reject_refs() -> anyhow::Result<()> {
    let mut policy = RepositoryPolicy::new("r");
    policy.pre_receive_scripts = names(&["guard"]);
    policy.post_receive_scripts = names(&["announce"]);
    let (manager, repo, root) = setup(policy)?;
    let runtime = Arc::new(Recording {
        outcomes: vec![(
            "guard",
            ScriptOutcome {
                result: Some(true),
                messages: vec!["guard: release branches are frozen".into()],
                rejections: vec![ScriptRejection {
                    refname: "refs/heads/release".into(),
                    reason: "release branches are frozen".into(),
                }],
            },
        )],
        ..Recording::default()
    });
    let pipeline = ReceivePipeline::builder()
        .with_repositories(manager)
        .with_script_runtime(runtime.clone())
        .build();

    let mut commands = vec![
        RefUpdateCommand::create("refs/heads/main", root),
        RefUpdateCommand::create("refs/heads/release", root),
    ];
    let mut session = session();
    pipeline.receive(&mut session, &mut commands)?;

    assert!(commands[0].is_ok());
    assert_eq!(
        commands[1].rejection(),
        Some((ReasonCode::Hook, "release branches are frozen"))
    );
    assert_eq!(repo.reference("refs/heads/release"), None);
    assert_eq!(session.messages.len(), 1);

    let seen = runtime.seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert_eq!(
        seen,
        vec![
            ("guard".to_owned(), "pre-receive".to_owned(), names(&["pending", "pending"])),
            ("announce".to_owned(), "post-receive".to_owned(), names(&["ok", "rejected"])),
        ]
    );
    Ok(())
}

struct ProtectMain;

impl ReceiveHook for ProtectMain {
    fn name(&self) -> &str {
        "protect-main"
    }

    fn on_pre_receive(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        for cmd in ctx.commands.iter_mut().filter(|cmd| cmd.name() == "refs/heads/main") {
            cmd.reject(ReasonCode::Hook, "main is protected");
        }
        Ok(())
    }
}

/// Counts applied commands after the push.
#[derive(Clone, Default)]
struct CountApplied(Arc<Mutex<usize>>);

impl ReceiveHook for CountApplied {
    fn name(&self) -> &str {
        "count-applied"
    }

    fn on_post_receive(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) += ctx.commands.iter().filter(|c| c.is_ok()).count();
        ctx.session.messages.info("thanks for pushing");
        Ok(())
    }
}

#[test]
fn extensions_run_before_and_after_refs_are_updated() -> anyhow::Result<()> {
    let (manager, repo, root) = setup(RepositoryPolicy::new("r"))?;
    let counter = CountApplied::default();
    let pipeline = ReceivePipeline::builder()
        .with_repositories(manager)
        .with_hook(ProtectMain)
        .with_hook(counter.clone())
        .build();

    let mut commands = vec![
        RefUpdateCommand::create("refs/heads/main", root),
        RefUpdateCommand::create("refs/heads/topic", root),
    ];
    let mut session = session();
    let outcome = pipeline.receive(&mut session, &mut commands)?;

    assert_eq!(commands[0].rejection(), Some((ReasonCode::Hook, "main is protected")));
    assert_eq!(repo.reference("refs/heads/topic"), Some(root));
    assert_eq!(*counter.0.lock().unwrap_or_else(PoisonError::into_inner), 1);
    assert_eq!(outcome.post_receive.extensions_run, names(&["protect-main", "count-applied"]));
    assert_eq!(session.messages.len(), 1);
    Ok(())
}

#[cfg(all(unix, feature = "hooks-external"))]
mod subprocess {
    use std::os::unix::fs::PermissionsExt;

    use super::{names, setup, session};
    use gix_receive_pipeline::{ReasonCode, ReceivePipeline, RefUpdateCommand, RepositoryPolicy, Settings};
    use pretty_assertions::assert_eq;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> anyhow::Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, body)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[test]
    fn scripts_run_from_the_configured_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_script(
            dir.path(),
            "no-release",
            "#!/bin/sh\n\
             cat > /dev/null\n\
             echo \"checked by $PUSH_USER\" >&2\n\
             echo '{\"rejections\": [{\"ref\": \"refs/heads/release\", \"reason\": \"not today\"}]}'\n",
        )?;

        let mut policy = RepositoryPolicy::new("r");
        policy.pre_receive_scripts = names(&["no-release"]);
        let (manager, repo, root) = setup(policy)?;
        let pipeline = ReceivePipeline::builder()
            .with_repositories(manager)
            .with_settings(Settings {
                scripts_dir: Some(dir.path().to_owned()),
                ..Settings::default()
            })
            .build();

        let mut commands = vec![
            RefUpdateCommand::create("refs/heads/main", root),
            RefUpdateCommand::create("refs/heads/release", root),
        ];
        let mut session = session();
        let outcome = pipeline.receive(&mut session, &mut commands)?;

        assert!(outcome.pre_receive.script_failures.is_empty(), "{outcome:?}");
        assert!(commands[0].is_ok());
        assert_eq!(commands[1].rejection(), Some((ReasonCode::Hook, "not today")));
        assert_eq!(repo.reference("refs/heads/main"), Some(root));
        assert_eq!(
            session.messages.texts(gix_receive_pipeline::session::MessageLevel::Info),
            vec!["checked by alice"]
        );
        Ok(())
    }

    #[test]
    fn failing_scripts_do_not_fail_the_push() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_script(dir.path(), "broken", "#!/bin/sh\necho 'oops' >&2\nexit 3\n")?;

        let mut policy = RepositoryPolicy::new("r");
        policy.pre_receive_scripts = names(&["broken", "missing"]);
        let (manager, _repo, root) = setup(policy)?;
        let pipeline = ReceivePipeline::builder()
            .with_repositories(manager)
            .with_settings(Settings {
                scripts_dir: Some(dir.path().to_owned()),
                ..Settings::default()
            })
            .build();

        let mut commands = vec![RefUpdateCommand::create("refs/heads/main", root)];
        let outcome = pipeline.receive(&mut session(), &mut commands)?;

        assert_eq!(outcome.pre_receive.script_failures, names(&["broken", "missing"]));
        assert!(commands[0].is_ok());
        Ok(())
    }
}
