//! End-to-end tests of [`ReceivePipeline::receive()`] against in-memory repositories.
//!
//! These tests verify:
//! - repository state halting a push before anything is touched
//! - committer verification along the first-parent chain
//! - storage failures in the middle of a batch
//! - delayed progress, the push log and incremental tags
//! - parsing head-info and writing the response for the client

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gix_hash::ObjectId;
use gix_receive_pipeline::policy::AccessRestriction;
use gix_receive_pipeline::progress::ProgressSink;
use gix_receive_pipeline::reflog::MemoryPushLog;
use gix_receive_pipeline::session::MessageLevel;
use gix_receive_pipeline::store::{MemoryRepository, MemoryRepositoryManager, Signature};
use gix_receive_pipeline::{
    write_response, CommandKind, CommandList, Kind, Options, Permissions, PushSession, PushingIdentity, ReasonCode,
    ReceivePipeline, RefUpdateCommand, RepositoryPolicy, Settings,
};
use pretty_assertions::assert_eq;

mod fixture {
    use super::*;

    pub struct Fixture {
        pub manager: Arc<MemoryRepositoryManager>,
        pub repo: MemoryRepository,
        pub alice: Signature,
        pub root: ObjectId,
    }

    impl Fixture {
        /// A repository `r` whose `main` points to a root commit by alice.
        pub fn new(configure: impl FnOnce(&mut RepositoryPolicy)) -> anyhow::Result<Self> {
            let repo = MemoryRepository::new("r");
            let alice = Signature::new("alice", "alice@example.com");
            let root = repo.commit(&[], &alice, "initial import")?;
            repo.set_reference("refs/heads/main", root);

            let mut policy = RepositoryPolicy::new("r");
            configure(&mut policy);
            let manager = Arc::new(MemoryRepositoryManager::new());
            manager.insert(repo.clone(), policy);
            Ok(Self {
                manager,
                repo,
                alice,
                root,
            })
        }

        pub fn pipeline(&self, settings: Settings) -> ReceivePipeline {
            ReceivePipeline::builder()
                .with_repositories(self.manager.clone())
                .with_settings(settings)
                .build()
        }
    }

    pub fn alice() -> PushingIdentity {
        PushingIdentity::new("alice", Permissions::all()).with_email("alice@example.com")
    }

    /// Progress shared with the test after the session took ownership.
    #[derive(Clone, Default)]
    pub struct SharedProgress(pub Arc<Mutex<Vec<String>>>);

    impl SharedProgress {
        pub fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl ProgressSink for SharedProgress {
        fn info(&mut self, message: &[u8]) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(String::from_utf8_lossy(message).into_owned());
        }
    }

    pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }
}

use fixture::{alice, contains, Fixture, SharedProgress};

#[test]
fn mirrors_reject_everything_without_touching_refs() -> anyhow::Result<()> {
    let f = Fixture::new(|policy| policy.is_mirror = true)?;
    let next = f.repo.commit(&[f.root], &f.alice, "next")?;
    let mut commands = vec![
        RefUpdateCommand::update("refs/heads/main", f.root, next),
        RefUpdateCommand::create("refs/heads/topic", next),
    ];
    let mut session = PushSession::new("r", alice());

    let outcome = f.pipeline(Settings::default()).receive(&mut session, &mut commands)?;

    assert!(outcome.halted);
    for cmd in &commands {
        assert_eq!(
            cmd.rejection(),
            Some((ReasonCode::Mirror, "r is a mirror and does not accept pushes"))
        );
    }
    assert_eq!(f.repo.reference("refs/heads/main"), Some(f.root));
    assert_eq!(f.repo.reference("refs/heads/topic"), None);
    assert_eq!(
        session.messages.texts(MessageLevel::Error),
        vec!["r is a mirror and does not accept pushes"]
    );
    Ok(())
}

#[test]
fn mirrors_reject_unknown_objects_as_mirror() -> anyhow::Result<()> {
    let f = Fixture::new(|policy| policy.is_mirror = true)?;
    let unknown = ObjectId::from_hex(b"1111111111111111111111111111111111111111")?;
    let mut commands = vec![RefUpdateCommand::update("refs/heads/main", unknown, f.root)];
    let mut session = PushSession::new("r", alice());

    let outcome = f.pipeline(Settings::default()).receive(&mut session, &mut commands)?;

    assert!(outcome.halted);
    assert_eq!(
        commands[0].rejection(),
        Some((ReasonCode::Mirror, "r is a mirror and does not accept pushes"))
    );
    assert_eq!(
        session.messages.texts(MessageLevel::Error),
        vec!["r is a mirror and does not accept pushes"]
    );
    Ok(())
}

#[test]
fn unknown_objects_are_rejected_on_writable_repositories() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let unknown = ObjectId::from_hex(b"1111111111111111111111111111111111111111")?;
    let mut commands = vec![RefUpdateCommand::update("refs/heads/main", unknown, f.root)];

    let outcome = f
        .pipeline(Settings::default())
        .receive(&mut PushSession::new("r", alice()), &mut commands)?;

    assert!(!outcome.halted);
    assert_eq!(commands[0].rejection().map(|r| r.0), Some(ReasonCode::MissingObjects));
    assert_eq!(f.repo.reference("refs/heads/main"), Some(f.root));
    Ok(())
}

#[test]
fn committer_verification_only_checks_the_first_parent_chain() -> anyhow::Result<()> {
    let f = Fixture::new(|policy| {
        policy.verify_committer = true;
        policy.access_restriction = AccessRestriction::Push;
    })?;
    let bob = Signature::new("bob", "bob@example.com");
    let contribution = f.repo.commit(&[f.root], &bob, "contributed fix")?;
    let merge = f.repo.commit(&[f.root, contribution], &f.alice, "merge contribution")?;
    let foreign = f.repo.commit(&[f.root], &bob, "committed by someone else")?;

    let mut commands = vec![
        RefUpdateCommand::create("refs/heads/merged", merge),
        RefUpdateCommand::create("refs/heads/foreign", foreign),
    ];
    let mut session = PushSession::new("r", alice());
    f.pipeline(Settings::default()).receive(&mut session, &mut commands)?;

    assert!(commands[0].is_ok(), "merged-in commits aren't checked");
    let (code, reason) = commands[1].rejection().expect("rejected");
    assert_eq!(code, ReasonCode::CommitterMismatch);
    assert_eq!(
        reason,
        format!("{foreign} by bob <bob@example.com> was not committed by alice (alice) <alice@example.com>")
    );
    assert_eq!(f.repo.reference("refs/heads/foreign"), None);
    Ok(())
}

#[test]
fn storage_failure_mid_batch_keeps_applied_commands() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    f.repo.fail_batch_after(1, "cannot lock ref 'refs/heads/b'");
    let log = Arc::new(MemoryPushLog::new());
    let pipeline = ReceivePipeline::builder()
        .with_repositories(f.manager.clone())
        .with_push_log(log.clone())
        .build();

    let mut commands: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| RefUpdateCommand::create(format!("refs/heads/{name}"), f.root))
        .collect();
    let mut session = PushSession::new("r", alice());
    pipeline.receive(&mut session, &mut commands)?;

    assert!(commands[0].is_ok());
    for cmd in &commands[1..] {
        assert_eq!(
            cmd.rejection(),
            Some((ReasonCode::LockFailure, "lock error: cannot lock ref 'refs/heads/b'"))
        );
    }
    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].refname, "refs/heads/a");
    assert_eq!(entries[0].kind, CommandKind::Create);
    Ok(())
}

#[test]
fn progress_stays_silent_for_fast_pushes() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let next = f.repo.commit(&[f.root], &f.alice, "next")?;

    let progress = SharedProgress::default();
    let mut session = PushSession::new("r", alice())
        .with_options(Options::parse("report-status side-band-64k"))
        .with_progress(progress.clone());
    let mut commands = vec![RefUpdateCommand::update("refs/heads/main", f.root, next)];
    f.pipeline(Settings::default()).receive(&mut session, &mut commands)?;
    assert!(commands[0].is_ok());
    assert!(progress.lines().is_empty());

    let slow = Settings {
        progress_delay: Duration::ZERO,
        ..Settings::default()
    };
    let mut commands = vec![RefUpdateCommand::update("refs/heads/main", next, f.root)];
    f.pipeline(slow).receive(&mut session, &mut commands)?;
    assert_eq!(commands[0].kind(), CommandKind::UpdateNonFastForward);
    assert_eq!(progress.lines(), vec!["updating refs/heads/main (1/1)\n"]);
    Ok(())
}

#[test]
fn quiet_clients_get_no_progress() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let progress = SharedProgress::default();
    let mut session = PushSession::new("r", alice())
        .with_options(Options::parse("side-band-64k quiet"))
        .with_progress(progress.clone());
    let settings = Settings {
        progress_delay: Duration::ZERO,
        ..Settings::default()
    };
    let mut commands = vec![RefUpdateCommand::create("refs/heads/quiet", f.root)];
    f.pipeline(settings).receive(&mut session, &mut commands)?;
    assert!(commands[0].is_ok());
    assert!(progress.lines().is_empty());
    Ok(())
}

#[test]
fn head_info_to_report_status() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let next = f.repo.commit(&[f.root], &f.alice, "next")?;
    let head_info = format!(
        "{root} {next} refs/heads/main\0report-status side-band-64k\n\
         {next} {zero} refs/heads/missing\n\
         push-option=ci.skip\n",
        root = f.root,
        zero = ObjectId::null(gix_hash::Kind::Sha1),
    );
    let (list, options) = CommandList::parse_from_text(&head_info)?;
    assert_eq!(options.push_options, vec!["ci.skip"]);

    let mut commands = list.into_vec();
    let mut session = PushSession::new("r", alice()).with_options(options);
    f.pipeline(Settings::default()).receive(&mut session, &mut commands)?;

    let mut out = Vec::new();
    write_response(&mut out, &session, &commands)?;
    assert!(contains(&out, b"unpack ok\n"));
    assert!(contains(&out, b"ok refs/heads/main\n"));
    assert!(contains(&out, b"ng refs/heads/missing stale info\n"));
    assert!(out.ends_with(b"0000"));
    assert_eq!(f.repo.reference("refs/heads/main"), Some(next));
    Ok(())
}

#[test]
fn pushes_are_logged_and_tagged() -> anyhow::Result<()> {
    let f = Fixture::new(|policy| policy.use_incremental_push_tags = true)?;
    let log = Arc::new(MemoryPushLog::new());
    let pipeline = ReceivePipeline::builder()
        .with_repositories(f.manager.clone())
        .with_push_log(log.clone())
        .build();

    let mut tip = f.root;
    let mut tags = Vec::new();
    for message in ["first", "second"] {
        let next = f.repo.commit(&[tip], &f.alice, message)?;
        let mut commands = vec![RefUpdateCommand::update("refs/heads/main", tip, next)];
        let outcome = pipeline.receive(&mut PushSession::new("r", alice()), &mut commands)?;
        tags.extend(outcome.tags);
        tip = next;
    }

    assert_eq!(tags, vec!["refs/tags/main/r1", "refs/tags/main/r2"]);
    let entries = log.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.user == "alice" && e.kind == CommandKind::Update));
    assert_eq!(entries[1].new, Some(tip));
    assert_eq!(f.repo.reflog("refs/heads/main").len(), 2);
    Ok(())
}

#[test]
fn unknown_repositories_are_an_error() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let mut commands = vec![RefUpdateCommand::create("refs/heads/main", f.root)];
    let err = f
        .pipeline(Settings::default())
        .receive(&mut PushSession::new("absent", alice()), &mut commands)
        .unwrap_err();
    assert_eq!(err.kind(), Kind::NotFound);
    assert!(commands[0].is_pending());
    Ok(())
}

#[test]
fn contributors_cannot_rewind() -> anyhow::Result<()> {
    let f = Fixture::new(|_| {})?;
    let next = f.repo.commit(&[f.root], &f.alice, "next")?;
    f.repo.set_reference("refs/heads/main", next);
    let other = f.repo.commit(&[f.root], &f.alice, "rewritten")?;

    let bob = PushingIdentity::new("bob", Permissions::contributor()).with_email("bob@example.com");
    let mut commands = vec![RefUpdateCommand::update("refs/heads/main", next, other)];
    f.pipeline(Settings::default())
        .receive(&mut PushSession::new("r", bob), &mut commands)?;

    assert_eq!(commands[0].rejection().map(|r| r.0), Some(ReasonCode::NonFastForward));
    assert_eq!(f.repo.reference("refs/heads/main"), Some(next));
    Ok(())
}
