mod common;
use common::{instant_launch, tmp_dir, FakeRemote};

use scriptops::errors::ToolErrorKind;
use scriptops::services::execution::ExecutionEngine;
use scriptops::services::interactive::InteractiveSessionEngine;
use scriptops::services::logger::{LogLevel, Logger};
use scriptops::services::remote::RemoteConnectionManager;
use scriptops::services::security::SecurityValidator;
use scriptops::stores::history_store::{ExecutionHistory, ExecutionStatus};
use scriptops::stores::session_store::{SessionStatus, SessionStore};
use scriptops::utils::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    interactive: InteractiveSessionEngine,
    store: Arc<SessionStore>,
    history: Arc<ExecutionHistory>,
    dir: std::path::PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn harness(remote: &FakeRemote) -> Harness {
    let logger = Logger::with_level("test", LogLevel::Error);
    let dir = tmp_dir("scriptops-interactive");
    let security = Arc::new(SecurityValidator::new());
    let manager = Arc::new(RemoteConnectionManager::new(
        logger.clone(),
        remote.connector(),
        RetryPolicy::fixed(1, Duration::ZERO),
        Duration::from_secs(5),
    ));
    let store = Arc::new(SessionStore::new(logger.clone(), dir.join("sessions.json")));
    let history = Arc::new(ExecutionHistory::new(logger.clone(), dir.join("history.json")));
    let engine = Arc::new(ExecutionEngine::new(
        logger.clone(),
        security.clone(),
        manager,
        history.clone(),
        instant_launch(),
    ));
    Harness {
        interactive: InteractiveSessionEngine::new(logger, security, store.clone(), engine),
        store,
        history,
        dir,
    }
}

#[tokio::test]
async fn phone_and_code_flow_ends_executed() {
    let remote = FakeRemote::new();
    remote.respond("nohup", "777\n", 0);
    remote.ps_always_running();
    let h = harness(&remote);

    let id = h
        .interactive
        .create_with_requirements(
            "script.py",
            vec!["phone_number".to_string(), "code".to_string()],
        )
        .expect("create");
    let prompt = h
        .interactive
        .requirement_prompt(&id)
        .expect("prompt")
        .expect("first step");
    assert!(prompt.contains("Step 1/2"));
    assert!(prompt.contains(&id));

    let first = h.interactive.submit_response(&id, "+15550001").expect("submit");
    assert_eq!(first.status, SessionStatus::AwaitingInput);
    assert!(first.message.is_none());
    let second = h.interactive.submit_response(&id, "12345").expect("submit");
    assert_eq!(second.status, SessionStatus::Complete);
    assert!(second.message.is_some());
    assert!(h.interactive.requirement_prompt(&id).expect("prompt").is_none());

    let result = h.interactive.execute_with_session(&id).await.expect("execute");
    assert!(result.is_success());

    let session = h.store.get(&id).expect("session");
    assert_eq!(session.status, SessionStatus::Executed);
    assert_eq!(session.execution_count, 1);
    assert!(session.last_execution.is_some());
    assert_eq!(
        session.requirements,
        vec!["phone_number".to_string(), "code".to_string()]
    );

    let records = h.history.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "script.py");
    assert_eq!(records[0].status, ExecutionStatus::Running);
    assert_eq!(records[0].session_id, id);

    let launch = &remote.commands()[0];
    assert!(launch.contains("+15550001"));
    assert!(launch.contains("12345"));
    assert!(launch.find("+15550001") < launch.find("12345"));
}

#[tokio::test]
async fn executing_an_incomplete_session_changes_nothing() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    let id = h
        .interactive
        .create_with_requirements("script.py", vec!["token".to_string()])
        .expect("create");

    let err = h
        .interactive
        .execute_with_session(&id)
        .await
        .expect_err("not ready");

    assert_eq!(err.kind, ToolErrorKind::SessionNotReady);
    assert_eq!(remote.command_count(), 0);
    let session = h.store.get(&id).expect("session");
    assert_eq!(session.status, SessionStatus::AwaitingInput);
    assert_eq!(session.execution_count, 0);
}

#[tokio::test]
async fn submitting_after_completion_is_a_no_op() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    let id = h
        .interactive
        .create_with_requirements("script.py", vec!["email".to_string()])
        .expect("create");
    h.interactive.submit_response(&id, "a@b.c").expect("submit");

    let again = h.interactive.submit_response(&id, "x@y.z").expect("submit");

    assert_eq!(again.status, SessionStatus::Complete);
    assert_eq!(again.message.as_deref(), Some("All parameters already submitted"));
    let session = h.store.get(&id).expect("session");
    assert_eq!(session.responses.len(), 1);
    assert_eq!(session.responses.get("email"), Some("a@b.c"));
}

#[tokio::test]
async fn empty_requirements_are_ready_immediately() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    let id = h
        .interactive
        .create_with_requirements("script.py", Vec::new())
        .expect("create");
    assert_eq!(h.store.get(&id).map(|s| s.status), Some(SessionStatus::Complete));
}

#[tokio::test]
async fn duplicate_requirement_kinds_are_rejected() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    let err = h
        .interactive
        .create_with_requirements("script.py", vec!["code".to_string(), "code".to_string()])
        .expect_err("duplicate");
    assert_eq!(err.kind, ToolErrorKind::Validation);
    assert!(h.store.list_all().is_empty());
}

#[tokio::test]
async fn bad_filenames_never_create_sessions() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    assert!(h
        .interactive
        .create_with_requirements("../x.py", vec!["code".to_string()])
        .is_err());
    assert!(h.store.list_all().is_empty());
}

#[tokio::test]
async fn files_without_an_interpreter_never_collect_input() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    for name in ["notes.txt", "cfg.json"] {
        let err = h
            .interactive
            .create_with_requirements(name, vec!["phone_number".to_string(), "code".to_string()])
            .expect_err("not a script");
        assert_eq!(err.kind, ToolErrorKind::Validation);
        assert!(err.message.contains("not an executable script"));
    }
    assert!(h.store.list_all().is_empty());
    assert_eq!(remote.command_count(), 0);
}

#[tokio::test]
async fn repeated_launch_failures_fail_the_session() {
    let remote = FakeRemote::new();
    remote.ps_never_running();
    remote.respond("python3", "", 1);
    let h = harness(&remote);
    let id = h
        .interactive
        .create_with_requirements("script.py", Vec::new())
        .expect("create");

    for expected in 1..=3u32 {
        let result = h.interactive.execute_with_session(&id).await;
        if expected < 3 {
            assert!(!result.expect("run result").is_success());
            let session = h.store.get(&id).expect("session");
            assert_eq!(session.error_count, expected);
            assert_eq!(session.status, SessionStatus::Complete);
        } else {
            assert!(result.is_ok());
        }
    }

    let session = h.store.get(&id).expect("session");
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.error_count, 3);
    let err = h
        .interactive
        .execute_with_session(&id)
        .await
        .expect_err("failed sessions cannot run");
    assert_eq!(err.kind, ToolErrorKind::SessionNotReady);
    assert_eq!(h.history.stats().failed, 3);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let remote = FakeRemote::new();
    let h = harness(&remote);
    let err = h
        .interactive
        .submit_response("NOPE00000000", "x")
        .expect_err("missing");
    assert_eq!(err.kind, ToolErrorKind::SessionNotFound);
}
