mod common;
use common::{instant_launch, tmp_dir, FakeRemote};

use scriptops::errors::ToolErrorKind;
use scriptops::services::execution::{ExecutionEngine, RunStatus};
use scriptops::services::logger::{LogLevel, Logger};
use scriptops::services::remote::RemoteConnectionManager;
use scriptops::services::security::SecurityValidator;
use scriptops::stores::history_store::{ExecutionHistory, ExecutionStatus};
use scriptops::utils::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

fn engine(remote: &FakeRemote) -> (ExecutionEngine, Arc<ExecutionHistory>) {
    let logger = Logger::with_level("test", LogLevel::Error);
    let manager = Arc::new(RemoteConnectionManager::new(
        logger.clone(),
        remote.connector(),
        RetryPolicy::fixed(1, Duration::ZERO),
        Duration::from_secs(5),
    ));
    let history = Arc::new(ExecutionHistory::in_memory(logger.clone()));
    let engine = ExecutionEngine::new(
        logger,
        Arc::new(SecurityValidator::new()),
        manager,
        history.clone(),
        instant_launch(),
    );
    (engine, history)
}

#[tokio::test]
async fn traversal_is_rejected_without_touching_the_remote() {
    let remote = FakeRemote::new();
    let (engine, history) = engine(&remote);

    let result = engine.run_file("../evil.py", &[], None).await;

    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(remote.command_count(), 0);
    assert_eq!(remote.connects(), 0);
    assert!(history.is_empty());
}

#[tokio::test]
async fn non_script_files_are_not_launched() {
    let remote = FakeRemote::new();
    let (engine, history) = engine(&remote);

    let result = engine.run_file("notes.txt", &[], None).await;

    assert!(!result.is_success());
    assert_eq!(remote.command_count(), 0);
    assert!(history.is_empty());
}

#[tokio::test]
async fn detached_launch_confirms_and_records_running() {
    let remote = FakeRemote::new();
    remote.respond("nohup", "4242\n", 0);
    remote.ps_always_running();
    let (engine, history) = engine(&remote);

    let result = engine
        .run_file("bot.py", &["+1 555".to_string()], None)
        .await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.method, Some(1));
    assert_eq!(result.pid, Some(4242));
    assert_eq!(result.log_file.as_deref(), Some("/root/logs/bot.py.log"));
    let commands = remote.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].contains("nohup sh -c"));
    assert!(commands[0].contains("/root/files/bot.py"));
    assert!(commands[0].contains("+1 555"));
    assert!(commands[1].starts_with("ps aux | grep -F -- 'bot.py'"));

    let records = history.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Running);
    assert_eq!(records[0].session_id, "direct");
    assert_eq!(records[0].output_size_bytes, 5);
}

#[tokio::test]
async fn falls_back_to_screen_when_detached_is_not_seen() {
    let remote = FakeRemote::new();
    remote.rule(|command, earlier| {
        if !command.starts_with("ps aux") {
            return None;
        }
        let screen_started = earlier.iter().any(|c| c.contains("screen -dmS"));
        Some(Ok(scriptops::services::remote::CommandOutput {
            output: if screen_started {
                "root 99 SCREEN -dmS S1 python3 /root/files/bot.py\n".to_string()
            } else {
                String::new()
            },
            exit_code: if screen_started { 0 } else { 1 },
        }))
    });
    let (engine, history) = engine(&remote);

    let result = engine.run_file("bot.py", &[], Some("S1")).await;

    assert!(result.is_success());
    assert_eq!(result.method, Some(2));
    assert_eq!(result.session_id.as_deref(), Some("S1"));
    assert_eq!(result.log_file.as_deref(), Some("/root/logs/S1.log"));
    assert_eq!(remote.command_count(), 4);
    assert_eq!(history.all()[0].session_id, "S1");
}

#[tokio::test]
async fn foreground_exit_zero_counts_as_started() {
    let remote = FakeRemote::new();
    remote.ps_never_running();
    let (engine, _) = engine(&remote);

    let result = engine.run_file("job.sh", &[], None).await;

    assert_eq!(result.method, Some(3));
    assert!(remote.commands()[4].starts_with("mkdir -p '/root/logs' && cd '/root/files' && bash"));
}

#[tokio::test]
async fn all_methods_failing_records_one_failure() {
    let remote = FakeRemote::new();
    remote.ps_never_running();
    remote.respond("python3", "Traceback", 1);
    let (engine, history) = engine(&remote);

    let result = engine.run_file("bot.py", &[], None).await;

    assert_eq!(result.status, RunStatus::Error);
    assert!(result.message.contains("All methods exhausted"));
    // three launches, three confirmations
    assert_eq!(remote.command_count(), 6);
    let records = history.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].error.as_deref(), Some("All methods exhausted"));
}

#[tokio::test]
async fn stop_process_reports_leftovers() {
    let remote = FakeRemote::new();
    remote.ps_always_running();
    let (engine, _) = engine(&remote);

    let result = engine.stop_process("bot.py").await.expect("stop");
    assert!(!result.stopped);
    assert!(remote.commands()[0].starts_with("pkill -f -- 'bot.py'"));

    let quiet = FakeRemote::new();
    quiet.ps_never_running();
    let (engine, _) = self::engine(&quiet);
    assert!(engine.stop_all().await.expect("stop all").stopped);
    assert!(quiet.commands()[0].contains("'/root/files/'"));
}

#[tokio::test]
async fn log_tail_validates_key_and_clamps_lines() {
    let remote = FakeRemote::new();
    remote.respond("tail -n", "line\n", 0);
    let (engine, _) = engine(&remote);

    let err = engine.tail_log("../etc/passwd", 10).await.expect_err("bad key");
    assert_eq!(err.kind, ToolErrorKind::Validation);
    assert_eq!(remote.command_count(), 0);

    let out = engine.tail_log("S1", 5_000).await.expect("tail");
    assert_eq!(out, "line\n");
    assert_eq!(remote.commands()[0], "tail -n 200 '/root/logs/S1.log' 2>&1");
}

#[tokio::test]
async fn last_log_is_none_without_logs() {
    let remote = FakeRemote::new();
    let (engine, _) = engine(&remote);
    assert!(engine.last_log(50).await.expect("last log").is_none());

    let remote = FakeRemote::new();
    remote.respond("ls -t", "S1.log\n", 0);
    remote.respond("tail -n", "done\n", 0);
    let (engine, _) = self::engine(&remote);
    let (name, content) = engine.last_log(50).await.expect("last log").expect("some");
    assert_eq!(name, "S1.log");
    assert_eq!(content, "done\n");
}

#[test]
fn unique_temp_dirs() {
    assert_ne!(tmp_dir("a"), tmp_dir("a"));
}
