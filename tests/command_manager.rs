mod common;
use common::{test_settings, tmp_dir, FakeRemote, ENV_LOCK};

use scriptops::app::App;
use scriptops::managers::commands::Inbound;
use scriptops::services::logger::{LogLevel, Logger};
use scriptops::services::settings::Settings;
use scriptops::stores::session_store::SessionStatus;
use std::time::Duration;

fn app_with(remote: &FakeRemote, tweak: impl FnOnce(&mut Settings)) -> App {
    let mut settings = test_settings(tmp_dir("scriptops-commands"));
    tweak(&mut settings);
    App::build(
        Logger::with_level("test", LogLevel::Error),
        &settings,
        remote.connector(),
    )
    .expect("app")
}

async fn say(app: &App, operator: &str, text: &str) -> String {
    app.commands.handle(&Inbound::from_text(operator, text)).await
}

#[tokio::test]
async fn rate_limited_operator_gets_error_without_side_effects() {
    let remote = FakeRemote::new();
    let app = app_with(&remote, |s| {
        s.rate_max_requests = 2;
        s.rate_window = Duration::from_secs(60);
    });

    assert!(say(&app, "7", "ping").await.starts_with("[SERVER"));
    assert!(say(&app, "7", "ping").await.starts_with("[SERVER"));
    let denied = say(&app, "7", "run bot.py").await;

    assert!(denied.starts_with("[ERROR] Too many requests"));
    assert_eq!(remote.command_count(), 2);
    assert!(app.history.is_empty());
    // other operators have their own window
    assert!(say(&app, "8", "help").await.starts_with("[COMMANDS]"));
}

#[tokio::test]
async fn operators_outside_the_allow_list_are_refused() {
    let remote = FakeRemote::new();
    let app = app_with(&remote, |s| s.admin_ids = vec!["1".to_string()]);

    assert_eq!(say(&app, "2", "files").await, "[ERROR] Unauthorized");
    assert_eq!(remote.command_count(), 0);
    assert!(say(&app, "1", "files").await.starts_with("[FILES]"));
}

#[tokio::test]
async fn long_replies_are_truncated() {
    let remote = FakeRemote::new();
    remote.respond("cat", &"x".repeat(5_000), 0);
    let app = app_with(&remote, |_| {});

    let reply = say(&app, "1", "check big.txt").await;

    assert!(reply.starts_with("[BIG.TXT]\nxxx"));
    let total = "[BIG.TXT]\n".len() + 5_000;
    assert!(reply.ends_with(&format!("\n... truncated, total {} chars", total)));
    assert_eq!(reply.lines().next().map(str::len), Some(9));
}

#[tokio::test]
async fn dangerous_shell_commands_never_reach_the_host() {
    let remote = FakeRemote::new();
    let app = app_with(&remote, |_| {});

    let reply = say(&app, "1", "sh rm -rf / --no-preserve-root").await;

    assert!(reply.starts_with("[ERROR]"));
    assert_eq!(remote.command_count(), 0);

    remote.respond("pip list", "requests 2.31", 0);
    let ok = say(&app, "1", "trpy pip list").await;
    assert_eq!(ok, "[OUTPUT]\nrequests 2.31");
}

#[tokio::test]
async fn chat_session_flow_uses_free_text_for_pending_session() {
    let remote = FakeRemote::new();
    remote.respond("nohup", "900\n", 0);
    remote.ps_always_running();
    let app = app_with(&remote, |_| {});

    let created = say(&app, "1", "session script.py phone_number,code").await;
    assert!(created.starts_with("[SESSION]"));
    assert!(created.contains("Step 1/2"));
    let sessions = app.sessions.list_all();
    let id = sessions.keys().next().expect("one session").clone();

    let step_two = say(&app, "1", "+15550001").await;
    assert!(step_two.contains("Step 2/2"));
    let done = say(&app, "1", "12345").await;
    assert!(done.starts_with("[SUCCESS] All parameters collected"));
    assert!(done.contains(&format!("exec {}", id)));

    // nothing pending any more
    assert!(say(&app, "1", "hello").await.starts_with("[ERROR] Unknown command"));

    let ran = say(&app, "1", &format!("exec {}", id)).await;
    assert!(ran.starts_with("[SUCCESS] script.py started via method 1"));
    assert!(ran.contains("PID: 900"));
    assert_eq!(
        app.sessions.get(&id).map(|s| s.status),
        Some(SessionStatus::Executed)
    );
    assert!(say(&app, "1", "stats").await.contains("Total: 1"));
}

#[tokio::test]
async fn cleanup_with_out_of_range_days_keeps_every_session() {
    let remote = FakeRemote::new();
    let app = app_with(&remote, |_| {});
    let created = say(&app, "1", "session script.py code").await;
    assert!(created.starts_with("[SESSION]"));

    for text in ["cleanup -1", "cleanup 0", "cleanup 100000000"] {
        let reply = say(&app, "1", text).await;
        assert!(reply.starts_with("[ERROR] days must be"), "{}: {}", text, reply);
    }
    assert_eq!(app.sessions.list_all().len(), 1);

    let kept = say(&app, "1", "cleanup 36500").await;
    assert_eq!(kept, "[SUCCESS] Removed 0 session(s) older than 36500 day(s)");
    assert_eq!(app.sessions.list_all().len(), 1);
}

#[tokio::test]
async fn exec_of_unknown_session_is_reported() {
    let remote = FakeRemote::new();
    let app = app_with(&remote, |_| {});
    let reply = say(&app, "1", "exec NOPE").await;
    assert!(reply.starts_with("[ERROR] Session NOPE not found"));
}

#[tokio::test]
async fn settings_come_from_the_environment() {
    let _guard = ENV_LOCK.lock().await;
    let dir = tmp_dir("scriptops-env");
    std::env::set_var("SCRIPTOPS_SSH_HOST", "10.0.0.5");
    std::env::set_var("SCRIPTOPS_SSH_PASSWORD", "pw");
    std::env::set_var("SCRIPTOPS_ADMIN_IDS", "11, 12");
    std::env::set_var("SCRIPTOPS_SSH_BACKOFF", "exponential");
    std::env::set_var("SCRIPTOPS_STATE_DIR", &dir);

    let settings = Settings::from_env().expect("settings");

    assert_eq!(settings.ssh.host, "10.0.0.5");
    assert_eq!(settings.ssh.port, 22);
    assert_eq!(settings.ssh.username, "root");
    assert_eq!(settings.admin_ids, vec!["11".to_string(), "12".to_string()]);
    assert_eq!(settings.retry.max_attempts, 3);
    assert_eq!(settings.retry.delay_after(2), Duration::from_secs(2));
    assert_eq!(settings.sessions_path, dir.join("sessions.json"));
    assert!(!format!("{:?}", settings.ssh).contains("pw"));

    assert_eq!(settings.session_retention_days, 7);

    for raw in ["18446744073709551615", "9223372036854775808", "100000000", "0"] {
        std::env::set_var("SCRIPTOPS_SESSION_RETENTION_DAYS", raw);
        let settings = Settings::from_env().expect("settings");
        assert_eq!(settings.session_retention_days, 7, "for {}", raw);
    }
    std::env::set_var("SCRIPTOPS_SESSION_RETENTION_DAYS", "30");
    assert_eq!(Settings::from_env().expect("settings").session_retention_days, 30);

    std::env::remove_var("SCRIPTOPS_SSH_PASSWORD");
    assert!(Settings::from_env().is_err());

    for key in [
        "SCRIPTOPS_SSH_HOST",
        "SCRIPTOPS_ADMIN_IDS",
        "SCRIPTOPS_SSH_BACKOFF",
        "SCRIPTOPS_STATE_DIR",
        "SCRIPTOPS_SESSION_RETENTION_DAYS",
    ] {
        std::env::remove_var(key);
    }
}
