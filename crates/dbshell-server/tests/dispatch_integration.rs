//! Integration tests for the request/response dispatch pipeline.
//!
//! These tests exercise `Server` + driver channel + a real driver end to end:
//! requests are posted from a Tokio task, served on the driver thread and
//! routed back as notifications.

use std::sync::Arc;
use std::time::Duration;

use dbshell_core::protocol::messages::{ConnectRequest, Tagged};
use dbshell_core::{ConnectionSettings, ConnectionType, EventKind, Request, Response};
use dbshell_server::application::notifications::Notification;
use dbshell_server::application::server::Server;
use dbshell_server::infrastructure::channel::spawn_driver;
use dbshell_server::infrastructure::driver::{MemoryDriver, ScriptedDriver};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::assert_ok;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn settings(command_line: &str) -> ConnectionSettings {
    let mut settings = ConnectionSettings::new("it", ConnectionType::Redis, "localhost");
    settings.command_line = command_line.to_string();
    settings
}

fn memory_server(driver: MemoryDriver, is_master: bool) -> Arc<Server> {
    let handle = spawn_driver(Arc::new(driver)).expect("spawn driver");
    let server = Server::new(handle, is_master);
    server.start();
    server
}

/// Receives notifications until `done` matches one, returning all of them.
async fn collect_until(
    rx: &mut UnboundedReceiver<Notification>,
    done: impl Fn(&Notification) -> bool,
) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let next = tokio::time::timeout(WAIT, rx.recv()).await;
        let notification = assert_ok!(next, "timed out after {seen:?}").expect("hub dropped");
        let last = done(&notification);
        seen.push(notification);
        if last {
            return seen;
        }
    }
}

fn is_finished_connect(n: &Notification) -> bool {
    matches!(n, Notification::FinishedConnect(_))
}

fn is_finished_execute(n: &Notification) -> bool {
    matches!(n, Notification::FinishedExecute(_))
}

async fn connect(server: &Server, rx: &mut UnboundedReceiver<Notification>) {
    server.connect();
    collect_until(rx, is_finished_connect).await;
}

async fn run(
    server: &Server,
    rx: &mut UnboundedReceiver<Notification>,
    command: &str,
) -> Vec<Notification> {
    server.execute(command);
    collect_until(rx, is_finished_execute).await
}

fn children(seen: &[Notification]) -> Vec<String> {
    seen.iter()
        .filter_map(|n| match n {
            Notification::ChildAdded(item) => Some(item.text.clone()),
            _ => None,
        })
        .collect()
}

// ── Connect ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_emits_progress_started_finished_then_config_args_progress() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();

    // Act
    server.connect();
    let mut seen = collect_until(&mut rx, is_finished_connect).await;
    seen.extend(collect_until(&mut rx, |n| matches!(n, Notification::Progress(0))).await);

    // Assert
    assert_eq!(seen.len(), 4, "unexpected notifications {seen:?}");
    assert_eq!(seen[0], Notification::Progress(0));
    assert_eq!(seen[1], Notification::StartedConnect(ConnectRequest));
    assert!(matches!(&seen[2], Notification::FinishedConnect(r) if r.error.is_none()));
    assert_eq!(seen[3], Notification::Progress(0));
    assert!(server.is_connected());
}

#[tokio::test]
async fn test_connect_applies_command_line_arguments() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("-n 5")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    // Act
    run(&server, &mut rx, "SET answer 42").await;
    server.fetch_server_info();
    let seen = collect_until(&mut rx, |n| matches!(n, Notification::FinishedServerInfo(_))).await;

    // Assert
    let Some(Notification::FinishedServerInfo(r)) = seen.last() else {
        panic!("expected server info");
    };
    assert_eq!(r.info.get("selected_db").map(String::as_str), Some("5"));
    assert_eq!(r.info.get("db5").map(String::as_str), Some("keys=1"));
}

#[tokio::test]
async fn test_failed_connect_does_not_process_config_args() {
    // Arrange
    let driver = Arc::new(ScriptedDriver::new(settings("")));
    driver.script(
        EventKind::Connect,
        vec![Response::Connect(dbshell_core::protocol::messages::ConnectResponse {
            request: ConnectRequest,
            error: Some(dbshell_core::ErrorValue::error("connection refused")),
        })],
    );
    let server = Server::new(spawn_driver(driver.clone()).expect("spawn"), true);
    server.start();
    let mut rx = server.notifications().subscribe();

    // Act
    connect(&server, &mut rx).await;
    run(&server, &mut rx, "PING").await;

    // Assert
    let kinds: Vec<_> = driver.received().iter().map(Request::kind).collect();
    assert_eq!(kinds, vec![EventKind::Connect, EventKind::Execute]);
}

// ── Execute ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_execute_on_master_reports_result_tree() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;
    run(&server, &mut rx, "SET user:1 alice").await;
    run(&server, &mut rx, "SET user:2 bob").await;

    // Act
    let seen = run(&server, &mut rx, "KEYS user:*").await;

    // Assert
    let root = seen
        .iter()
        .position(|n| matches!(n, Notification::RootCreated(r) if r.root.text == "KEYS user:*"))
        .expect("root created");
    let completed = seen
        .iter()
        .position(|n| matches!(n, Notification::RootCompleted(_)))
        .expect("root completed");
    assert!(root < completed);
    assert_eq!(children(&seen), vec!["user:1", "user:2"]);
    assert!(seen
        .iter()
        .any(|n| matches!(n, Notification::ItemUpdated(u) if u.text == "KEYS user:* (2 results)")));
    assert!(
        matches!(seen.last(), Some(Notification::FinishedExecute(r)) if r.error.is_none()
            && r.request.command == "KEYS user:*")
    );
}

#[tokio::test]
async fn test_master_sees_result_tree_in_driver_order() {
    for _ in 0..20 {
        // Arrange
        let server = memory_server(MemoryDriver::new(settings("")), true);
        let mut rx = server.notifications().subscribe();

        // Act: no wait between the two requests
        server.connect();
        server.execute("PING");
        let seen = collect_until(&mut rx, is_finished_execute).await;

        // Assert
        let at = |pred: fn(&Notification) -> bool| {
            seen.iter()
                .position(pred)
                .unwrap_or_else(|| panic!("missing notification in {seen:?}"))
        };
        let connected = at(is_finished_connect);
        let root = at(|n| matches!(n, Notification::RootCreated(_)));
        let child = at(|n| matches!(n, Notification::ChildAdded(item) if item.text == "PONG"));
        let updated = at(|n| matches!(n, Notification::ItemUpdated(_)));
        let completed = at(|n| matches!(n, Notification::RootCompleted(_)));
        let finished = at(is_finished_execute);
        assert!(
            connected < root
                && root < child
                && child < updated
                && updated < completed
                && completed < finished,
            "out of order: {seen:?}"
        );
        server.close();
    }
}

#[tokio::test]
async fn test_execute_on_non_master_does_not_relay_driver_tree_events() {
    let server = memory_server(MemoryDriver::new(settings("")), false);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    let seen = run(&server, &mut rx, "PING").await;

    assert!(children(&seen).is_empty());
    assert!(seen.iter().any(|n| matches!(n, Notification::RootCreated(_))));
}

#[tokio::test]
async fn test_failed_execute_still_emits_finished_with_error() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    // Act
    let seen = run(&server, &mut rx, "FROB").await;

    // Assert
    let Some(Notification::FinishedExecute(r)) = seen.last() else {
        panic!("expected finished execute");
    };
    let error = r.error.as_ref().expect("error value");
    assert!(error.is_error());
    assert_eq!(error.message(), "unknown command 'FROB'");
}

#[tokio::test]
async fn test_execute_before_connect_reports_not_connected() {
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();

    let seen = run(&server, &mut rx, "PING").await;

    let Some(Notification::FinishedExecute(r)) = seen.last() else {
        panic!("expected finished execute");
    };
    assert_eq!(r.error.as_ref().map(|e| e.message()), Some("not connected"));
}

#[tokio::test]
async fn test_responses_arrive_in_request_order() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;
    let commands: Vec<String> = (0..8).map(|i| format!("ECHO {i}")).collect();

    // Act
    for command in &commands {
        server.execute(command.clone());
    }
    let mut finished = Vec::new();
    while finished.len() < commands.len() {
        if let Some(Notification::FinishedExecute(r)) =
            collect_until(&mut rx, is_finished_execute).await.pop()
        {
            finished.push(r.request.command);
        }
    }

    // Assert
    assert_eq!(finished, commands);
}

#[tokio::test]
async fn test_mode_changes_are_notified() {
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    let entered = run(&server, &mut rx, "SUBSCRIBE alerts").await;
    let left = run(&server, &mut rx, "UNSUBSCRIBE alerts").await;

    assert!(entered.contains(&Notification::EnteredMode(dbshell_core::CommandMode::PubSub)));
    assert!(left.contains(&Notification::LeftMode(dbshell_core::CommandMode::PubSub)));
}

// ── Interrupt ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_current_event_interrupts_long_command() {
    // Arrange
    let driver = MemoryDriver::new(settings("")).with_step_delay(Duration::from_millis(100));
    let server = memory_server(driver, true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;
    for i in 0..10 {
        run(&server, &mut rx, &format!("SET key:{i} {i}")).await;
    }

    // Act
    server.execute("KEYS *");
    collect_until(&mut rx, |n| matches!(n, Notification::RootCreated(_))).await;
    server.stop_current_event();
    let seen = collect_until(&mut rx, is_finished_execute).await;

    // Assert
    let Some(Notification::FinishedExecute(r)) = seen.last() else {
        panic!("expected finished execute");
    };
    assert_eq!(r.error.as_ref().map(|e| e.message()), Some("interrupted"));
    assert!(children(&seen).len() < 10);
}

#[tokio::test]
async fn test_stop_current_event_reaches_driver() {
    let driver = Arc::new(ScriptedDriver::new(settings("")));
    let server = Server::new(spawn_driver(driver.clone()).expect("spawn"), true);

    server.stop_current_event();

    assert_eq!(driver.interrupt_count(), 1);
}

// ── Other operations ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backup_and_export_round_trip_through_server() {
    // Arrange
    let path = std::env::temp_dir().join(format!("dbshell_it_{}.toml", Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;
    run(&server, &mut rx, "SET session abc").await;

    // Act
    server.backup_to_path(path_str.clone());
    let backup = collect_until(&mut rx, |n| matches!(n, Notification::FinishedBackup(_))).await;
    run(&server, &mut rx, "FLUSHDB").await;
    server.export_from_path(path_str.clone());
    let export = collect_until(&mut rx, |n| matches!(n, Notification::FinishedExport(_))).await;
    let get = run(&server, &mut rx, "GET session").await;

    // Assert
    assert!(backup.contains(&Notification::StartedBackup(
        dbshell_core::protocol::messages::BackupRequest { path: path_str.clone() }
    )));
    assert!(matches!(export.last(), Some(Notification::FinishedExport(r)) if r.error.is_none()));
    assert_eq!(children(&get), vec!["abc"]);

    // Cleanup
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_load_databases_and_content() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;
    run(&server, &mut rx, "SET b 2").await;
    run(&server, &mut rx, "SET a 1").await;

    // Act
    server.load_databases();
    let seen = collect_until(&mut rx, |n| matches!(n, Notification::FinishedLoadDatabases(_))).await;
    let Some(Notification::FinishedLoadDatabases(r)) = seen.last() else {
        panic!("expected databases");
    };
    server.load_database_content(r.databases[0].clone());
    let content = collect_until(&mut rx, |n| {
        matches!(n, Notification::FinishedLoadDatabaseContent(_))
    })
    .await;

    // Assert
    assert_eq!(r.databases.len(), 16);
    assert_eq!(r.databases[0].key_count, 2);
    let Some(Notification::FinishedLoadDatabaseContent(c)) = content.last() else {
        panic!("expected content");
    };
    assert_eq!(c.keys, vec!["a", "b"]);
}

#[tokio::test]
async fn test_property_change_and_history() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    // Act
    server.change_property(dbshell_core::domain::PropertyType::new("timeout", "60"));
    let changed =
        collect_until(&mut rx, |n| matches!(n, Notification::FinishedChangeProperty(_))).await;
    server.fetch_server_property();
    let properties =
        collect_until(&mut rx, |n| matches!(n, Notification::FinishedServerProperty(_))).await;
    server.fetch_server_info();
    collect_until(&mut rx, |n| matches!(n, Notification::FinishedServerInfo(_))).await;
    server.request_history_info();
    let history =
        collect_until(&mut rx, |n| matches!(n, Notification::FinishedServerHistory(_))).await;

    // Assert
    assert!(matches!(changed.last(), Some(Notification::FinishedChangeProperty(r)) if r.is_changed));
    let Some(Notification::FinishedServerProperty(p)) = properties.last() else {
        panic!("expected properties");
    };
    assert!(p
        .properties
        .iter()
        .any(|prop| prop.key == "timeout" && prop.value == "60"));
    assert!(matches!(history.last(), Some(Notification::FinishedServerHistory(h)) if h.entries.len() == 1));
}

#[tokio::test]
async fn test_shutdown_emits_started_but_no_finished() {
    // Arrange
    let server = memory_server(MemoryDriver::new(settings("")), true);
    let mut rx = server.notifications().subscribe();
    connect(&server, &mut rx).await;

    // Act
    server.shut_down();
    let seen = run(&server, &mut rx, "PING").await;

    // Assert
    assert!(seen.iter().any(|n| matches!(n, Notification::StartedShutdown(_))));
    assert!(!server.is_connected());
    let Some(Notification::FinishedExecute(r)) = seen.last() else {
        panic!("expected finished execute");
    };
    assert!(r.error.is_some());
}
