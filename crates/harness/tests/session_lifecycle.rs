//! Backing service lifecycle against real child processes
#![cfg(unix)]

use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use rawparity_common::config::SessionConfig;
use rawparity_harness::error::HarnessError;
use rawparity_harness::session::{find_free_port, SESSION_LOG};
use rawparity_harness::SessionManager;
use tempfile::TempDir;

/// Session config rooted in `dir` with a pre-built artifact
fn session_config(dir: &Path, serve: &[&str], port: u16) -> SessionConfig {
    std::fs::create_dir_all(dir.join("dist")).unwrap();
    SessionConfig {
        working_dir: dir.to_path_buf(),
        host: "127.0.0.1".to_string(),
        port,
        build_command: vec!["false".to_string()],
        serve_command: serve.iter().map(|s| s.to_string()).collect(),
        startup_timeout_secs: 1,
        poll_interval_ms: 50,
        shutdown_grace_ms: 200,
        ..Default::default()
    }
}

fn is_alive(pid: i32) -> bool {
    if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
        return false;
    }
    // Reparented zombies still answer kill(0)
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map(|stat| !stat.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z'))
        .unwrap_or(false)
}

fn read_pid(path: &Path) -> i32 {
    let start = Instant::now();
    loop {
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        if contents.ends_with('\n') {
            return contents.trim().parse().unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(5), "pid file never written");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// A serve command that does not exist fails fast
#[tokio::test]
async fn invalid_serve_command_fails_immediately() {
    let tmp = TempDir::new().unwrap();
    let config = session_config(tmp.path(), &["/nonexistent/rawparity-preview"], 0);

    let start = Instant::now();
    let err = SessionManager::new(config).start_session().await.unwrap_err();

    assert!(matches!(err, HarnessError::SessionStartFailure(_)), "{err}");
    assert!(start.elapsed() < Duration::from_secs(1));
}

/// Scenario C: a service that never listens times out and is torn down
#[tokio::test]
async fn never_listening_service_times_out_and_is_killed() {
    let tmp = TempDir::new().unwrap();
    let pid_file = tmp.path().join("service.pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
    let port = find_free_port().unwrap();
    let config = session_config(tmp.path(), &["sh", "-c", &script], port);

    let start = Instant::now();
    let err = SessionManager::new(config)
        .with_log_dir(tmp.path())
        .start_session()
        .await
        .unwrap_err();

    match &err {
        HarnessError::SessionStartTimeout { url, .. } => {
            assert_eq!(url, &format!("http://127.0.0.1:{port}"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(start.elapsed() < Duration::from_secs(5));

    let pid = read_pid(&pid_file);
    assert!(!is_alive(pid), "service {pid} survived a failed start");
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    assert!(tmp.path().join(SESSION_LOG).exists());
}

/// A service that exits on its own is reported without waiting out the timeout
#[tokio::test]
async fn early_exit_is_a_start_failure() {
    let tmp = TempDir::new().unwrap();
    let mut config = session_config(tmp.path(), &["sh", "-c", "exit 3"], 0);
    config.startup_timeout_secs = 10;

    let start = Instant::now();
    let err = SessionManager::new(config).start_session().await.unwrap_err();

    match err {
        HarnessError::SessionStartFailure(reason) => assert!(reason.contains("exit"), "{reason}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// A missing artifact runs the build; a failing build stops the start
#[tokio::test]
async fn failing_build_prevents_spawn() {
    let tmp = TempDir::new().unwrap();
    let marker = tmp.path().join("spawned");
    let serve = format!("touch {}", marker.display());
    let config = session_config(tmp.path(), &["sh", "-c", &serve], 0);
    std::fs::remove_dir(tmp.path().join("dist")).unwrap();

    let err = SessionManager::new(config).start_session().await.unwrap_err();

    assert!(matches!(err, HarnessError::SessionStartFailure(_)), "{err}");
    assert!(!marker.exists());
}

/// A reachable service is stopped together with its children
#[tokio::test]
async fn running_session_stops_cleanly() {
    if std::process::Command::new("python3").arg("--version").output().is_err() {
        eprintln!("python3 not available, skipping");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let port = find_free_port().unwrap();
    let mut config = session_config(
        tmp.path(),
        &["python3", "-m", "http.server", "{port}", "--bind", "127.0.0.1"],
        port,
    );
    config.startup_timeout_secs = 15;
    let manager = SessionManager::new(config);

    let mut session = manager.start_session().await.unwrap();
    assert_eq!(session.port(), port);
    assert!(TcpStream::connect(("127.0.0.1", port)).is_ok());

    let pid = session.pid() as i32;
    manager.stop_session(&mut session).await;
    manager.stop_session(&mut session).await;

    assert!(session.is_stopped());
    assert!(!is_alive(pid));
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}
