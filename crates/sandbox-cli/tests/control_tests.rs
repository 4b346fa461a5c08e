//! `ps`, `kill`, and `attach` against a scripted mock daemon.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

use common::mock_daemon::MockDaemon;
use common::mock_daemon::MockResponse;
use common::mock_daemon::end_event;
use common::mock_daemon::output_event;

fn sandbox_cmd(daemon: &MockDaemon) -> Command {
    let mut cmd = Command::cargo_bin("sandbox").unwrap();
    cmd.env("SANDBOX_SOCKET", daemon.socket_path());
    cmd.env_remove("SANDBOX_LOG");
    cmd
}

#[test]
fn test_ps_renders_process_table() {
    let daemon = MockDaemon::start();
    daemon.set_response(
        "list",
        MockResponse::Success(json!({
            "processes": [
                { "pid": 12, "cmd": "sleep 600", "cwd": "/srv", "tag": "worker" },
                { "pid": 40, "cmd": "python3 app.py" },
            ]
        })),
    );

    sandbox_cmd(&daemon)
        .args(["ps", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sleep 600"))
        .stdout(predicate::str::contains("worker"))
        .stdout(predicate::str::contains("python3 app.py"));
}

#[test]
fn test_ps_with_no_processes() {
    let daemon = MockDaemon::start();
    daemon.set_response("list", MockResponse::Success(json!({ "processes": [] })));

    sandbox_cmd(&daemon)
        .args(["ps", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No processes running."));
}

#[test]
fn test_kill_sends_sigkill() {
    let daemon = MockDaemon::start();
    daemon.set_response("send_signal", MockResponse::Success(json!({})));

    sandbox_cmd(&daemon)
        .args(["kill", "demo", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Killed process 12"));

    let params = daemon
        .last_request_for("send_signal")
        .unwrap()
        .params
        .unwrap();
    assert_eq!(params["pid"], 12);
    assert_eq!(params["signal"], "SIGKILL");
}

#[test]
fn test_kill_already_exited_process_succeeds() {
    let daemon = MockDaemon::start();
    daemon.set_response(
        "send_signal",
        MockResponse::Error {
            code: -32001,
            message: "process 12 not found".to_string(),
        },
    );

    sandbox_cmd(&daemon)
        .args(["kill", "demo", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exited"));
}

#[test]
fn test_kill_transport_error_is_fatal() {
    let daemon = MockDaemon::start();
    daemon.set_response(
        "send_signal",
        MockResponse::Error {
            code: -32000,
            message: "internal failure".to_string(),
        },
    );

    sandbox_cmd(&daemon)
        .args(["kill", "demo", "12"])
        .assert()
        .code(125)
        .stderr(predicate::str::contains("internal failure"));
}

#[test]
fn test_attach_streams_output_and_exit_code() {
    let daemon = MockDaemon::start();
    daemon.set_response(
        "connect",
        MockResponse::Stream(vec![output_event("stdout", b"tail of log\n"), end_event(2)]),
    );

    sandbox_cmd(&daemon)
        .args(["attach", "demo", "40"])
        .assert()
        .code(2)
        .stdout("tail of log\n");

    let params = daemon.last_request_for("connect").unwrap().params.unwrap();
    assert_eq!(params["pid"], 40);
}

#[test]
fn test_attach_unknown_pid_is_fatal() {
    let daemon = MockDaemon::start();
    daemon.set_response(
        "connect",
        MockResponse::Error {
            code: -32001,
            message: "process 99 not found".to_string(),
        },
    );

    sandbox_cmd(&daemon)
        .args(["attach", "demo", "99"])
        .assert()
        .code(125)
        .stderr(predicate::str::contains("no longer exists"));
}
