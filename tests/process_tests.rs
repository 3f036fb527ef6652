use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use relaycam::pipeline::{
    FrameRelay, JoinOutcome, Orchestrator, RunOutcome, WorkerCommand, WorkerSupervisor,
};
use relaycam::InferenceConfig;

fn run_bin(bin: &str, args: &[&str]) -> std::process::Output {
    let dir = tempfile::tempdir().unwrap();
    Command::new(bin)
        .args(args)
        .current_dir(dir.path())
        .env("RELAYCAM__OUTPUT__ENABLED", "false")
        .output()
        .unwrap()
}

#[test]
fn test_grab_with_three_arguments_prints_usage() {
    let output = run_bin(env!("CARGO_BIN_EXE_grab"), &["a", "b", "c"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(2));
    assert!(stdout.contains("Invalid number of arguments. Abort."));
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("camera_id"));
}

#[test]
fn test_help_exits_zero_even_with_extra_arguments() {
    let output = run_bin(env!("CARGO_BIN_EXE_grab-bgr"), &["a", "b", "/h"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage:"));
}

#[test]
fn test_grab_bgr_accepts_a_single_argument_only() {
    let output = run_bin(env!("CARGO_BIN_EXE_grab-bgr"), &["a", "b"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_camera_exits_one() {
    let output = run_bin(env!("CARGO_BIN_EXE_grab"), &["/dev/relaycam-no-such-camera"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout)
        .contains("Failed to access Camera '/dev/relaycam-no-such-camera'"));
}

/// Worker dies on a missing model; the orchestrator keeps running until
/// interrupted and reports the worker's exit.
#[tokio::test]
async fn test_missing_model_stops_worker_not_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let relay = FrameRelay::create(&dir.path().join("scenario.relay"), 3, 64).unwrap();

    let config = InferenceConfig {
        model_path: dir.path().join("missing.onnx"),
        worker_program: Some(PathBuf::from(env!("CARGO_BIN_EXE_relaycam-worker"))),
        show: false,
        join_timeout_ms: 2000,
        terminate_grace_ms: 500,
        ..InferenceConfig::default()
    };
    let command = WorkerCommand::inference(&config, relay.path()).unwrap();
    let worker = WorkerSupervisor::spawn(&command).unwrap();

    let mut orchestrator = Orchestrator::new(
        relay.stop_signal(),
        Some(worker),
        &config,
        Duration::from_millis(20),
    );
    let outcome = orchestrator
        .run(tokio::time::sleep(Duration::from_secs(3)))
        .await;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(orchestrator.worker_exit().and_then(|s| s.code()), Some(3));
    assert!(matches!(
        orchestrator.shutdown().await,
        Some(JoinOutcome::Exited(_))
    ));
}

#[test]
fn test_worker_without_relay_argument_is_a_usage_error() {
    let output = run_bin(env!("CARGO_BIN_EXE_relaycam-worker"), &["--model", "m.onnx"]);
    assert_eq!(output.status.code(), Some(2));
}

/// Ctrl-C ends `grab` even though stdin stays open without a newline.
#[test]
fn test_grab_exits_on_interrupt_with_stdin_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_grab"))
        .arg("synthetic")
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env("RELAYCAM__CAPTURE__SYNTHETIC__FPS", "10")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let _stdin = child.stdin.take();

    std::thread::sleep(Duration::from_secs(2));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if Instant::now() > deadline {
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    if status.is_none() {
        child.kill().unwrap();
    }
    let output = child.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(status.and_then(|s| s.code()), Some(0), "stderr: {}", stderr);
    assert!(stderr.contains("Saved"), "stderr: {}", stderr);
    assert!(std::fs::read_dir(dir.path().join("captured_frames"))
        .unwrap()
        .next()
        .is_some());
}
