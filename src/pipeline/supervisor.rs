//! Inference worker process lifecycle: spawn, observe, bounded join

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::InferenceConfig;

pub const WORKER_BIN: &str = "relaycam-worker";

#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Build the command line for an inference worker attached to `relay`.
    pub fn inference(config: &InferenceConfig, relay: &Path) -> io::Result<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => bin_path(WORKER_BIN)?,
        };
        let mut args = vec![
            "--relay".to_string(),
            relay.display().to_string(),
            "--model".to_string(),
            config.model_path.display().to_string(),
        ];
        if config.show {
            args.push("--show".into());
        }
        Ok(Self { program, args })
    }
}

fn bin_path(bin: &str) -> io::Result<PathBuf> {
    let mut exe = env::current_exe()?;
    exe.pop(); // drop current binary name
    exe.push(bin);
    Ok(exe)
}

/// How the worker ended once `join` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Exited on its own, before or within the join timeout
    Exited(ExitStatus),
    /// Exited after SIGTERM
    Terminated(ExitStatus),
    /// Had to be killed
    Killed,
}

pub struct WorkerSupervisor {
    child: Child,
    exited: Option<ExitStatus>,
}

impl WorkerSupervisor {
    pub fn spawn(command: &WorkerCommand) -> io::Result<Self> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!(
            "Inference worker started: {} (pid {:?})",
            command.program.display(),
            child.id()
        );
        Ok(Self {
            child,
            exited: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking check whether the worker has exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exited.is_none() {
            self.exited = self.child.try_wait()?;
        }
        Ok(self.exited)
    }

    /// Wait up to `timeout` for a voluntary exit, then SIGTERM and wait
    /// `grace`, then kill.
    pub async fn join(mut self, timeout: Duration, grace: Duration) -> io::Result<JoinOutcome> {
        if let Some(status) = self.try_wait()? {
            return Ok(JoinOutcome::Exited(status));
        }

        if let Ok(status) = tokio::time::timeout(timeout, self.child.wait()).await {
            return Ok(JoinOutcome::Exited(status?));
        }
        warn!("Inference worker did not exit within {:?}, terminating", timeout);

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("SIGTERM to worker {} failed: {}", pid, e);
            }
            if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
                return Ok(JoinOutcome::Terminated(status?));
            }
        }

        warn!("Inference worker ignored SIGTERM, killing");
        self.child.kill().await?;
        Ok(JoinOutcome::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn inference_command_carries_relay_and_model() {
        let config = InferenceConfig {
            worker_program: Some(PathBuf::from("/opt/worker")),
            show: false,
            ..InferenceConfig::default()
        };
        let cmd = WorkerCommand::inference(&config, Path::new("/tmp/x.relay")).unwrap();
        assert_eq!(cmd.program, PathBuf::from("/opt/worker"));
        assert_eq!(
            cmd.args,
            vec!["--relay", "/tmp/x.relay", "--model", "yolov8n.onnx"]
        );
    }

    #[test]
    fn default_program_sits_next_to_current_exe() {
        let cmd = WorkerCommand::inference(&InferenceConfig::default(), Path::new("r")).unwrap();
        assert_eq!(cmd.program.file_name().unwrap(), WORKER_BIN);
        assert!(cmd.args.contains(&"--show".to_string()));
    }

    #[test]
    fn worker_accepts_its_command_line() {
        use crate::cli::WorkerArgs;
        use clap::Parser;

        let cmd = WorkerCommand::inference(&InferenceConfig::default(), Path::new("/tmp/r")).unwrap();
        let args = WorkerArgs::try_parse_from(std::iter::once(WORKER_BIN.to_string()).chain(cmd.args))
            .unwrap();
        assert_eq!(args.relay, PathBuf::from("/tmp/r"));
        assert_eq!(args.model, InferenceConfig::default().model_path);
        assert!(args.show);
    }

    #[tokio::test]
    async fn quick_exit_is_reported() {
        let worker = WorkerSupervisor::spawn(&sh("exit 3")).unwrap();
        let outcome = worker
            .join(Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        match outcome {
            JoinOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stuck_worker_is_terminated() {
        let worker = WorkerSupervisor::spawn(&sh("sleep 30")).unwrap();
        let outcome = worker
            .join(Duration::from_millis(100), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Terminated(_)));
    }

    #[tokio::test]
    async fn worker_ignoring_sigterm_is_killed() {
        let worker = WorkerSupervisor::spawn(&sh("trap '' TERM; sleep 30")).unwrap();
        let outcome = worker
            .join(Duration::from_millis(100), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Killed);
    }
}
