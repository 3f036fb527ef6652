//! Top-level run loop: wait for Ctrl-C or a worker-raised stop, watch the
//! worker, then shut it down with a bounded join.

use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::stop::StopSignal;
use super::supervisor::{JoinOutcome, WorkerSupervisor};
use crate::InferenceConfig;

/// Why `Orchestrator::run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The shutdown future completed (user interrupt)
    Interrupted,
    /// Another process raised the stop signal
    Stopped,
}

pub struct Orchestrator {
    stop: StopSignal,
    worker: Option<WorkerSupervisor>,
    worker_exit: Option<ExitStatus>,
    poll_interval: Duration,
    join_timeout: Duration,
    terminate_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        stop: StopSignal,
        worker: Option<WorkerSupervisor>,
        inference: &InferenceConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            stop,
            worker,
            worker_exit: None,
            poll_interval,
            join_timeout: inference.join_timeout(),
            terminate_grace: inference.terminate_grace(),
        }
    }

    /// Exit status of the worker if it has been observed to exit.
    pub fn worker_exit(&self) -> Option<ExitStatus> {
        self.worker_exit
    }

    /// Block until `shutdown` resolves or the stop signal is raised. A worker
    /// exiting early is logged; acquisition keeps running without it.
    pub async fn run<F>(&mut self, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tick = interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("User interrupted, stopping all processes...");
                    self.stop.set();
                    return RunOutcome::Interrupted;
                }
                _ = tick.tick() => {
                    if self.stop.is_set() {
                        info!("Stop signal raised, shutting down");
                        return RunOutcome::Stopped;
                    }
                    self.poll_worker();
                }
            }
        }
    }

    fn poll_worker(&mut self) {
        if self.worker_exit.is_some() {
            return;
        }
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        match worker.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    info!("Inference worker finished");
                } else {
                    error!(
                        "Inference worker exited early ({}), acquisition continues without inference",
                        status
                    );
                }
                metrics::counter!("relaycam_worker_exits").increment(1);
                self.worker_exit = Some(status);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to poll inference worker: {}", e),
        }
    }

    /// Raise the stop signal and join the worker within the configured bounds.
    pub async fn shutdown(mut self) -> Option<JoinOutcome> {
        self.stop.set();
        let worker = self.worker.take()?;
        match worker.join(self.join_timeout, self.terminate_grace).await {
            Ok(outcome) => {
                info!("Inference worker joined: {:?}", outcome);
                Some(outcome)
            }
            Err(e) => {
                error!("Failed to join inference worker: {}", e);
                None
            }
        }
    }
}
