//! Restarts the session worker after a crash.
//!
//! The queue's receiving end outlives every worker incarnation, so messages
//! still queued at crash time are picked up by the replacement. The
//! submission being processed when the worker crashed is lost.

use std::{sync::Arc, time::Duration};

use mailout_common::internal;
use tokio::sync::{Mutex, mpsc};

use crate::{
    error::WorkerError, settings::WorkerConfig, submission::Submission, transport::Transport,
    worker::SessionWorker,
};

/// Upper bound for the delay between two restarts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Crashes tolerated before giving up
    pub max_restarts: u32,
    /// Delay before the first restart, doubled for every further one
    pub backoff: Duration,
}

impl From<&WorkerConfig> for SupervisorConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            backoff: Duration::from_millis(config.restart_backoff_ms),
        }
    }
}

/// Owns the queue receiver and keeps one worker running on it.
#[derive(Debug)]
pub struct Supervisor<T> {
    worker: SessionWorker<T>,
    queue: Arc<Mutex<mpsc::Receiver<Submission>>>,
    config: SupervisorConfig,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        worker: SessionWorker<T>,
        queue: mpsc::Receiver<Submission>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            worker,
            queue: Arc::new(Mutex::new(queue)),
            config,
        }
    }

    /// Run workers until one exits because the queue closed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::RestartLimit`] once the worker has crashed more
    /// than `max_restarts` times, or [`WorkerError::Join`] if the worker
    /// task was cancelled.
    pub async fn run(self) -> Result<(), WorkerError> {
        let mut restarts = 0;
        let mut backoff = self.config.backoff;

        loop {
            let worker = self.worker.clone();
            let queue = Arc::clone(&self.queue);
            let handle = tokio::spawn(async move {
                let mut queue = queue.lock_owned().await;
                worker.run(&mut queue).await;
            });

            match handle.await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_panic() => {
                    restarts += 1;
                    if restarts > self.config.max_restarts {
                        self.worker.maillog().error(format_args!(
                            "Session worker crashed {restarts} times, giving up"
                        ));
                        return Err(WorkerError::RestartLimit(self.config.max_restarts));
                    }

                    self.worker.maillog().error(format_args!(
                        "Catching panic in session worker, restarting in {backoff:?} ({restarts}/{})",
                        self.config.max_restarts
                    ));
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    internal!(level = INFO, "Restarting session worker");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
