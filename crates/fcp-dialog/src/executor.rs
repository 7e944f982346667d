//! Worker pool running the connect, register and send step of commands.
//!
//! Client methods hand their work to the pool and return the dialog handle
//! straight away, so callers never block on connecting or writing.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, error, warn};

const EXECUTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::executor");

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of named command threads fed from one queue.
///
/// Workers exit once the executor is dropped and the queue drains.
pub(crate) struct CommandExecutor {
    sender: Sender<Job>,
}

impl CommandExecutor {
    pub(crate) fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 1..=workers.max(1) {
            let jobs = Arc::clone(&receiver);
            let spawned = thread::Builder::new()
                .name(format!("fcp-command-{index}"))
                .spawn(move || run_worker(&jobs));
            if let Err(error) = spawned {
                warn!(
                    target: EXECUTOR_TARGET,
                    worker = index,
                    error = %error,
                    "could not start command worker"
                );
            }
        }
        Self { sender }
    }

    /// Queues `job`; runs it on the calling thread if no worker is left.
    pub(crate) fn submit(&self, job: Job) {
        if let Err(SendError(job)) = self.sender.send(job) {
            warn!(
                target: EXECUTOR_TARGET,
                "no command worker available; running command inline"
            );
            job();
        }
    }
}

fn run_worker(jobs: &Mutex<Receiver<Job>>) {
    loop {
        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = next else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(target: EXECUTOR_TARGET, "command panicked");
        }
    }
    debug!(target: EXECUTOR_TARGET, "command worker stopped");
}
