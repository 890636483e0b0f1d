//! Single-threaded job execution.
//!
//! One worker per node runs on a dedicated OS thread. It parks on the job
//! queue while idle and runs exactly one job at a time in submission order.
//!
//! # Components
//!
//! - [`handlers`]: per-job-type logic and the raw-data table it owns
//! - [`progress`]: waypoint-based completion-rate reporting
//! - [`staging`]: chunked copies into and out of the work directory
//! - [`raw_data`]: staged datasets and their controller-facing snapshots
//!
//! # Execution Flow
//!
//! 1. [`WorkerLoop`] blocks on [`JobReceiver::blocking_pop`]
//! 2. The job is dispatched to [`JobHandlers::run`] inside a panic firewall
//! 3. The outcome becomes one terminal call on the [`Reporter`]
//! 4. The published [`WorkerStatus`] goes back to idle
//!
//! The worker is the only owner of the raw-data table and of every working
//! copy, so nothing here is locked.

pub mod handlers;
pub mod progress;
pub mod raw_data;
pub mod staging;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::controller::Reporter;
use crate::scheduler::{Job, JobId, JobReceiver, JobType, RawDataId, TaskId};

pub use handlers::{HandlerSettings, JobFailure, JobHandlers};
pub use progress::CompletionTracker;

pub const WORKER_THREAD_NAME: &str = "rawnode-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningJob {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub job_type: JobType,
}

/// Snapshot of what the worker is doing, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub current_job: Option<RunningJob>,
    pub open_raw_data: Vec<RawDataId>,
    pub jobs_processed: u64,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            current_job: None,
            open_raw_data: Vec::new(),
            jobs_processed: 0,
        }
    }
}

/// The consumer loop. Runs until every queue producer is dropped.
pub struct WorkerLoop {
    handlers: JobHandlers,
    jobs: JobReceiver,
    status: watch::Sender<WorkerStatus>,
    jobs_processed: u64,
}

impl WorkerLoop {
    pub fn new(
        handlers: JobHandlers,
        jobs: JobReceiver,
        status: watch::Sender<WorkerStatus>,
    ) -> Self {
        Self {
            handlers,
            jobs,
            status,
            jobs_processed: 0,
        }
    }

    /// Start the loop on its own named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        tracing::info!("Worker started");
        while let Some(job) = self.jobs.blocking_pop() {
            self.process(job);
        }
        tracing::info!(
            jobs_processed = self.jobs_processed,
            "Job queue closed, worker stopping"
        );
    }

    fn process(&mut self, job: Job) {
        tracing::info!(
            task_id = job.task_id,
            job_id = job.job_id,
            job_type = %job.job_type(),
            "Processing job"
        );
        self.publish(Some(RunningJob {
            task_id: job.task_id,
            job_id: job.job_id,
            job_type: job.job_type(),
        }));

        let handlers = &mut self.handlers;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handlers.run(&job)));
        let reporter: &Reporter = self.handlers.reporter();

        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(task_id = job.task_id, job_id = job.job_id, "Job finished");
                reporter.result(job.task_id, job.job_id, result);
            }
            Ok(Err(failure)) => {
                tracing::warn!(
                    task_id = job.task_id,
                    job_id = job.job_id,
                    error = %failure,
                    "Job failed"
                );
                reporter.error(job.task_id, job.job_id, failure.0);
            }
            Err(payload) => {
                let message = format!(
                    "Internal error while processing job: {}",
                    panic_message(payload.as_ref())
                );
                tracing::error!(
                    task_id = job.task_id,
                    job_id = job.job_id,
                    %message,
                    "Job panicked"
                );
                reporter.error(job.task_id, job.job_id, message);
            }
        }

        self.jobs_processed += 1;
        self.publish(None);
    }

    fn publish(&self, current_job: Option<RunningJob>) {
        let state = if current_job.is_some() {
            WorkerState::Running
        } else {
            WorkerState::Idle
        };
        self.status.send_replace(WorkerStatus {
            state,
            current_job,
            open_raw_data: self.handlers.table().ids(),
            jobs_processed: self.jobs_processed,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_rendered() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");

        let payload = panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn default_status_is_idle() {
        let status = WorkerStatus::default();
        assert_eq!(status.state, WorkerState::Idle);
        assert!(status.current_job.is_none());
        assert_eq!(status.jobs_processed, 0);
    }
}
