use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::{ControllerHandle, ControllerLink, JobResult};
use crate::scheduler::{JobId, JobStatus, TaskId};

/// One queued outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Completion {
        task_id: TaskId,
        job_id: JobId,
        status: JobStatus,
        rate: f64,
    },
    Result {
        task_id: TaskId,
        job_id: JobId,
        result: JobResult,
    },
    Error {
        task_id: TaskId,
        job_id: JobId,
        message: String,
    },
}

/// Ordered, non-blocking sender of controller calls.
///
/// Cloned into intake and the worker thread. Every call is delivered in
/// submission order by one task that resolves the current controller at
/// delivery time. Sends never block and never fail the caller.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Reporter {
    /// Start the delivery task. It ends once every `Reporter` clone is dropped
    /// and the backlog is delivered.
    pub fn spawn(controller: ControllerHandle) -> (Reporter, JoinHandle<()>) {
        let (reporter, rx) = Reporter::channel();
        let handle = tokio::spawn(deliver(rx, controller));
        (reporter, handle)
    }

    /// Reporter whose calls are left on the returned receiver.
    pub fn channel() -> (Reporter, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Reporter { tx }, rx)
    }

    pub fn completion(&self, task_id: TaskId, job_id: JobId, status: JobStatus, rate: f64) {
        self.send(Outbound::Completion {
            task_id,
            job_id,
            status,
            rate,
        });
    }

    pub fn result(&self, task_id: TaskId, job_id: JobId, result: JobResult) {
        self.send(Outbound::Result {
            task_id,
            job_id,
            result,
        });
    }

    pub fn error(&self, task_id: TaskId, job_id: JobId, message: impl Into<String>) {
        self.send(Outbound::Error {
            task_id,
            job_id,
            message: message.into(),
        });
    }

    fn send(&self, call: Outbound) {
        if let Err(e) = self.tx.send(call) {
            tracing::warn!(call = ?e.0, "Reporter stopped, dropping controller call");
        }
    }
}

impl Outbound {
    fn ids(&self) -> (TaskId, JobId) {
        match self {
            Outbound::Completion {
                task_id, job_id, ..
            }
            | Outbound::Result {
                task_id, job_id, ..
            }
            | Outbound::Error {
                task_id, job_id, ..
            } => (*task_id, *job_id),
        }
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Outbound>, controller: ControllerHandle) {
    while let Some(call) = rx.recv().await {
        let Some(link) = controller.current() else {
            tracing::debug!(call = ?call, "No controller set, dropping call");
            continue;
        };

        // Each call runs in its own task so a panicking link loses only that call
        let (task_id, job_id) = call.ids();
        if let Err(e) = tokio::spawn(dispatch(link, call)).await {
            tracing::error!(task_id, job_id, error = %e, "Controller link panicked, call lost");
        }
    }
    tracing::debug!("Reporter drained, stopping");
}

async fn dispatch(link: Arc<dyn ControllerLink>, call: Outbound) {
    match call {
        Outbound::Completion {
            task_id,
            job_id,
            status,
            rate,
        } => {
            if let Err(e) = link
                .update_job_completion_rate(task_id, job_id, status, rate)
                .await
            {
                tracing::warn!(
                    task_id,
                    job_id,
                    %status,
                    rate,
                    error = %e,
                    "Failed to report completion rate"
                );
            }
        }
        Outbound::Result {
            task_id,
            job_id,
            result,
        } => {
            if let Err(e) = link.set_job_result(task_id, job_id, result).await {
                tracing::warn!(task_id, job_id, error = %e, "Failed to deliver job result");
            }
        }
        Outbound::Error {
            task_id,
            job_id,
            message,
        } => {
            if let Err(e) = link.set_job_error_message(task_id, job_id, message).await {
                tracing::warn!(task_id, job_id, error = %e, "Failed to deliver job error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::ControllerError;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    #[async_trait]
    impl ControllerLink for Log {
        async fn update_job_completion_rate(
            &self,
            _task_id: TaskId,
            job_id: JobId,
            status: JobStatus,
            rate: f64,
        ) -> Result<(), ControllerError> {
            self.0.lock().unwrap().push(format!("{} {} {}", job_id, status, rate));
            Ok(())
        }

        async fn set_job_result(
            &self,
            _task_id: TaskId,
            job_id: JobId,
            _result: JobResult,
        ) -> Result<(), ControllerError> {
            self.0.lock().unwrap().push(format!("{} result", job_id));
            Err(ControllerError::Rejected(500))
        }

        async fn set_job_error_message(
            &self,
            _task_id: TaskId,
            job_id: JobId,
            message: String,
        ) -> Result<(), ControllerError> {
            self.0.lock().unwrap().push(format!("{} error {}", job_id, message));
            Ok(())
        }
    }

    #[tokio::test]
    async fn calls_are_delivered_in_order() {
        let log = Arc::new(Log::default());
        let link: Arc<dyn ControllerLink> = log.clone();
        let (reporter, task) = Reporter::spawn(ControllerHandle::new(Some(link)));

        reporter.completion(1, 7, JobStatus::Queued, 0.0);
        reporter.completion(1, 7, JobStatus::UnderProcessing, 0.5);
        reporter.result(1, 7, JobResult::TotalRawSignal(3.0));
        reporter.error(1, 8, "boom");
        drop(reporter);
        task.await.unwrap();

        let entries = log.0.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "7 QUEUED 0",
                "7 UNDER_PROCESSING 0.5",
                "7 result",
                "8 error boom",
            ]
        );
    }

    #[tokio::test]
    async fn calls_without_controller_are_dropped() {
        let handle = ControllerHandle::default();
        let (reporter, task) = Reporter::spawn(handle.clone());
        reporter.completion(1, 1, JobStatus::Queued, 0.0);

        let log = Arc::new(Log::default());
        // Give the first call time to be dropped before a controller appears.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.set(Some(log.clone() as Arc<dyn ControllerLink>));
        reporter.completion(1, 2, JobStatus::Queued, 0.0);
        drop(reporter);
        task.await.unwrap();

        assert_eq!(log.0.lock().unwrap().clone(), vec!["2 QUEUED 0"]);
    }

    /// Panics on its first completion call, then records like [`Log`].
    #[derive(Default)]
    struct PanicOnce {
        panicked: AtomicBool,
        log: Log,
    }

    #[async_trait]
    impl ControllerLink for PanicOnce {
        async fn update_job_completion_rate(
            &self,
            task_id: TaskId,
            job_id: JobId,
            status: JobStatus,
            rate: f64,
        ) -> Result<(), ControllerError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("link blew up");
            }
            self.log
                .update_job_completion_rate(task_id, job_id, status, rate)
                .await
        }

        async fn set_job_result(
            &self,
            task_id: TaskId,
            job_id: JobId,
            result: JobResult,
        ) -> Result<(), ControllerError> {
            self.log.set_job_result(task_id, job_id, result).await
        }

        async fn set_job_error_message(
            &self,
            task_id: TaskId,
            job_id: JobId,
            message: String,
        ) -> Result<(), ControllerError> {
            self.log.set_job_error_message(task_id, job_id, message).await
        }
    }

    #[tokio::test]
    async fn panicking_link_loses_only_that_call() {
        let link = Arc::new(PanicOnce::default());
        let (reporter, task) =
            Reporter::spawn(ControllerHandle::new(Some(link.clone() as Arc<dyn ControllerLink>)));

        reporter.completion(1, 7, JobStatus::Queued, 0.0);
        reporter.completion(1, 7, JobStatus::UnderProcessing, 0.5);
        reporter.error(1, 7, "boom");
        drop(reporter);
        task.await.unwrap();

        assert_eq!(
            link.log.0.lock().unwrap().clone(),
            vec!["7 UNDER_PROCESSING 0.5", "7 error boom"]
        );
    }
}
