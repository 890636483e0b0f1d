use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{NodeError, Result};
use crate::scheduler::job::Job;

/// Producer side of the node's job queue.
///
/// FIFO, unbounded, cloneable for any number of intake callers. Pushing never
/// blocks; the send both stores the job and wakes the parked consumer.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, held by the single worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn channel() -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            JobQueue {
                tx,
                depth: depth.clone(),
            },
            JobReceiver { rx, depth },
        )
    }

    /// Append a job to the tail of the queue.
    pub fn push(&self, job: Job) -> Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(NodeError::WorkerStopped);
        }
        Ok(())
    }

    /// Number of jobs waiting to be picked up
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the consumer is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl JobReceiver {
    /// Block the calling thread until a job is available.
    ///
    /// Returns `None` once every producer has been dropped and the queue is
    /// drained. Must not be called from inside an async context.
    pub fn blocking_pop(&mut self) -> Option<Job> {
        let job = self.rx.blocking_recv()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    pub fn try_pop(&mut self) -> Option<Job> {
        let job = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }
}
