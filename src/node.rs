use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::NodeConfig;
use crate::controller::{ControllerHandle, ControllerLink, HttpControllerLink, Reporter};
use crate::dataset::peaks::{Gap, PeakList};
use crate::dataset::refresh::RefreshRequest;
use crate::dataset::{JsonLinesFormat, RawDataFormat};
use crate::error::{NodeError, Result};
use crate::scheduler::{Job, JobId, JobKind, JobQueue, JobStatus, RawDataId, TaskId};
use crate::strategy::{AlgorithmParameters, StrategyRegistry};
use crate::worker::{HandlerSettings, JobHandlers, WorkerLoop, WorkerStatus};

/// How long [`NodeServer::shutdown`] waits for queued controller calls
pub const DELIVERY_GRACE: Duration = Duration::from_secs(30);

/// Node-level status served by the intake API.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: u64,
    pub worker: WorkerStatus,
    pub queued_jobs: usize,
    pub controller_set: bool,
}

/// A compute node: job intake, one worker thread and the controller link.
///
/// Intake methods never block on job execution. Each one reports the job as
/// `QUEUED` at rate 0.0, appends it to the FIFO queue and returns.
pub struct NodeServer {
    config: NodeConfig,
    queue: JobQueue,
    reporter: Reporter,
    controller: ControllerHandle,
    status: watch::Receiver<WorkerStatus>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    delivery: JoinHandle<()>,
}

impl NodeServer {
    /// Start a node reading datasets as JSON-lines scan files.
    ///
    /// Must be called from inside a Tokio runtime: the reporter task is
    /// spawned on it.
    pub fn start(config: NodeConfig, registry: StrategyRegistry) -> Result<Self> {
        Self::start_with_format(config, registry, Arc::new(JsonLinesFormat))
    }

    pub fn start_with_format(
        config: NodeConfig,
        registry: StrategyRegistry,
        format: Arc<dyn RawDataFormat>,
    ) -> Result<Self> {
        let config = config.validated()?;
        std::fs::create_dir_all(&config.work_dir)?;

        let initial = match &config.controller_url {
            Some(url) => {
                let link = HttpControllerLink::new(url, config.controller_timeout())?;
                Some(Arc::new(link) as Arc<dyn ControllerLink>)
            }
            None => None,
        };
        let controller = ControllerHandle::new(initial);
        let (reporter, delivery) = Reporter::spawn(controller.clone());

        let (queue, jobs) = JobQueue::channel();
        let (status_tx, status) = watch::channel(WorkerStatus::default());
        let settings = HandlerSettings {
            data_root: config.data_root.clone(),
            work_dir: config.work_dir.clone(),
            chunk_size: config.chunk_size,
        };
        let handlers = JobHandlers::new(settings, reporter.clone(), Arc::new(registry), format);
        let worker = WorkerLoop::new(handlers, jobs, status_tx).spawn()?;

        tracing::info!(
            node_id = config.node_id,
            work_dir = %config.work_dir.display(),
            data_root = %config.data_root.display(),
            chunk_size = config.chunk_size,
            controller = ?config.controller_url,
            "Node started"
        );

        Ok(Self {
            config,
            queue,
            reporter,
            controller,
            status,
            worker: Mutex::new(Some(worker)),
            delivery,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Queue a job of any type.
    pub fn submit(&self, task_id: TaskId, job_id: JobId, kind: JobKind) -> Result<()> {
        if self.queue.is_closed() {
            return Err(NodeError::WorkerStopped);
        }
        enqueue(&self.queue, &self.reporter, Job::new(task_id, job_id, kind))
    }

    pub fn add_open_raw_data(
        &self,
        task_id: TaskId,
        job_id: JobId,
        original_path: impl Into<PathBuf>,
    ) -> Result<()> {
        let original_path = original_path.into();
        self.submit(task_id, job_id, JobKind::OpenRawData { original_path })
    }

    pub fn add_close_raw_data(
        &self,
        task_id: TaskId,
        job_id: JobId,
        save_changes: bool,
    ) -> Result<()> {
        self.submit(task_id, job_id, JobKind::CloseRawData { save_changes })
    }

    pub fn add_refresh_visualizers(
        &self,
        task_id: TaskId,
        job_id: JobId,
        request: RefreshRequest,
    ) -> Result<()> {
        self.submit(task_id, job_id, JobKind::RefreshVisualizers { request })
    }

    pub fn add_filter_raw_data(
        &self,
        task_id: TaskId,
        job_id: JobId,
        parameters: AlgorithmParameters,
    ) -> Result<()> {
        self.submit(task_id, job_id, JobKind::FilterRawData { parameters })
    }

    pub fn add_find_peaks(
        &self,
        task_id: TaskId,
        job_id: JobId,
        parameters: AlgorithmParameters,
    ) -> Result<()> {
        self.submit(task_id, job_id, JobKind::FindPeaks { parameters })
    }

    pub fn add_alignment(
        &self,
        task_id: TaskId,
        job_id: JobId,
        peak_lists: BTreeMap<RawDataId, PeakList>,
        parameters: AlgorithmParameters,
    ) -> Result<()> {
        self.submit(
            task_id,
            job_id,
            JobKind::Alignment {
                peak_lists,
                parameters,
            },
        )
    }

    pub fn add_gap_filling(
        &self,
        task_id: TaskId,
        job_id: JobId,
        gaps: BTreeMap<u32, Gap>,
        parameters: AlgorithmParameters,
    ) -> Result<()> {
        self.submit(task_id, job_id, JobKind::GapFilling { gaps, parameters })
    }

    pub fn add_calc_total_raw_signal(&self, task_id: TaskId, job_id: JobId) -> Result<()> {
        self.submit(task_id, job_id, JobKind::CalcTotalRawSignal)
    }

    pub fn add_process_peak_list(
        &self,
        task_id: TaskId,
        job_id: JobId,
        peak_list: PeakList,
        parameters: AlgorithmParameters,
    ) -> Result<()> {
        self.submit(
            task_id,
            job_id,
            JobKind::ProcessPeakList {
                peak_list,
                parameters,
            },
        )
    }

    /// Swap the controller reference. `None` suspends outbound reporting.
    pub fn set_controller(&self, controller: Option<Arc<dyn ControllerLink>>) {
        self.controller.set(controller);
    }

    /// Point the node at an HTTP controller, or detach it with `None`.
    pub fn set_controller_url(&self, url: Option<&str>) -> Result<()> {
        let link = match url {
            Some(url) => {
                let link = HttpControllerLink::new(url, self.config.controller_timeout())?;
                Some(Arc::new(link) as Arc<dyn ControllerLink>)
            }
            None => None,
        };
        self.set_controller(link);
        Ok(())
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.config.node_id,
            worker: self.status.borrow().clone(),
            queued_jobs: self.queue.len(),
            controller_set: self.controller.is_set(),
        }
    }

    /// Receiver that sees every worker status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    /// Serve the intake API until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.listen_addr;
        let router = api::router(self.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Intake API listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Intake API stopped");
        Ok(())
    }

    /// Close the queue, let the worker finish what is queued, then wait for
    /// every outbound controller call to be delivered.
    ///
    /// Delivery is abandoned after [`DELIVERY_GRACE`].
    pub async fn shutdown(self) {
        self.shutdown_within(DELIVERY_GRACE).await
    }

    pub async fn shutdown_within(self, grace: Duration) {
        let Self {
            queue,
            reporter,
            worker,
            delivery,
            ..
        } = self;
        drop(queue);
        // The worker holds the only other reporter clones
        drop(reporter);

        let handle = worker.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => tracing::info!("Worker drained"),
                _ => tracing::error!("Worker thread terminated abnormally"),
            }
        }

        match tokio::time::timeout(grace, delivery).await {
            Ok(Ok(())) => tracing::info!("Controller calls delivered"),
            Ok(Err(e)) => tracing::error!(error = %e, "Reporter task failed"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Gave up waiting for controller calls"
            ),
        }
    }
}

/// Report `job` as QUEUED and append it to the queue.
///
/// QUEUED goes out before the push so it always precedes the worker's own
/// calls for the job. A push that fails afterwards is reported as the job's
/// terminal error.
fn enqueue(queue: &JobQueue, reporter: &Reporter, job: Job) -> Result<()> {
    let (task_id, job_id) = (job.task_id, job.job_id);
    tracing::info!(task_id, job_id, job_type = %job.job_type(), "Job queued");
    reporter.completion(task_id, job_id, JobStatus::Queued, 0.0);

    queue.push(job).inspect_err(|e| {
        tracing::warn!(task_id, job_id, error = %e, "Job rejected after QUEUED was reported");
        reporter.error(task_id, job_id, e.to_string());
    })
}

impl std::fmt::Debug for NodeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServer")
            .field("node_id", &self.config.node_id)
            .field("queued_jobs", &self.queue.len())
            .field("controller", &self.controller)
            .finish()
    }
}
