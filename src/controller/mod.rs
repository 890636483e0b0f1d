//! Outbound link to the controller.
//!
//! The node reports three kinds of calls: completion-rate updates while a job
//! is alive, and exactly one terminal call per job (a result or an error
//! message). The controller is injected as a [`ControllerLink`] trait object
//! behind a [`ControllerHandle`] that can be swapped at any time; while no
//! controller is set, outbound calls are dropped and logged.
//!
//! Calls are not made by the worker directly. They are queued on the ordered
//! [`Reporter`] channel and delivered by a single async task, so a slow
//! controller never holds up job processing.

pub mod http;
pub mod reporter;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dataset::peaks::{AlignmentResult, GapFill, PeakList};
use crate::dataset::refresh::RefreshResult;
use crate::error::ControllerError;
use crate::scheduler::{JobId, JobStatus, RawDataId, TaskId};
use crate::worker::raw_data::RawDataSnapshot;

pub use http::HttpControllerLink;
pub use reporter::{Outbound, Reporter};

/// Typed result payload of a successfully finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobResult {
    /// Open and filter jobs return a snapshot of the dataset
    RawData(RawDataSnapshot),
    Closed { raw_data_id: RawDataId },
    Refresh(RefreshResult),
    PeakList(PeakList),
    Alignment(AlignmentResult),
    GapFills(BTreeMap<u32, GapFill>),
    TotalRawSignal(f64),
}

/// Calls the node makes into the controller.
#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn update_job_completion_rate(
        &self,
        task_id: TaskId,
        job_id: JobId,
        status: JobStatus,
        rate: f64,
    ) -> Result<(), ControllerError>;

    async fn set_job_result(
        &self,
        task_id: TaskId,
        job_id: JobId,
        result: JobResult,
    ) -> Result<(), ControllerError>;

    async fn set_job_error_message(
        &self,
        task_id: TaskId,
        job_id: JobId,
        message: String,
    ) -> Result<(), ControllerError>;
}

/// Shared, swappable reference to the current controller.
#[derive(Clone, Default)]
pub struct ControllerHandle {
    inner: Arc<RwLock<Option<Arc<dyn ControllerLink>>>>,
}

impl ControllerHandle {
    pub fn new(link: Option<Arc<dyn ControllerLink>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(link)),
        }
    }

    /// Replace the controller. `None` suspends outbound reporting.
    pub fn set(&self, link: Option<Arc<dyn ControllerLink>>) {
        if link.is_none() {
            tracing::warn!("Controller reference cleared, outbound calls will be dropped");
        } else {
            tracing::info!("Controller reference updated");
        }
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = link;
    }

    /// Current controller, if any. The lock is released before returning.
    pub fn current(&self) -> Option<Arc<dyn ControllerLink>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl ControllerLink for Silent {
        async fn update_job_completion_rate(
            &self,
            _task_id: TaskId,
            _job_id: JobId,
            _status: JobStatus,
            _rate: f64,
        ) -> Result<(), ControllerError> {
            Ok(())
        }

        async fn set_job_result(
            &self,
            _task_id: TaskId,
            _job_id: JobId,
            _result: JobResult,
        ) -> Result<(), ControllerError> {
            Ok(())
        }

        async fn set_job_error_message(
            &self,
            _task_id: TaskId,
            _job_id: JobId,
            _message: String,
        ) -> Result<(), ControllerError> {
            Ok(())
        }
    }

    #[test]
    fn handle_swaps_and_clears() {
        let handle = ControllerHandle::default();
        assert!(!handle.is_set());

        handle.set(Some(Arc::new(Silent) as Arc<dyn ControllerLink>));
        assert!(handle.is_set());

        let clone = handle.clone();
        clone.set(None);
        assert!(!handle.is_set());
    }

    #[test]
    fn job_result_wire_format() {
        let json = serde_json::to_value(JobResult::TotalRawSignal(12.5)).unwrap();
        assert_eq!(json["kind"], "total_raw_signal");
        assert_eq!(json["value"], 12.5);

        let json = serde_json::to_value(JobResult::Closed { raw_data_id: 4 }).unwrap();
        assert_eq!(json["kind"], "closed");
        assert_eq!(json["value"]["raw_data_id"], 4);

        let mut fills = BTreeMap::new();
        fills.insert(3, GapFill { height: 1.0, area: 2.0 });
        let result = JobResult::GapFills(fills);
        let back: JobResult =
            serde_json::from_value(serde_json::to_value(&result).unwrap()).unwrap();
        assert_eq!(back, result);
    }
}
