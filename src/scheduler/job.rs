use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::peaks::{Gap, PeakList};
use crate::dataset::refresh::RefreshRequest;
use crate::strategy::AlgorithmParameters;

pub type TaskId = u64;
pub type JobId = u64;
pub type RawDataId = u64;

/// Status values reported to the controller while a job is alive.
///
/// There is no terminal status: the controller infers completion from whether
/// `set_job_result` or `set_job_error_message` arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    UnderProcessing,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::UnderProcessing => write!(f, "UNDER_PROCESSING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    OpenRawData,
    CloseRawData,
    RefreshVisualizers,
    FilterRawData,
    FindPeaks,
    Alignment,
    GapFilling,
    CalcTotalRawSignal,
    ProcessPeakList,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobType::OpenRawData => "OPEN_RAW_DATA",
            JobType::CloseRawData => "CLOSE_RAW_DATA",
            JobType::RefreshVisualizers => "REFRESH_VISUALIZERS",
            JobType::FilterRawData => "FILTER_RAW_DATA",
            JobType::FindPeaks => "FIND_PEAKS",
            JobType::Alignment => "ALIGNMENT",
            JobType::GapFilling => "GAP_FILLING",
            JobType::CalcTotalRawSignal => "CALC_TOTAL_RAW_SIGNAL",
            JobType::ProcessPeakList => "PROCESS_PEAK_LIST",
        };
        f.write_str(name)
    }
}

/// Per-type payload of a job. Each variant carries exactly what its handler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    OpenRawData {
        original_path: PathBuf,
    },
    CloseRawData {
        save_changes: bool,
    },
    RefreshVisualizers {
        request: RefreshRequest,
    },
    FilterRawData {
        parameters: AlgorithmParameters,
    },
    FindPeaks {
        parameters: AlgorithmParameters,
    },
    Alignment {
        peak_lists: BTreeMap<RawDataId, PeakList>,
        parameters: AlgorithmParameters,
    },
    GapFilling {
        gaps: BTreeMap<u32, Gap>,
        parameters: AlgorithmParameters,
    },
    CalcTotalRawSignal,
    ProcessPeakList {
        peak_list: PeakList,
        parameters: AlgorithmParameters,
    },
}

impl JobKind {
    pub fn job_type(&self) -> JobType {
        match self {
            JobKind::OpenRawData { .. } => JobType::OpenRawData,
            JobKind::CloseRawData { .. } => JobType::CloseRawData,
            JobKind::RefreshVisualizers { .. } => JobType::RefreshVisualizers,
            JobKind::FilterRawData { .. } => JobType::FilterRawData,
            JobKind::FindPeaks { .. } => JobType::FindPeaks,
            JobKind::Alignment { .. } => JobType::Alignment,
            JobKind::GapFilling { .. } => JobType::GapFilling,
            JobKind::CalcTotalRawSignal => JobType::CalcTotalRawSignal,
            JobKind::ProcessPeakList { .. } => JobType::ProcessPeakList,
        }
    }
}

/// A unit of work submitted by the controller. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub kind: JobKind,
    pub queued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(task_id: TaskId, job_id: JobId, kind: JobKind) -> Self {
        Self {
            task_id,
            job_id,
            kind,
            queued_at: Utc::now(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.kind.job_type()
    }

    /// Dataset this job operates on.
    ///
    /// A dataset's id is the job id of the open job that staged it, and every
    /// dataset-scoped job addresses it through its own job id.
    pub fn raw_data_id(&self) -> RawDataId {
        self.job_id
    }
}
