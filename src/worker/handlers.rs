//! Per-job-type handlers.
//!
//! Each handler opens a [`CompletionTracker`] at `UNDER_PROCESSING`, does its
//! work and returns either a [`JobResult`] or a [`JobFailure`]. The worker
//! loop turns that into exactly one terminal controller call.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::controller::{JobResult, Reporter};
use crate::dataset::peaks::{Gap, PeakList};
use crate::dataset::refresh::{RefreshRequest, RefreshRun};
use crate::dataset::{RawDataFormat, Scan};
use crate::error::{DatasetError, NodeError, StrategyError};
use crate::scheduler::{Job, JobKind, JobStatus, RawDataId};
use crate::strategy::{AlgorithmParameters, StrategyRegistry};
use crate::worker::progress::CompletionTracker;
use crate::worker::raw_data::{RawDataAtNode, RawDataTable};
use crate::worker::staging;

/// Waypoint distance for staging jobs (open, close)
const STAGING_WAYPOINT: f64 = 0.5;
/// Waypoint distance for everything else
const PROCESSING_WAYPOINT: f64 = 0.1;

/// Message reported to the controller when a job fails.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure(pub String);

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<NodeError> for JobFailure {
    fn from(e: NodeError) -> Self {
        Self(e.to_string())
    }
}

impl From<StrategyError> for JobFailure {
    fn from(e: StrategyError) -> Self {
        Self(e.0)
    }
}

/// Log `detail` against the job and report the fixed `message`.
fn failed(job: &Job, message: &str, detail: impl fmt::Display) -> JobFailure {
    tracing::error!(
        task_id = job.task_id,
        job_id = job.job_id,
        job_type = %job.job_type(),
        error = %detail,
        "{}",
        message
    );
    JobFailure::new(message)
}

/// Settings the handlers need from the node configuration.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Base directory for relative dataset paths; empty means paths are used as given
    pub data_root: PathBuf,
    pub work_dir: PathBuf,
    pub chunk_size: usize,
}

/// Everything the worker thread owns while executing jobs.
pub struct JobHandlers {
    settings: HandlerSettings,
    reporter: Reporter,
    registry: Arc<StrategyRegistry>,
    format: Arc<dyn RawDataFormat>,
    table: RawDataTable,
}

impl JobHandlers {
    pub fn new(
        settings: HandlerSettings,
        reporter: Reporter,
        registry: Arc<StrategyRegistry>,
        format: Arc<dyn RawDataFormat>,
    ) -> Self {
        Self {
            settings,
            reporter,
            registry,
            format,
            table: RawDataTable::new(),
        }
    }

    pub fn table(&self) -> &RawDataTable {
        &self.table
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Run one job to completion.
    pub fn run(&mut self, job: &Job) -> Result<JobResult, JobFailure> {
        let id = job.raw_data_id();
        match &job.kind {
            JobKind::OpenRawData { original_path } => self.open_raw_data(job, original_path),
            JobKind::CloseRawData { save_changes } => self.close_raw_data(job, *save_changes),
            JobKind::RefreshVisualizers { request } => self.refresh_visualizers(job, request),
            JobKind::FilterRawData { parameters } => self.filter_raw_data(job, parameters),
            JobKind::FindPeaks { parameters } => self.find_peaks(job, id, parameters),
            JobKind::Alignment {
                peak_lists,
                parameters,
            } => self.align(job, peak_lists, parameters),
            JobKind::GapFilling { gaps, parameters } => self.fill_gaps(job, id, gaps, parameters),
            JobKind::CalcTotalRawSignal => self.calc_total_raw_signal(job),
            JobKind::ProcessPeakList {
                peak_list,
                parameters,
            } => self.process_peak_list(job, id, peak_list, parameters),
        }
    }

    fn tracker(&self, job: &Job, distance: f64) -> CompletionTracker {
        CompletionTracker::init(
            self.reporter.clone(),
            job.task_id,
            job.job_id,
            JobStatus::UnderProcessing,
            0.0,
            distance,
        )
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if self.settings.data_root.as_os_str().is_empty() {
            path.to_path_buf()
        } else {
            self.settings.data_root.join(path)
        }
    }

    fn open_raw_data(&mut self, job: &Job, original_path: &Path) -> Result<JobResult, JobFailure> {
        let mut tracker = self.tracker(job, STAGING_WAYPOINT);
        let id = job.raw_data_id();
        if self.table.contains(id) {
            return Err(NodeError::RawDataAlreadyOpen(id).into());
        }

        let original_path = self.resolve(original_path);
        tracing::info!(
            task_id = job.task_id,
            job_id = job.job_id,
            raw_data_id = id,
            path = %original_path.display(),
            "Opening raw data"
        );

        let staged = staging::stage(
            &original_path,
            &self.settings.work_dir,
            id,
            self.settings.chunk_size,
        )
        .map_err(|e| {
            let name = original_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| original_path.display().to_string());
            failed(job, &name, e)
        })?;
        tracker.update(0.5);

        let metadata = match self.format.preload(&staged.path) {
            Ok(metadata) => metadata,
            Err(e) => {
                staging::discard(&staged.path);
                return Err(failed(job, "Unable to preload data.", e));
            }
        };

        let entry = RawDataAtNode {
            raw_data_id: id,
            original_path,
            working_copy: staged.path,
            metadata,
            modified: false,
        };
        let snapshot = entry.snapshot();
        self.table.insert(entry)?;

        tracing::info!(
            raw_data_id = id,
            bytes = staged.bytes,
            chunks = staged.chunks,
            scans = snapshot.metadata.scan_count,
            "Raw data opened"
        );
        Ok(JobResult::RawData(snapshot))
    }

    fn close_raw_data(&mut self, job: &Job, save_changes: bool) -> Result<JobResult, JobFailure> {
        let mut tracker = self.tracker(job, STAGING_WAYPOINT);
        let id = job.raw_data_id();
        let entry = self.table.remove(id)?;

        let mut save_error = None;
        if entry.modified && save_changes {
            tracing::info!(
                raw_data_id = id,
                path = %entry.original_path.display(),
                "Writing changes back to original"
            );
            if let Err(e) = staging::write_back(
                &entry.working_copy,
                &entry.original_path,
                self.settings.chunk_size,
            ) {
                save_error = Some(e);
            }
        }
        tracker.update(0.5);

        match save_error {
            Some(e) => {
                // The working copy is now the only copy of the changes
                tracing::warn!(
                    raw_data_id = id,
                    working_copy = %entry.working_copy.display(),
                    "Keeping working copy after failed save"
                );
                Err(failed(
                    job,
                    &format!(
                        "Unable to save changes to {}, modified copy kept at {}",
                        entry.original_path.display(),
                        entry.working_copy.display()
                    ),
                    e,
                ))
            }
            None => {
                staging::discard(&entry.working_copy);
                tracing::info!(raw_data_id = id, "Raw data closed");
                Ok(JobResult::Closed { raw_data_id: id })
            }
        }
    }

    fn read_scans(&self, entry: &RawDataAtNode) -> Result<Vec<Scan>, DatasetError> {
        self.format.read_scans(&entry.working_copy)
    }

    fn filter_raw_data(
        &mut self,
        job: &Job,
        parameters: &AlgorithmParameters,
    ) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to filter data.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let id = job.raw_data_id();
        let entry = self.table.get(id)?;
        let filter = self.registry.filter(&parameters.class)?;

        let scans = self.read_scans(entry).map_err(|e| failed(job, MESSAGE, e))?;
        let filtered = filter
            .filter(scans, parameters, &mut tracker)
            .map_err(|e| failed(job, MESSAGE, e))?;

        let replacement = entry.working_copy.with_extension("filtered");
        let metadata = self
            .format
            .write_scans(&replacement, &filtered)
            .and_then(|_| self.format.preload(&replacement));
        let metadata = match metadata {
            Ok(metadata) => metadata,
            Err(e) => {
                staging::discard(&replacement);
                return Err(failed(job, MESSAGE, e));
            }
        };
        if let Err(e) = fs::rename(&replacement, &entry.working_copy) {
            staging::discard(&replacement);
            return Err(failed(job, MESSAGE, e));
        }

        let entry = self.table.get_mut(id)?;
        entry.metadata = metadata;
        entry.modified = true;
        tracing::info!(
            raw_data_id = id,
            class = %parameters.class,
            scans = entry.metadata.scan_count,
            "Raw data filtered"
        );
        Ok(JobResult::RawData(entry.snapshot()))
    }

    fn find_peaks(
        &mut self,
        job: &Job,
        id: RawDataId,
        parameters: &AlgorithmParameters,
    ) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to do peak picking.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let entry = self.table.get(id)?;
        let picker = self.registry.peak_picker(&parameters.class)?;

        let scans = self.read_scans(entry).map_err(|e| failed(job, MESSAGE, e))?;
        let peaks = picker
            .find_peaks(id, &scans, &entry.metadata, parameters, &mut tracker)
            .map_err(|e| failed(job, MESSAGE, e))?;
        tracing::info!(raw_data_id = id, peaks = peaks.len(), "Peak picking finished");
        Ok(JobResult::PeakList(peaks))
    }

    fn align(
        &mut self,
        job: &Job,
        peak_lists: &BTreeMap<RawDataId, PeakList>,
        parameters: &AlgorithmParameters,
    ) -> Result<JobResult, JobFailure> {
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let aligner = self.registry.aligner(&parameters.class)?;
        let result = aligner
            .align(peak_lists, parameters, &mut tracker)
            .map_err(|e| failed(job, "Unable to align peak lists.", e))?;
        Ok(JobResult::Alignment(result))
    }

    fn fill_gaps(
        &mut self,
        job: &Job,
        id: RawDataId,
        gaps: &BTreeMap<u32, Gap>,
        parameters: &AlgorithmParameters,
    ) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to fill-in gaps in alignment result.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let entry = self.table.get(id)?;
        let filler = self.registry.gap_filler(&parameters.class)?;

        let scans = self.read_scans(entry).map_err(|e| failed(job, MESSAGE, e))?;
        let fills = filler
            .fill_gaps(&scans, gaps, parameters, &mut tracker)
            .map_err(|e| failed(job, MESSAGE, e))?;
        Ok(JobResult::GapFills(fills))
    }

    fn process_peak_list(
        &mut self,
        job: &Job,
        id: RawDataId,
        peak_list: &PeakList,
        parameters: &AlgorithmParameters,
    ) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to do peak list processing.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let entry = self.table.get(id)?;
        let processor = self.registry.processor(&parameters.class)?;

        let scans = self.read_scans(entry).map_err(|e| failed(job, MESSAGE, e))?;
        let processed = processor
            .process(&scans, peak_list, parameters, &mut tracker)
            .map_err(|e| failed(job, MESSAGE, e))?;
        Ok(JobResult::PeakList(processed))
    }

    fn refresh_visualizers(
        &mut self,
        job: &Job,
        request: &RefreshRequest,
    ) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to refresh visualizers.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let id = job.raw_data_id();
        let entry = self.table.get(id)?;
        request
            .validate()
            .map_err(|detail| failed(job, MESSAGE, detail))?;

        let mut run = RefreshRun::new(request.clone());
        if let Some(span) = run.span() {
            let scans = entry.metadata.scan_count;
            if span.last >= scans {
                let e = DatasetError::ScanRange {
                    first: span.first,
                    last: span.last,
                    scans,
                };
                return Err(failed(job, MESSAGE, e));
            }

            let total = span.len() as f64;
            let mut seen = 0usize;
            let stream = self
                .format
                .scan_range(&entry.working_copy, span.first, span.last)
                .map_err(|e| failed(job, MESSAGE, e))?;
            for (offset, scan) in stream.enumerate() {
                let scan = scan.map_err(|e| failed(job, MESSAGE, e))?;
                run.feed(span.first + offset, &scan);
                seen += 1;
                tracker.update(seen as f64 / total);
            }
            if seen != span.len() {
                let e = DatasetError::ScanRange {
                    first: span.first,
                    last: span.last,
                    scans: span.first + seen,
                };
                return Err(failed(job, MESSAGE, e));
            }
        }

        Ok(JobResult::Refresh(
            run.finish(id, entry.metadata.max_intensity),
        ))
    }

    fn calc_total_raw_signal(&mut self, job: &Job) -> Result<JobResult, JobFailure> {
        const MESSAGE: &str = "Unable to calculate total raw signal.";
        let mut tracker = self.tracker(job, PROCESSING_WAYPOINT);
        let id = job.raw_data_id();
        let entry = self.table.get(id)?;

        let scan_count = entry.metadata.scan_count.max(1) as f64;
        let mut total = 0.0;
        let stream = self
            .format
            .scans(&entry.working_copy)
            .map_err(|e| failed(job, MESSAGE, e))?;
        for (index, scan) in stream.enumerate() {
            let scan = scan.map_err(|e| failed(job, MESSAGE, e))?;
            total += scan.total_intensity();
            tracker.update((index + 1) as f64 / scan_count);
        }

        if total > 0.0 {
            tracing::info!(raw_data_id = id, total, "Total raw signal calculated");
            Ok(JobResult::TotalRawSignal(total))
        } else {
            Err(failed(job, MESSAGE, format!("total signal is {}", total)))
        }
    }
}

impl fmt::Debug for JobHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandlers")
            .field("settings", &self.settings)
            .field("format", &self.format.name())
            .field("open", &self.table.ids())
            .finish()
    }
}
