use crate::controller::Reporter;
use crate::scheduler::{JobId, JobStatus, TaskId};
use crate::strategy::Progress;

const TOLERANCE: f64 = 1e-9;

/// Rate-limited completion reporting for one running job.
///
/// Waypoints sit at `start + k * distance`. An update is forwarded only when
/// it reaches the next waypoint; an update that jumps over several waypoints
/// sends a single notification carrying the latest rate, and the next waypoint
/// becomes the first one strictly above it.
#[derive(Debug)]
pub struct CompletionTracker {
    reporter: Reporter,
    task_id: TaskId,
    job_id: JobId,
    status: JobStatus,
    start: f64,
    distance: f64,
    current_rate: f64,
    next_waypoint: f64,
}

impl CompletionTracker {
    /// Create a tracker and immediately report `start_rate`.
    pub fn init(
        reporter: Reporter,
        task_id: TaskId,
        job_id: JobId,
        status: JobStatus,
        start_rate: f64,
        distance: f64,
    ) -> Self {
        let start = start_rate.clamp(0.0, 1.0);
        let mut tracker = Self {
            reporter,
            task_id,
            job_id,
            status,
            start,
            distance,
            current_rate: start,
            next_waypoint: start,
        };
        tracker.emit();
        tracker.next_waypoint = tracker.waypoint_after(start);
        tracker
    }

    pub fn update(&mut self, rate: f64) {
        self.current_rate = rate.clamp(0.0, 1.0);
        if self.current_rate + TOLERANCE >= self.next_waypoint {
            self.emit();
            self.next_waypoint = self.waypoint_after(self.current_rate);
        }
    }

    pub fn rate(&self) -> f64 {
        self.current_rate
    }

    pub fn next_waypoint(&self) -> f64 {
        self.next_waypoint
    }

    /// First waypoint strictly above `rate`.
    fn waypoint_after(&self, rate: f64) -> f64 {
        if self.distance <= 0.0 {
            return rate;
        }
        let crossed = ((rate - self.start) / self.distance + TOLERANCE).floor();
        self.start + (crossed + 1.0) * self.distance
    }

    fn emit(&self) {
        tracing::debug!(
            task_id = self.task_id,
            job_id = self.job_id,
            status = %self.status,
            rate = self.current_rate,
            "Completion rate"
        );
        self.reporter
            .completion(self.task_id, self.job_id, self.status, self.current_rate);
    }
}

impl Progress for CompletionTracker {
    fn update(&mut self, rate: f64) {
        CompletionTracker::update(self, rate);
    }
}
