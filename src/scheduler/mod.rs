pub mod job;
pub mod queue;

pub use job::{Job, JobId, JobKind, JobStatus, JobType, RawDataId, TaskId};
pub use queue::{JobQueue, JobReceiver};
