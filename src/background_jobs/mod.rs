//! Background job scheduling and execution.
//!
//! Jobs run on fixed intervals or on an admin trigger, one instance per job
//! at a time.
//! Each run, with the summary it reports, is recorded in the server database.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobDetail, JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSummary};
pub use scheduler::{create_scheduler, JobScheduler};
