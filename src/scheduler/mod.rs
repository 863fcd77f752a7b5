//! Automated line cancellation.
//!
//! - [`store`]: collaborator queries (expired lines, device lookup) and a
//!   SQLite implementation
//! - [`schedule`]: cron expression + timezone
//! - [`cancel`]: the run itself, overlap guard, and recurring loop

pub mod cancel;
pub mod schedule;
pub mod store;

pub use cancel::{
    AutoCancelScheduler, CancellationResult, RunSummary, RunTrigger, SchedulerError,
    SchedulerStatus,
};
pub use schedule::CronSchedule;
pub use store::{Device, DeviceLookup, ExpiredLine, ExpiredLineScanner, SqliteLineStore};
