//! Job scheduling.
//!
//! The scheduler is responsible for:
//! - Admission control (per-client limit, reuse of identical completed jobs)
//! - The FIFO wait queue and the global concurrency limit
//! - Driving each job through its lifecycle from engine events
//! - Cancellation of queued and running jobs
//! - Publishing snapshots and requesting durability writes
//!
//! All job state lives in one actor task; [`JobScheduler`] is the handle.

mod actor;
mod messages;
mod service;

pub use messages::SchedulerStats;
pub use service::{DEFAULT_MAILBOX_CAPACITY, JobScheduler, SchedulerConfig};
