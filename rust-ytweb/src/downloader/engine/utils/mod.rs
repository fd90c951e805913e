//! Utility modules for download engines.

mod files;
mod process_runner;
mod progress_parser;
mod stage_detector;

pub use files::{ensure_job_dir, job_dir};
pub use process_runner::{ProcessExit, spawn_process_waiter, terminate_gracefully};
pub use progress_parser::{PROGRESS_PREFIX, parse_progress_line};
pub use stage_detector::{HeuristicStageDetector, StageDetector};
