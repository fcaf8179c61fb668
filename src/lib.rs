//! Docforge - document conversion job supervisor
//!
//! Accepts conversion jobs, admits them into a bounded queue, runs at most
//! `max_concurrency` LibreOffice conversions at once with retries and
//! per-attempt deadlines, and reclaims job records and workspaces once they
//! age out.

pub mod supervisor;

pub use supervisor::{Counters, JobReport, MaintenanceHandles, Supervisor, SystemStatus};
