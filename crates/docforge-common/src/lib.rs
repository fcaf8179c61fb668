//! docforge-common: shared types, IDs, errors and configuration.
//!
//! This crate is the foundational dependency for the other docforge crates,
//! providing the typed job identifier, the unified error type, the job
//! record with its status state machine, and application configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use job::{Job, JobStatus};
