//! # docforge-exec
//!
//! External converter management for the docforge job supervisor.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ConverterTools`]) -- find and cache the path to
//!   LibreOffice's `soffice`.
//! - **Managed processes** ([`ProcessCommand`], [`ManagedProcess`]) -- spawn
//!   a program as a process-group leader, wait with a deadline, and escalate
//!   SIGTERM to SIGKILL across the whole group.
//! - **Profile isolation** ([`ProfileDir`]) -- a per-invocation converter
//!   state directory that is removed on every exit path.
//! - **Conversion** ([`Converter`], [`SofficeRunner`]) -- the seam the
//!   supervisor drives, and its LibreOffice implementation.

pub mod process;
pub mod profile;
pub mod runner;
pub mod tools;

// ---- Re-exports for convenience ----

pub use process::{ManagedProcess, ProcessCommand, ProcessOutput, WaitOutcome};
pub use profile::ProfileDir;
pub use runner::{expected_extension, find_output, ConversionRequest, Converter, SofficeRunner};
pub use tools::{ConverterTools, ToolConfig, ToolInfo, SOFFICE};
