use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docforge")]
#[command(author, version, about = "Document conversion job supervisor")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the workspace data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert documents through the job queue
    Convert {
        /// Files to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target format (e.g. pdf, docx, odt)
        #[arg(long)]
        to: Option<String>,

        /// Run each job immediately, one after another, instead of queueing
        #[arg(long)]
        sync: bool,

        /// Copy finished outputs into this directory
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Maximum conversions running at once
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Retries after the first attempt
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Check that the converter is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Print a status snapshot as JSON
    Status,

    /// Display version information
    Version,
}
