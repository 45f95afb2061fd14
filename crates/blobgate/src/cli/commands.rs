//! CLI command definitions.

use blobgate::LogFormat;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Blobgate - blob storage gateway with pluggable backends and a reversible pipeline
#[derive(Parser, Debug)]
#[command(name = "blobgate")]
#[command(about = "Blob storage gateway with pluggable backends and a reversible pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./blobgate.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse, transform and store a local file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Target path in the backend (generated when omitted)
        #[arg(long)]
        path: Option<String>,

        /// Content type (guessed from the file name when omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },

    /// Fetch an object and undo the pipeline
    Download {
        /// Object path
        path: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an object
    Delete {
        /// Object path
        path: String,
    },

    /// Check whether an object exists
    Exists {
        /// Object path
        path: String,
    },

    /// List stored objects
    List {
        /// Only list objects under this prefix
        prefix: Option<String>,

        /// Descend into sub-directories
        #[arg(short, long)]
        recursive: bool,

        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },

    /// Print a direct access URL for an object
    Url {
        /// Object path
        path: String,

        /// Validity for pre-signed URLs, in seconds
        #[arg(long)]
        expires: Option<u64>,
    },

    /// Show backend and cache counters
    Stats {
        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },

    /// Send an object to the text extraction service
    Extract {
        /// Object path
        path: String,
    },

    /// Print the effective configuration with secrets masked
    Config,
}

/// Output format options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}
