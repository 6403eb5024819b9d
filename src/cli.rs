use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

impl VerbosityLevel {
    /// Most detailed `tracing` level logged at this verbosity
    pub fn log_level(&self) -> tracing::Level {
        match self {
            VerbosityLevel::Quiet => tracing::Level::ERROR,
            VerbosityLevel::Normal => tracing::Level::WARN,
            VerbosityLevel::Verbose => tracing::Level::INFO,
            VerbosityLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

/// Output format for resolution summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report
    #[default]
    Human,
    /// Machine-readable JSON
    Json,
}

/// Discover, fetch and archive the XML schemas documents depend on
#[derive(Parser, Debug, Clone)]
#[command(name = "xmlresolution")]
#[command(about = "Resolve and collect the schemas needed to validate XML documents")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Root of the schema cache and collections
    #[arg(long = "data-root")]
    pub data_root: Option<PathBuf>,

    /// Caching proxy for schema downloads, host[:port]
    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Maximum number of schemas considered for one document
    #[arg(long = "max-schemas")]
    pub max_schemas: Option<usize>,

    /// Create missing collections when saving into them
    #[arg(long = "auto-create")]
    pub auto_create: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with_all = ["verbose", "debug"]
    )]
    pub quiet: bool,

    /// Log every fetch and lock
    #[arg(long = "debug")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a collection; succeeds if it already exists
    Create { collection: String },

    /// List collections, evicting stale ones
    Collections,

    /// Resolve documents and save the results into a collection
    Resolve {
        collection: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Identifier recorded for the document (single file only)
        #[arg(long = "uri")]
        uri: Option<String>,

        /// Print a PREMIS event report instead of a summary
        #[arg(long = "premis")]
        premis: bool,

        #[arg(long = "format", value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Write the collection manifest
    Manifest {
        collection: String,

        /// Output file; standard output when absent
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Write a tar archive of the collection's schemas and manifest
    Tar {
        collection: String,

        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Command::Resolve { files, uri, .. } = &self.command {
            if uri.is_some() && files.len() > 1 {
                return Err("--uri can only be used when resolving a single file".to_string());
            }
            for file in files {
                if !file.is_file() {
                    return Err(format!("Not a file: {}", file.display()));
                }
            }
        }
        if self.max_schemas == Some(0) {
            return Err("--max-schemas must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.debug {
            VerbosityLevel::Debug
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}
