use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable report
    #[default]
    Human,
    /// Machine-readable JSON
    Json,
    /// One-line summary
    Summary,
}

/// Concurrent NFe processing pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "nfe-pipeline")]
#[command(about = "Validate, submit and organize NFe XML documents")]
#[command(version)]
pub struct Cli {
    /// XML documents or compressed containers to process
    #[arg(help = "Files to process (.xml or .zip)")]
    pub inputs: Vec<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Output root for processed/errors/reprocess/logs
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// ValidaNFe API token (or set NFE_PIPELINE_TOKEN)
    #[arg(long = "token")]
    pub token: Option<String>,

    /// API base URL
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Number of concurrent workers
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Directory holding the XSD schemas
    #[arg(long = "schema-dir")]
    pub schema_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Number of retry attempts for transient API failures
    #[arg(long = "retry-attempts")]
    pub retry_attempts: Option<u32>,

    /// Validate and submit but leave files where they are
    #[arg(long = "no-organize")]
    pub no_organize: bool,

    /// Probe the API and exit
    #[arg(long = "check-connection")]
    pub check_connection: bool,

    /// Report format
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Argument-level checks that clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.inputs.is_empty() && !self.check_connection {
            return Err("no input files given".to_string());
        }
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("--workers must be at least 1".to_string());
            }
        }
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("--timeout must be at least 1 second".to_string());
            }
        }
        Ok(())
    }
}
