use std::path::PathBuf;

use clap::Parser;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

/// Schematron validation engine conformance harness
#[derive(Parser, Debug, Clone)]
#[command(name = "schematron-testsuite")]
#[command(about = "Run Schematron conformance testcases against a validator backend")]
#[command(version)]
pub struct Cli {
    /// Testsuite manifest or directory with testcase files
    #[arg(help = "Testsuite manifest file or testcase directory")]
    pub testsuite: PathBuf,

    /// Harness configuration file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Name of the validator backend to run
    #[arg(short = 'b', long = "validator")]
    pub validator: String,

    /// Skip testcases with these ids (repeatable)
    #[arg(short = 's', long = "skip", action = clap::ArgAction::Append)]
    pub skip: Vec<String>,

    /// Write the XML run report to this file
    #[arg(short = 'o', long = "report")]
    pub report: Option<PathBuf>,

    /// Write the JSON run report to this file
    #[arg(long = "json-report")]
    pub json_report: Option<PathBuf>,

    /// Run label recorded in the report
    #[arg(long = "label")]
    pub label: Option<String>,

    /// Number of concurrent worker tasks (default: sequential)
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Create testcase sandboxes under this directory
    #[arg(long = "sandbox-dir")]
    pub sandbox_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (failures only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn thread_count(&self) -> usize {
        match self.threads {
            Some(0) | None => 1,
            Some(n) => n.min(num_cpus::get() * 2),
        }
    }
}
