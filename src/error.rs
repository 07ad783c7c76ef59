use std::path::PathBuf;

use thiserror::Error;

/// Main harness error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Populate(#[from] PopulateError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Specification errors: malformed or structurally invalid testcase and
/// testsuite documents. These are authoring bugs and abort the whole run.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("XML parse error: {details}")]
    Xml { details: String },

    #[error("Malformed testcase {path}: {details}")]
    MalformedTestcase { path: PathBuf, details: String },

    #[error("Malformed testsuite {path}: {details}")]
    MalformedTestsuite { path: PathBuf, details: String },

    #[error("Duplicate namespace prefix declaration: {prefix}")]
    DuplicatePrefix { prefix: String },

    #[error("Invalid expectation expression '{expression}': {details}")]
    Expression { expression: String, details: String },
}

/// Errors raised while materializing a testcase into its sandbox.
///
/// Assertion compilation failures are specification errors in disguise and
/// abort the run; everything else is fatal for the one testcase only.
#[derive(Error, Debug)]
pub enum PopulateError {
    #[error("Cannot populate file outside of the sandbox directory: {filename}")]
    PathEscape { filename: String },

    #[error("Unable to obtain schema for query binding {query_binding}")]
    NoSchemaVariant { query_binding: String },

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Sandbox IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compilation or execution failure inside a validator backend. Recoverable
/// at the testcase level; interpreted by the decision procedure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage {stage} failed to compile: {details}")]
    StageCompile { stage: usize, details: String },

    #[error("Stage {stage} failed to transform: {details}")]
    StageTransform { stage: usize, details: String },

    #[error("Stage {stage} reported warnings: {details}")]
    StageWarnings { stage: usize, details: String },

    #[error("Validation failed: {details}")]
    Execution { details: String },

    #[error("External command failed with exit code {code}")]
    NonZeroExit { code: i32 },

    #[error("External command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Unable to parse validation report: {details}")]
    ReportParse { details: String },

    #[error("Validator backend '{label}' is not available")]
    Unavailable { label: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HarnessError>;
