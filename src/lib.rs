//! Conformance-test harness for Schematron validation engines.
//!
//! Testcase fixtures are loaded into immutable specs, materialized into
//! per-testcase filesystem sandboxes, run through a pluggable
//! schema-compilation pipeline, and judged against their declared
//! expectation. Results aggregate into a run [`report::Report`].

pub mod cli;
pub mod config;
pub mod dom;
pub mod error;
pub mod loader;
pub mod namespaces;
pub mod output;
pub mod pipeline;
pub mod populate;
pub mod report;
pub mod runner;
pub mod testcase;
pub mod xpath;

pub use error::{HarnessError, PipelineError, PopulateError, Result, SpecError};
pub use pipeline::{CompiledSchema, Validator, ValidatorRegistry};
pub use populate::{PopulatedTestcase, Populator};
pub use report::{Report, ValidationResult, ValidationStatus};
pub use runner::{Driver, TestsuiteRunner};
pub use testcase::{ExpectedOutcome, SchemaVariant, TestcaseSpec};
