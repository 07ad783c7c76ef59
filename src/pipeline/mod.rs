//! Pluggable schema-compilation-and-validation pipeline.
//!
//! A [`Validator`] turns a schema file plus an ordered list of compiler
//! stages into an executable validator, runs it against an instance
//! document, and judges the resulting report. Backends are polymorphic:
//! in-process transforms, external processes, or an alternate engine with a
//! pre-built parameter map.

pub mod commandline;
pub mod template;
pub mod transform;
pub mod xslt;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ValidatorConfig;
use crate::dom::Document;
use crate::error::{HarnessError, PipelineError};

/// Namespace of validation-report (SVRL) documents.
pub const SVRL_NS: &str = "http://purl.oclc.org/dsdl/svrl";

/// A schema compiled to directly executable form by some backend.
#[async_trait]
pub trait CompiledSchema: Send + Sync {
    /// Apply the compiled validator to one instance document and produce the
    /// validation report. `None` means the backend completed without
    /// producing any report document.
    async fn apply(&self, document: &Path) -> Result<Option<Document>, PipelineError>;
}

/// Public contract of a validation backend.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Human-readable product label for the run report.
    fn label(&self) -> &str;

    /// Query binding this backend compiles schemas for.
    fn query_binding(&self) -> &str;

    /// Capability tags used for testcase feature gating.
    fn supported_features(&self) -> &BTreeSet<String>;

    /// Whether the underlying toolchain is present in this environment,
    /// independent of testcase feature gating.
    async fn is_available(&self) -> bool;

    /// Chain the compiler stages over `schema`. The optional phase is passed
    /// to every stage; the final stage's output is the executable validator.
    async fn compile(
        &self,
        schema: &Path,
        phase: Option<&str>,
    ) -> Result<Box<dyn CompiledSchema>, PipelineError>;

    /// Apply a compiled validator to one instance document.
    async fn execute(
        &self,
        compiled: &dyn CompiledSchema,
        document: &Path,
    ) -> Result<Option<Document>, PipelineError> {
        compiled.apply(document).await
    }

    /// A report is valid iff it contains no failed assertion and no
    /// successful negative report in the SVRL namespace.
    fn is_valid(&self, report: &Document) -> bool {
        is_valid_report(report)
    }
}

/// Shared SVRL judgment used by every backend.
pub fn is_valid_report(report: &Document) -> bool {
    match report.root_element() {
        Some(root) => {
            report.elements_by_ns(root, SVRL_NS, "failed-assert").is_empty()
                && report
                    .elements_by_ns(root, SVRL_NS, "successful-report")
                    .is_empty()
        }
        None => true,
    }
}

type ValidatorFactory =
    Box<dyn Fn(&ValidatorConfig) -> Result<Arc<dyn Validator>, HarnessError> + Send + Sync>;

/// Late-bound backend selection: a plain mapping from configuration-supplied
/// kind to a factory producing a [`Validator`].
#[derive(Default)]
pub struct ValidatorRegistry {
    factories: HashMap<String, ValidatorFactory>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backend kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("commandline", |config| {
            let validator: Arc<dyn Validator> =
                Arc::new(commandline::CommandlineValidator::from_config(config)?);
            Ok(validator)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ValidatorConfig) -> Result<Arc<dyn Validator>, HarnessError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn create(&self, config: &ValidatorConfig) -> Result<Arc<dyn Validator>, HarnessError> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            HarnessError::Config(format!(
                "unknown validator kind '{}', known kinds: {}",
                config.kind,
                self.kinds().join(", ")
            ))
        })?;
        factory(config)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_report() {
        let valid = Document::parse(&format!(
            r#"<svrl:schematron-output xmlns:svrl="{}"><svrl:fired-rule/></svrl:schematron-output>"#,
            SVRL_NS
        ))
        .unwrap();
        assert!(is_valid_report(&valid));

        let failed = Document::parse(&format!(
            r#"<svrl:schematron-output xmlns:svrl="{}"><svrl:failed-assert/></svrl:schematron-output>"#,
            SVRL_NS
        ))
        .unwrap();
        assert!(!is_valid_report(&failed));

        let reported = Document::parse(&format!(
            r#"<svrl:schematron-output xmlns:svrl="{}"><svrl:successful-report/></svrl:schematron-output>"#,
            SVRL_NS
        ))
        .unwrap();
        assert!(!is_valid_report(&reported));
    }

    #[test]
    fn test_nodes_outside_svrl_namespace_do_not_count() {
        let doc = Document::parse(
            r#"<out><failed-assert/><successful-report/></out>"#,
        )
        .unwrap();
        assert!(is_valid_report(&doc));
    }

    #[test]
    fn test_registry_unknown_kind() {
        let registry = ValidatorRegistry::with_builtins();
        let config = ValidatorConfig {
            kind: "no-such-backend".to_string(),
            ..ValidatorConfig::default()
        };
        let err = registry.create(&config).err().unwrap();
        assert!(err.to_string().contains("no-such-backend"));
        assert!(err.to_string().contains("commandline"));
    }
}
