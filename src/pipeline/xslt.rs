//! In-process validation backend.
//!
//! Chains the compiler stages as in-memory tree-to-tree transforms through
//! one [`TransformEngine`] instance. Stage `i`'s output document becomes
//! stage `i+1`'s input; the final stage's output is compiled into the
//! executable validator. Recoverable stage warnings are swallowed by
//! default; only fatal conditions abort the compile. The swallow policy is
//! configurable via [`XsltValidator::fail_on_warning`].

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dom::Document;
use crate::error::PipelineError;
use crate::pipeline::transform::{TransformEngine, TransformParams};
use crate::pipeline::{CompiledSchema, Validator};

pub struct XsltValidator<E: TransformEngine> {
    engine: Arc<E>,
    label: String,
    query_binding: String,
    features: BTreeSet<String>,
    stages: Vec<Document>,
    fail_on_warning: bool,
}

impl<E: TransformEngine + 'static> XsltValidator<E> {
    pub fn new(
        engine: Arc<E>,
        label: impl Into<String>,
        query_binding: impl Into<String>,
        features: impl IntoIterator<Item = String>,
        stages: Vec<Document>,
    ) -> Self {
        Self {
            engine,
            label: label.into(),
            query_binding: query_binding.into(),
            features: features.into_iter().collect(),
            stages,
            fail_on_warning: false,
        }
    }

    /// Treat recoverable stage warnings as pipeline errors.
    pub fn fail_on_warning(mut self, fail: bool) -> Self {
        self.fail_on_warning = fail;
        self
    }

    fn check_warnings(
        &self,
        stage: usize,
        warnings: &[String],
    ) -> Result<(), PipelineError> {
        if warnings.is_empty() {
            return Ok(());
        }
        if self.fail_on_warning {
            return Err(PipelineError::StageWarnings {
                stage,
                details: warnings.join("; "),
            });
        }
        debug!(stage, count = warnings.len(), "swallowed stage warnings");
        Ok(())
    }
}

#[async_trait]
impl<E: TransformEngine + 'static> Validator for XsltValidator<E> {
    fn label(&self) -> &str {
        &self.label
    }

    fn query_binding(&self) -> &str {
        &self.query_binding
    }

    fn supported_features(&self) -> &BTreeSet<String> {
        &self.features
    }

    async fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    async fn compile(
        &self,
        schema: &Path,
        phase: Option<&str>,
    ) -> Result<Box<dyn CompiledSchema>, PipelineError> {
        let text = tokio::fs::read_to_string(schema).await?;
        let mut source = Document::parse(&text).map_err(|e| PipelineError::StageCompile {
            stage: 0,
            details: format!("unable to parse schema: {}", e),
        })?;

        let mut params = TransformParams::new();
        if let Some(phase) = phase {
            params.insert("phase".to_string(), phase.to_string());
        }

        for (stage, stylesheet) in self.stages.iter().enumerate() {
            let compiled =
                self.engine
                    .compile(stylesheet)
                    .map_err(|e| PipelineError::StageCompile {
                        stage,
                        details: e.to_string(),
                    })?;
            let outcome = self
                .engine
                .transform(&compiled, &source, &params)
                .map_err(|e| PipelineError::StageTransform {
                    stage,
                    details: e.to_string(),
                })?;
            self.check_warnings(stage, &outcome.warnings)?;
            source = outcome.document;
        }

        let executable = self
            .engine
            .compile(&source)
            .map_err(|e| PipelineError::StageCompile {
                stage: self.stages.len(),
                details: e.to_string(),
            })?;

        Ok(Box::new(InProcessCompiled {
            engine: Arc::clone(&self.engine),
            executable,
        }))
    }
}

struct InProcessCompiled<E: TransformEngine> {
    engine: Arc<E>,
    executable: E::Compiled,
}

#[async_trait]
impl<E: TransformEngine + 'static> CompiledSchema for InProcessCompiled<E> {
    async fn apply(&self, document: &Path) -> Result<Option<Document>, PipelineError> {
        let text = tokio::fs::read_to_string(document).await?;
        let source = Document::parse(&text).map_err(|e| PipelineError::Execution {
            details: format!("unable to parse instance document: {}", e),
        })?;
        let outcome = self
            .engine
            .transform(&self.executable, &source, &TransformParams::new())
            .map_err(|e| PipelineError::Execution {
                details: e.to_string(),
            })?;
        if !outcome.warnings.is_empty() {
            debug!(count = outcome.warnings.len(), "swallowed validation warnings");
        }
        Ok(Some(outcome.document))
    }
}
