//! Alternate in-process backend with pre-compiled stages.
//!
//! Same chaining contract as the in-process backend, but the compiler
//! stages are compiled once at construction and stylesheet parameters are a
//! pre-built map applied uniformly to every stage instead of being
//! recomputed per stage.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dom::Document;
use crate::error::PipelineError;
use crate::pipeline::transform::{TransformEngine, TransformParams};
use crate::pipeline::{CompiledSchema, Validator};

pub struct TemplateValidator<E: TransformEngine> {
    engine: Arc<E>,
    label: String,
    query_binding: String,
    features: BTreeSet<String>,
    stages: Vec<E::Compiled>,
    options: TransformParams,
}

impl<E: TransformEngine + 'static> TemplateValidator<E> {
    /// Compile the stage stylesheets eagerly; a stage that fails to compile
    /// makes the whole backend unusable, which surfaces at construction.
    pub fn new(
        engine: Arc<E>,
        label: impl Into<String>,
        query_binding: impl Into<String>,
        features: impl IntoIterator<Item = String>,
        stage_stylesheets: &[Document],
        options: TransformParams,
    ) -> Result<Self, PipelineError> {
        let mut stages = Vec::with_capacity(stage_stylesheets.len());
        for (stage, stylesheet) in stage_stylesheets.iter().enumerate() {
            stages.push(engine.compile(stylesheet).map_err(|e| {
                PipelineError::StageCompile {
                    stage,
                    details: e.to_string(),
                }
            })?);
        }
        Ok(Self {
            engine,
            label: label.into(),
            query_binding: query_binding.into(),
            features: features.into_iter().collect(),
            stages,
            options,
        })
    }
}

#[async_trait]
impl<E: TransformEngine + 'static> Validator for TemplateValidator<E> {
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

        // The pre-built option map wins over the phase argument.
        let mut params = self.options.clone();
        if let Some(phase) = phase {
            params
                .entry("phase".to_string())
                .or_insert_with(|| phase.to_string());
        }

        for (stage, compiled) in self.stages.iter().enumerate() {
            let outcome = self
                .engine
                .transform(compiled, &source, &params)
                .map_err(|e| PipelineError::StageTransform {
                    stage,
                    details: e.to_string(),
                })?;
            source = outcome.document;
        }

        let executable = self
            .engine
            .compile(&source)
            .map_err(|e| PipelineError::StageCompile {
                stage: self.stages.len(),
                details: e.to_string(),
            })?;

        Ok(Box::new(TemplateCompiled {
            engine: Arc::clone(&self.engine),
            executable,
        }))
    }
}

struct TemplateCompiled<E: TransformEngine> {
    engine: Arc<E>,
    executable: E::Compiled,
}

#[async_trait]
impl<E: TransformEngine + 'static> CompiledSchema for TemplateCompiled<E> {
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
        Ok(Some(outcome.document))
    }
}
