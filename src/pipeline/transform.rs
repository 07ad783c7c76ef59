//! Trait seam over in-process tree-to-tree transform engines.
//!
//! The harness orchestrates an XSLT engine, it does not implement one. An
//! embedder supplies a [`TransformEngine`] and the in-process validators
//! chain compiler stages through it.

use std::collections::BTreeMap;

use crate::dom::Document;
use crate::error::PipelineError;

/// Stylesheet parameters for one transform invocation.
pub type TransformParams = BTreeMap<String, String>;

/// Result of one transform: the output tree plus any recoverable conditions
/// the engine reported. Fatal conditions are errors, not warnings.
#[derive(Debug)]
pub struct TransformOutcome {
    pub document: Document,
    pub warnings: Vec<String>,
}

impl TransformOutcome {
    pub fn clean(document: Document) -> Self {
        Self {
            document,
            warnings: Vec::new(),
        }
    }
}

/// An in-process transform engine.
///
/// One engine instance serves a whole pipeline; `Compiled` values must be
/// reusable for repeated transforms.
pub trait TransformEngine: Send + Sync {
    /// A compiled, executable stylesheet.
    type Compiled: Send + Sync;

    /// Whether the underlying toolchain is usable in this environment.
    fn is_available(&self) -> bool {
        true
    }

    /// Compile a stylesheet document.
    fn compile(&self, stylesheet: &Document) -> Result<Self::Compiled, PipelineError>;

    /// Apply a compiled stylesheet to a source tree.
    fn transform(
        &self,
        compiled: &Self::Compiled,
        source: &Document,
        params: &TransformParams,
    ) -> Result<TransformOutcome, PipelineError>;
}
